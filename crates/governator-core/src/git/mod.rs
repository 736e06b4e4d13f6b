//! Worktree and git gateway.
//!
//! Each dispatched task gets its own branch and git worktree under the
//! local state area, giving workers filesystem isolation without full
//! clones. Integration back into the base branch is performed here by
//! the supervisor; workers never touch the base branch.
//!
//! Git does not support concurrent worktree operations on one
//! repository, so all mutating operations are serialized through an
//! internal mutex.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use governator_store::layout::Layout;

/// Branch namespace for task branches.
pub const BRANCH_PREFIX: &str = "governator";

#[derive(Debug, Error)]
pub enum GitError {
    #[error("not a git worktree: {0}")]
    NotARepo(PathBuf),

    #[error("base branch '{branch}' has uncommitted changes")]
    Dirty { branch: String },

    #[error("merge conflict integrating '{branch}': {details}")]
    Conflict { branch: String, details: String },

    #[error("missing ref or worktree: {0}")]
    Missing(String),

    #[error("failed to run git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed (exit {code}): {stderr}")]
    Exit {
        command: String,
        code: i32,
        stderr: String,
    },
}

/// Result of an integrate attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrateOutcome {
    Merged,
    /// The merge was aborted; the worktree is left intact for a
    /// resolution worker.
    Conflict { details: String },
}

/// Snapshot of a task worktree's commit state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitCheck {
    /// Uncommitted changes present in the worktree.
    pub dirty: bool,
    /// Paths modified but not committed.
    pub modified: Vec<PathBuf>,
    /// Commits on the task branch that are not on the base branch.
    pub commits: Vec<String>,
}

#[derive(Debug)]
pub struct GitGateway {
    repo_root: PathBuf,
    layout: Layout,
    base_branch: String,
    /// Serializes mutating git operations (shared lock-file contention).
    git_lock: Arc<Mutex<()>>,
}

impl Clone for GitGateway {
    fn clone(&self) -> Self {
        Self {
            repo_root: self.repo_root.clone(),
            layout: self.layout.clone(),
            base_branch: self.base_branch.clone(),
            git_lock: Arc::clone(&self.git_lock),
        }
    }
}

/// Is `path` inside a git worktree?
pub fn is_git_worktree(path: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(path)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

impl GitGateway {
    pub fn new(layout: Layout, base_branch: impl Into<String>) -> Result<Self, GitError> {
        let repo_root = layout.repo_root().to_path_buf();
        if !is_git_worktree(&repo_root) {
            return Err(GitError::NotARepo(repo_root));
        }
        Ok(Self {
            repo_root,
            layout,
            base_branch: base_branch.into(),
            git_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    /// Branch name for a task: `governator/<task-id>`.
    pub fn branch_name(task_id: &str) -> String {
        format!("{BRANCH_PREFIX}/{task_id}")
    }

    // -- low-level helpers --------------------------------------------------

    fn run(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| GitError::Spawn {
                command: args.join(" "),
                source: e,
            })?;
        if !output.status.success() {
            return Err(GitError::Exit {
                command: args.join(" "),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        let output = Command::new("git")
            .args(["rev-parse", "--verify", &format!("refs/heads/{branch}")])
            .current_dir(&self.repo_root)
            .output()
            .map_err(|e| GitError::Spawn {
                command: "rev-parse --verify".into(),
                source: e,
            })?;
        Ok(output.status.success())
    }

    fn worktree_registered(&self, path: &Path) -> Result<bool, GitError> {
        let out = self.run(&self.repo_root, &["worktree", "list", "--porcelain"])?;
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        for line in out.lines() {
            if let Some(rest) = line.strip_prefix("worktree ") {
                let wt = PathBuf::from(rest);
                let wt = wt.canonicalize().unwrap_or(wt);
                if wt == canonical {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn current_branch(&self) -> Result<String, GitError> {
        Ok(self
            .run(&self.repo_root, &["branch", "--show-current"])?
            .trim()
            .to_string())
    }

    // -- operations ---------------------------------------------------------

    /// Create the task branch from the base branch and add a worktree at
    /// the stable per-task path. Idempotent: an existing worktree on the
    /// expected branch is returned as-is.
    pub fn prepare(&self, task_id: &str) -> Result<PathBuf, GitError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        let branch = Self::branch_name(task_id);
        let path = self.layout.worktree_dir(task_id);

        if path.exists() && self.worktree_registered(&path)? {
            tracing::debug!(task = task_id, path = %path.display(), "worktree already prepared");
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GitError::Spawn {
                command: format!("mkdir {}", parent.display()),
                source: e,
            })?;
        }

        let path_str = path.to_string_lossy().to_string();
        let result = if self.branch_exists(&branch)? {
            self.run(&self.repo_root, &["worktree", "add", &path_str, &branch])
        } else {
            self.run(
                &self.repo_root,
                &[
                    "worktree",
                    "add",
                    "-b",
                    &branch,
                    &path_str,
                    &self.base_branch,
                ],
            )
        };

        match result {
            Ok(_) => {
                tracing::info!(task = task_id, branch = %branch, "prepared worktree");
                Ok(path)
            }
            Err(e) => {
                // Best-effort cleanup of partial state.
                if path.exists() {
                    let _ = std::fs::remove_dir_all(&path);
                }
                let _ = self.run(&self.repo_root, &["worktree", "prune"]);
                Err(e)
            }
        }
    }

    /// Report the worktree's uncommitted changes and the commits its
    /// branch carries beyond the base branch.
    pub fn commit_check(&self, task_id: &str) -> Result<CommitCheck, GitError> {
        let path = self.layout.worktree_dir(task_id);
        if !path.exists() {
            return Err(GitError::Missing(format!(
                "no worktree for task {task_id}"
            )));
        }

        let status = self.run(&path, &["status", "--porcelain"])?;
        let modified: Vec<PathBuf> = status
            .lines()
            .filter_map(|l| l.get(3..))
            .map(PathBuf::from)
            .collect();

        let branch = Self::branch_name(task_id);
        let range = format!("{}..{}", self.base_branch, branch);
        let commits: Vec<String> = self
            .run(&self.repo_root, &["rev-list", &range])?
            .lines()
            .map(|s| s.to_string())
            .collect();

        Ok(CommitCheck {
            dirty: !modified.is_empty(),
            modified,
            commits,
        })
    }

    /// Stage and commit everything in the task worktree. Returns `true`
    /// if a commit was created, `false` if the tree was clean.
    pub fn commit_all(&self, task_id: &str, message: &str) -> Result<bool, GitError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        let path = self.layout.worktree_dir(task_id);
        if !path.exists() {
            return Err(GitError::Missing(format!(
                "no worktree for task {task_id}"
            )));
        }

        self.run(&path, &["add", "-A"])?;
        let status = self.run(&path, &["status", "--porcelain"])?;
        if status.trim().is_empty() {
            return Ok(false);
        }
        self.run(&path, &["commit", "-m", message])?;
        Ok(true)
    }

    /// Merge the task branch into the base branch.
    ///
    /// The base branch must be checked out and clean in the main
    /// working copy. On conflict the merge is aborted, the worktree is
    /// left intact, and `IntegrateOutcome::Conflict` is returned.
    pub fn integrate(&self, task_id: &str) -> Result<IntegrateOutcome, GitError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());

        let branch = Self::branch_name(task_id);
        if !self.branch_exists(&branch)? {
            return Err(GitError::Missing(format!("branch {branch} does not exist")));
        }

        if self.current_branch()? != self.base_branch {
            self.run(&self.repo_root, &["checkout", &self.base_branch])?;
        }

        let status = self.run(&self.repo_root, &["status", "--porcelain"])?;
        if !status.trim().is_empty() {
            return Err(GitError::Dirty {
                branch: self.base_branch.clone(),
            });
        }

        let message = format!("Merge task {task_id}");
        let output = Command::new("git")
            .args(["merge", "--no-ff", "-m", &message, &branch])
            .current_dir(&self.repo_root)
            .output()
            .map_err(|e| GitError::Spawn {
                command: "merge".into(),
                source: e,
            })?;

        if output.status.success() {
            tracing::info!(task = task_id, branch = %branch, "integrated into base branch");
            return Ok(IntegrateOutcome::Merged);
        }

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if stdout.contains("CONFLICT")
            || stderr.contains("CONFLICT")
            || stdout.contains("Automatic merge failed")
        {
            let _ = self.run(&self.repo_root, &["merge", "--abort"]);
            tracing::warn!(task = task_id, "merge conflict; aborted");
            return Ok(IntegrateOutcome::Conflict {
                details: format!("{stdout}\n{stderr}").trim().to_string(),
            });
        }

        Err(GitError::Exit {
            command: "merge".into(),
            code: output.status.code().unwrap_or(-1),
            stderr: stderr.trim().to_string(),
        })
    }

    /// Remove the worktree and delete the branch after a successful
    /// merge. Idempotent.
    pub fn finalize(&self, task_id: &str) -> Result<(), GitError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.remove_worktree_and_branch(task_id, false)
    }

    /// Force-remove an orphaned worktree and branch during `reset`.
    pub fn cleanup(&self, task_id: &str) -> Result<(), GitError> {
        let _lock = self.git_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.remove_worktree_and_branch(task_id, true)
    }

    fn remove_worktree_and_branch(&self, task_id: &str, force: bool) -> Result<(), GitError> {
        let path = self.layout.worktree_dir(task_id);
        let path_str = path.to_string_lossy().to_string();

        if self.worktree_registered(&path)? {
            let result = self.run(&self.repo_root, &["worktree", "remove", "--force", &path_str]);
            match result {
                Ok(_) => {}
                Err(GitError::Exit { ref stderr, .. })
                    if stderr.contains("is not a working tree") => {}
                Err(e) if force => {
                    tracing::warn!(task = task_id, error = %e, "forcing worktree removal");
                    let _ = std::fs::remove_dir_all(&path);
                }
                Err(e) => return Err(e),
            }
        } else if path.exists() {
            // Directory exists but git forgot about it.
            let _ = std::fs::remove_dir_all(&path);
        }
        let _ = self.run(&self.repo_root, &["worktree", "prune"]);

        let branch = Self::branch_name(task_id);
        if self.branch_exists(&branch)? {
            match self.run(&self.repo_root, &["branch", "-D", &branch]) {
                Ok(_) => {}
                Err(GitError::Exit { ref stderr, .. }) if stderr.contains("not found") => {}
                Err(e) if force => {
                    tracing::warn!(task = task_id, error = %e, "branch delete failed during cleanup");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use governator_test_utils::ScratchRepo;

    fn gateway(repo: &ScratchRepo) -> GitGateway {
        let layout = Layout::new(repo.path());
        layout.ensure_tree().unwrap();
        // The layout tree must not pollute the base branch status checks.
        governator_test_utils::git(repo.path(), &["add", "."]);
        governator_test_utils::git(repo.path(), &["commit", "-m", "layout"]);
        GitGateway::new(layout, "main").unwrap()
    }

    #[test]
    fn new_rejects_non_repo() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        assert!(matches!(
            GitGateway::new(layout, "main"),
            Err(GitError::NotARepo(_))
        ));
    }

    #[test]
    fn branch_name_uses_prefix() {
        assert_eq!(GitGateway::branch_name("010-api"), "governator/010-api");
    }

    #[test]
    fn prepare_creates_branch_and_worktree() {
        let repo = ScratchRepo::new();
        let gw = gateway(&repo);

        let path = gw.prepare("001-a").unwrap();
        assert!(path.exists());
        assert!(path.join("README.md").exists());
        assert!(gw.branch_exists("governator/001-a").unwrap());
    }

    #[test]
    fn prepare_is_idempotent() {
        let repo = ScratchRepo::new();
        let gw = gateway(&repo);

        let first = gw.prepare("001-a").unwrap();
        let second = gw.prepare("001-a").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn commit_check_sees_dirt_and_commits() {
        let repo = ScratchRepo::new();
        let gw = gateway(&repo);

        let wt = gw.prepare("001-a").unwrap();
        let check = gw.commit_check("001-a").unwrap();
        assert!(!check.dirty);
        assert!(check.commits.is_empty());

        std::fs::write(wt.join("new.txt"), "x\n").unwrap();
        let check = gw.commit_check("001-a").unwrap();
        assert!(check.dirty);
        assert_eq!(check.modified, vec![PathBuf::from("new.txt")]);

        gw.commit_all("001-a", "task 001-a work").unwrap();
        let check = gw.commit_check("001-a").unwrap();
        assert!(!check.dirty);
        assert_eq!(check.commits.len(), 1);
    }

    #[test]
    fn commit_all_on_clean_tree_is_noop() {
        let repo = ScratchRepo::new();
        let gw = gateway(&repo);
        gw.prepare("001-a").unwrap();
        assert!(!gw.commit_all("001-a", "nothing").unwrap());
    }

    #[test]
    fn integrate_merges_and_finalize_cleans_up() {
        let repo = ScratchRepo::new();
        let gw = gateway(&repo);

        let wt = gw.prepare("001-a").unwrap();
        std::fs::write(wt.join("feature.txt"), "feature\n").unwrap();
        gw.commit_all("001-a", "add feature").unwrap();

        let outcome = gw.integrate("001-a").unwrap();
        assert_eq!(outcome, IntegrateOutcome::Merged);
        assert!(repo.path().join("feature.txt").exists());

        gw.finalize("001-a").unwrap();
        assert!(!wt.exists());
        assert!(!gw.branch_exists("governator/001-a").unwrap());
        // Finalize again: no-op.
        gw.finalize("001-a").unwrap();
    }

    #[test]
    fn integrate_conflict_aborts_and_keeps_worktree() {
        let repo = ScratchRepo::new();
        let gw = gateway(&repo);

        let wt = gw.prepare("001-a").unwrap();
        std::fs::write(wt.join("README.md"), "# task version\n").unwrap();
        gw.commit_all("001-a", "edit readme in task").unwrap();

        // Conflicting edit on the base branch.
        repo.commit_file("README.md", "# base version\n", "edit readme on base");

        let outcome = gw.integrate("001-a").unwrap();
        match outcome {
            IntegrateOutcome::Conflict { details } => {
                assert!(details.contains("CONFLICT"), "details: {details}");
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        // Merge aborted: base branch clean, worktree intact.
        let status = std::process::Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(repo.path())
            .output()
            .unwrap();
        assert!(String::from_utf8_lossy(&status.stdout).trim().is_empty());
        assert!(wt.exists());
    }

    #[test]
    fn integrate_refuses_dirty_base() {
        let repo = ScratchRepo::new();
        let gw = gateway(&repo);

        let wt = gw.prepare("001-a").unwrap();
        std::fs::write(wt.join("feature.txt"), "x\n").unwrap();
        gw.commit_all("001-a", "work").unwrap();

        // Dirty the base working copy.
        std::fs::write(repo.path().join("README.md"), "# dirty\n").unwrap();

        assert!(matches!(
            gw.integrate("001-a"),
            Err(GitError::Dirty { .. })
        ));
    }

    #[test]
    fn integrate_missing_branch_is_typed() {
        let repo = ScratchRepo::new();
        let gw = gateway(&repo);
        assert!(matches!(
            gw.integrate("no-such-task"),
            Err(GitError::Missing(_))
        ));
    }

    #[test]
    fn cleanup_handles_externally_deleted_worktree() {
        let repo = ScratchRepo::new();
        let gw = gateway(&repo);

        let wt = gw.prepare("001-a").unwrap();
        std::fs::remove_dir_all(&wt).unwrap();

        gw.cleanup("001-a").unwrap();
        assert!(!gw.branch_exists("governator/001-a").unwrap());
    }
}
