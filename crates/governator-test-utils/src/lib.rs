//! Shared test scaffolding: scratch git repositories and stub worker
//! scripts.
//!
//! Tests across the workspace need a real git repository (worktree and
//! merge operations shell out to git) and fake worker binaries with
//! scripted behavior. Both live here so every crate builds them the
//! same way.

use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// A temporary git repository with an initial commit on `main`.
pub struct ScratchRepo {
    /// Held to keep the directory alive.
    pub dir: TempDir,
    pub root: PathBuf,
}

impl ScratchRepo {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let root = dir.path().canonicalize().expect("canonicalize temp dir");

        git(&root, &["init", "-b", "main"]);
        git(&root, &["config", "user.email", "test@governator.dev"]);
        git(&root, &["config", "user.name", "Governator Test"]);
        std::fs::write(root.join("README.md"), "# scratch\n").expect("write README");
        git(&root, &["add", "."]);
        git(&root, &["commit", "-m", "initial commit"]);

        Self { dir, root }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Write a file and commit it on the current branch.
    pub fn commit_file(&self, rel: &str, contents: &str, message: &str) {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, contents).expect("write file");
        git(&self.root, &["add", "."]);
        git(&self.root, &["commit", "-m", message]);
    }

    pub fn current_branch(&self) -> String {
        let out = Command::new("git")
            .args(["branch", "--show-current"])
            .current_dir(&self.root)
            .output()
            .expect("git branch --show-current");
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }
}

impl Default for ScratchRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a git command in `dir`, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("git {} failed to spawn: {e}", args.join(" ")));
    assert!(
        out.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stderr)
    );
}

/// Write an executable shell script and return its path.
///
/// Used as a stand-in for a worker CLI: the script decides its exit
/// code and what it appends to the task file.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
    }
    path
}

/// A stub worker that exits 0 and appends `## Change Summary` to the
/// task file named by `GOVERNATOR_TASK_PATH` (resolved inside the
/// worktree the worker runs in).
pub fn succeeding_worker(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "worker-ok.sh",
        "#!/bin/sh\n\
         printf '\\n## Change Summary\\n\\ndid the thing\\n' >> \"$GOVERNATOR_TASK_PATH\"\n\
         exit 0\n",
    )
}

/// A stub worker that appends `## Blocking Reason` and exits 0.
pub fn blocking_worker(dir: &Path) -> PathBuf {
    write_script(
        dir,
        "worker-blocked.sh",
        "#!/bin/sh\n\
         printf '\\n## Blocking Reason\\n\\nneed credentials\\n' >> \"$GOVERNATOR_TASK_PATH\"\n\
         exit 0\n",
    )
}

/// A stub worker that exits nonzero without touching the task file.
pub fn failing_worker(dir: &Path) -> PathBuf {
    write_script(dir, "worker-fail.sh", "#!/bin/sh\nexit 1\n")
}
