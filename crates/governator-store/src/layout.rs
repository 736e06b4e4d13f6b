//! Canonical directory tree under `_governator/`.
//!
//! Two namespaces: `_durable-state`, `docs`, `tasks`, templates and
//! overrides are tracked in git; `_local-state` is gitignored and holds
//! the index, supervisor state, lock, and per-task worker dirs.

use std::path::{Path, PathBuf};

use crate::StoreError;

/// Root directory name at the repository top level.
pub const GOVERNATOR_DIR: &str = "_governator";

/// Resolves every persisted path from the repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.root
    }

    pub fn governator_dir(&self) -> PathBuf {
        self.root.join(GOVERNATOR_DIR)
    }

    /// True once `init` has run here.
    pub fn is_initialized(&self) -> bool {
        self.config_path().exists()
    }

    // -- durable namespace (tracked) --

    pub fn durable_dir(&self) -> PathBuf {
        self.governator_dir().join("_durable-state")
    }

    pub fn config_path(&self) -> PathBuf {
        self.durable_dir().join("config.json")
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.durable_dir().join("migrations")
    }

    pub fn migration_ledger_path(&self) -> PathBuf {
        self.migrations_dir().join("ledger.json")
    }

    pub fn docs_dir(&self) -> PathBuf {
        self.governator_dir().join("docs")
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.governator_dir().join("tasks")
    }

    pub fn planning_spec_path(&self) -> PathBuf {
        self.governator_dir().join("planning.json")
    }

    /// Operator-authored intent document. Never mutated by the system.
    pub fn intent_path(&self) -> PathBuf {
        self.governator_dir().join("intent.md")
    }

    pub fn worker_contract_path(&self) -> PathBuf {
        self.governator_dir().join("worker-contract.md")
    }

    pub fn roles_dir(&self) -> PathBuf {
        self.governator_dir().join("roles")
    }

    pub fn role_path(&self, role: &str) -> PathBuf {
        self.roles_dir().join(format!("{role}.md"))
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.governator_dir().join("prompts")
    }

    pub fn global_prompt_path(&self) -> PathBuf {
        self.prompts_dir().join("global.md")
    }

    pub fn role_prompt_path(&self, role: &str) -> PathBuf {
        self.prompts_dir().join(format!("{role}.md"))
    }

    pub fn reasoning_dir(&self) -> PathBuf {
        self.governator_dir().join("reasoning")
    }

    pub fn reasoning_path(&self, effort: &str) -> PathBuf {
        self.reasoning_dir().join(format!("{effort}.md"))
    }

    // -- local namespace (gitignored) --

    pub fn local_dir(&self) -> PathBuf {
        self.governator_dir().join("_local-state")
    }

    pub fn index_path(&self) -> PathBuf {
        self.local_dir().join("index.json")
    }

    pub fn supervisor_dir(&self) -> PathBuf {
        self.local_dir().join("supervisor")
    }

    pub fn supervisor_state_path(&self) -> PathBuf {
        self.supervisor_dir().join("state.json")
    }

    pub fn supervisor_log_path(&self) -> PathBuf {
        self.supervisor_dir().join("supervisor.log")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.supervisor_dir().join("supervisor.lock")
    }

    /// Presence requests graceful shutdown; content names the options.
    pub fn stop_request_path(&self) -> PathBuf {
        self.supervisor_dir().join("stop")
    }

    pub fn proposals_dir(&self) -> PathBuf {
        self.local_dir().join("proposals")
    }

    /// Per-task local area: worktree plus per-attempt worker state.
    pub fn task_local_dir(&self, task_id: &str) -> PathBuf {
        self.local_dir().join(format!("task-{task_id}"))
    }

    pub fn worktree_dir(&self, task_id: &str) -> PathBuf {
        self.task_local_dir(task_id).join("worktree")
    }

    pub fn attempt_dir(&self, task_id: &str, attempt: u32) -> PathBuf {
        self.task_local_dir(task_id)
            .join(format!("attempt-{attempt}"))
    }

    /// Create the directory tree and the local-state gitignore.
    ///
    /// Idempotent; only creates what is missing.
    pub fn ensure_tree(&self) -> Result<(), StoreError> {
        for dir in [
            self.durable_dir(),
            self.migrations_dir(),
            self.docs_dir(),
            self.tasks_dir(),
            self.roles_dir(),
            self.prompts_dir(),
            self.reasoning_dir(),
            self.local_dir(),
            self.supervisor_dir(),
            self.proposals_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }

        let gitignore = self.governator_dir().join(".gitignore");
        if !gitignore.exists() {
            std::fs::write(&gitignore, "_local-state/\n")
                .map_err(|e| StoreError::io(&gitignore, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_anchored_at_repo_root() {
        let layout = Layout::new("/repo");
        assert_eq!(
            layout.index_path(),
            PathBuf::from("/repo/_governator/_local-state/index.json")
        );
        assert_eq!(
            layout.config_path(),
            PathBuf::from("/repo/_governator/_durable-state/config.json")
        );
        assert_eq!(
            layout.lock_path(),
            PathBuf::from("/repo/_governator/_local-state/supervisor/supervisor.lock")
        );
        assert_eq!(
            layout.worktree_dir("010-api"),
            PathBuf::from("/repo/_governator/_local-state/task-010-api/worktree")
        );
        assert_eq!(
            layout.attempt_dir("010-api", 3),
            PathBuf::from("/repo/_governator/_local-state/task-010-api/attempt-3")
        );
    }

    #[test]
    fn ensure_tree_creates_everything_and_gitignore() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        layout.ensure_tree().unwrap();

        assert!(layout.tasks_dir().is_dir());
        assert!(layout.docs_dir().is_dir());
        assert!(layout.supervisor_dir().is_dir());
        assert!(layout.proposals_dir().is_dir());

        let gitignore =
            std::fs::read_to_string(layout.governator_dir().join(".gitignore")).unwrap();
        assert!(gitignore.contains("_local-state/"));

        // Idempotent.
        layout.ensure_tree().unwrap();
    }

    #[test]
    fn is_initialized_tracks_config_presence() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = Layout::new(tmp.path());
        assert!(!layout.is_initialized());
        layout.ensure_tree().unwrap();
        std::fs::write(layout.config_path(), "{}").unwrap();
        assert!(layout.is_initialized());
    }
}
