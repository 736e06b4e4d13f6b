//! Core data model: tasks, the task index, lifecycle states, dispatch
//! stages, supervisor phases, and audit events.
//!
//! These types define the on-disk JSON shapes. Field names are stable;
//! format changes go through `migrate`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current index schema version. Version 1 predates the `digests` map.
pub const SCHEMA_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// What produced a task: the planning pipeline itself or the breakdown
/// into executable units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Planning,
    #[default]
    Execution,
}

/// Lifecycle state of a task.
///
/// The happy path is `backlog -> triaged -> worked -> tested -> reviewed
/// -> mergeable -> merged`. Any dispatched stage may branch to `blocked`
/// or `failed`; merging may branch to `conflict`, whose resolution
/// passes through `resolved` and re-enters test. `obsolete` marks tasks
/// whose files disappeared during replanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Backlog,
    Triaged,
    Worked,
    Tested,
    Reviewed,
    Mergeable,
    Merged,
    Blocked,
    Failed,
    Conflict,
    Resolved,
    Obsolete,
}

impl TaskState {
    /// Terminal-success: the only state that satisfies a dependency edge.
    pub fn is_terminal_success(self) -> bool {
        self == TaskState::Merged
    }

    /// States from which no further dispatch will ever occur.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Merged | TaskState::Failed | TaskState::Obsolete
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Backlog => "backlog",
            TaskState::Triaged => "triaged",
            TaskState::Worked => "worked",
            TaskState::Tested => "tested",
            TaskState::Reviewed => "reviewed",
            TaskState::Mergeable => "mergeable",
            TaskState::Merged => "merged",
            TaskState::Blocked => "blocked",
            TaskState::Failed => "failed",
            TaskState::Conflict => "conflict",
            TaskState::Resolved => "resolved",
            TaskState::Obsolete => "obsolete",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch stage: what a worker (or the supervisor, for merge) is asked
/// to do with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Work,
    Test,
    Review,
    Resolve,
    /// Supervisor-internal; never dispatched to a worker.
    Merge,
    PlanStep,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Work => "work",
            Stage::Test => "test",
            Stage::Review => "review",
            Stage::Resolve => "resolve",
            Stage::Merge => "merge",
            Stage::PlanStep => "plan_step",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry policy for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retries {
    pub max_attempts: u32,
}

impl Default for Retries {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Attempt counters. `total` increments on every dispatch; `failed`
/// only on retryable failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Attempts {
    pub total: u32,
    pub failed: u32,
}

/// One unit of work tracked by the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable, unique, sortable id (numeric prefix, e.g. `010-api-schema`).
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub kind: TaskKind,
    /// Repo-relative path of the task markdown file. Immutable.
    pub path: String,
    pub state: TaskState,
    /// Planner-assigned role for the work stage.
    #[serde(default = "default_role")]
    pub role: String,
    /// Role currently dispatched; differs from `role` for test/review/resolve.
    #[serde(default)]
    pub assigned_role: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub overlap: Vec<String>,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub retries: Retries,
    #[serde(default)]
    pub attempts: Attempts,
    /// PID of the currently assigned worker; 0 when idle.
    #[serde(default)]
    pub pid: u32,
    /// Non-empty iff the task is blocked.
    #[serde(default)]
    pub blocked_reason: String,
    #[serde(default)]
    pub merge_conflict: bool,
    /// Transient artifact directory for the current attempt.
    #[serde(default)]
    pub worker_state_dir: String,
    /// Digest of the task file at triage time; used to detect edits.
    #[serde(default)]
    pub file_digest: String,
}

fn default_role() -> String {
    "default".to_string()
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind: TaskKind::Execution,
            path: path.into(),
            state: TaskState::Backlog,
            role: default_role(),
            assigned_role: String::new(),
            dependencies: Vec::new(),
            overlap: Vec::new(),
            order: 0,
            retries: Retries::default(),
            attempts: Attempts::default(),
            pid: 0,
            blocked_reason: String::new(),
            merge_conflict: false,
            worker_state_dir: String::new(),
            file_digest: String::new(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.pid == 0
    }

    /// Attempt budget exhausted?
    pub fn retries_exhausted(&self) -> bool {
        self.attempts.failed >= self.retries.max_attempts
    }
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// The single authoritative task registry.
///
/// Created at `init`, mutated only by the supervisor, persisted by
/// write-then-rename so readers always see a consistent snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    pub schema_version: u32,
    /// Content digests of the intent doc and each architecture doc,
    /// keyed by repo-relative path. Drift = any mismatch.
    #[serde(default)]
    pub digests: BTreeMap<String, String>,
    pub tasks: Vec<Task>,
}

impl Index {
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            digests: BTreeMap::new(),
            tasks: Vec::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// All dependencies of `task` in terminal-success state?
    pub fn dependencies_met(&self, task: &Task) -> bool {
        task.dependencies
            .iter()
            .all(|dep| self.get(dep).is_some_and(|d| d.state.is_terminal_success()))
    }
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Supervisor phase
// ---------------------------------------------------------------------------

/// Top-level phase of the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Triage,
    Execution,
    ReplanQuiesce,
    Stopped,
    Failed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Triage => "triage",
            Phase::Execution => "execution",
            Phase::ReplanQuiesce => "replan_quiesce",
            Phase::Stopped => "stopped",
            Phase::Failed => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// One append-only audit record. `task_id` is empty for supervisor-level
/// events (phase changes, startup, shutdown).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub ts: DateTime<Utc>,
    pub task_id: String,
    pub from_state: String,
    pub to_state: String,
    pub actor: String,
    pub reason: String,
}

impl AuditEvent {
    pub fn task(
        task_id: &str,
        from: TaskState,
        to: TaskState,
        actor: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            ts: Utc::now(),
            task_id: task_id.to_string(),
            from_state: from.as_str().to_string(),
            to_state: to.as_str().to_string(),
            actor: actor.to_string(),
            reason: reason.into(),
        }
    }

    pub fn phase(from: Phase, to: Phase, reason: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            task_id: String::new(),
            from_state: from.as_str().to_string(),
            to_state: to.as_str().to_string(),
            actor: "supervisor".to_string(),
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
