//! Read-only derivations over the task index for external display.
//!
//! Pure functions over a loaded snapshot; no locks, no I/O. Readers get
//! consistency from the index's rename-on-save discipline.

use governator_store::models::{Index, TaskState};

/// Aggregate counts for the `status` header line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub backlog: usize,
    pub in_progress: usize,
    pub merged: usize,
    pub blocked: usize,
    pub failed: usize,
    pub obsolete: usize,
    pub total: usize,
}

impl Counts {
    pub fn summary_line(&self) -> String {
        format!(
            "backlog={} merged={} in-progress={} blocked={} failed={}",
            self.backlog, self.merged, self.in_progress, self.blocked, self.failed
        )
    }
}

pub fn counts(index: &Index) -> Counts {
    let mut counts = Counts::default();
    for task in &index.tasks {
        counts.total += 1;
        // A dispatched task is in progress whatever its resting state.
        if task.pid != 0 {
            counts.in_progress += 1;
            continue;
        }
        match task.state {
            TaskState::Backlog | TaskState::Triaged => counts.backlog += 1,
            TaskState::Worked
            | TaskState::Tested
            | TaskState::Reviewed
            | TaskState::Mergeable
            | TaskState::Conflict
            | TaskState::Resolved => counts.in_progress += 1,
            TaskState::Merged => counts.merged += 1,
            TaskState::Blocked => counts.blocked += 1,
            TaskState::Failed => counts.failed += 1,
            TaskState::Obsolete => counts.obsolete += 1,
        }
    }
    counts
}

/// One task as the `status` table shows it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub id: String,
    pub title: String,
    pub state: TaskState,
    pub role: String,
    pub pid: u32,
    pub attempts_total: u32,
    pub attempts_failed: u32,
    pub blocked_reason: String,
}

/// Display rank: tasks furthest along the pipeline first, terminal
/// states last.
fn display_rank(state: TaskState) -> u8 {
    match state {
        TaskState::Conflict => 0,
        TaskState::Resolved => 1,
        TaskState::Mergeable => 2,
        TaskState::Reviewed => 3,
        TaskState::Tested => 4,
        TaskState::Worked => 5,
        TaskState::Triaged => 6,
        TaskState::Backlog => 7,
        TaskState::Blocked => 8,
        TaskState::Failed => 9,
        TaskState::Merged => 10,
        TaskState::Obsolete => 11,
    }
}

/// Per-task rows sorted by lifecycle stage, then order, then id.
pub fn rows(index: &Index) -> Vec<TaskRow> {
    let mut tasks: Vec<&governator_store::models::Task> = index.tasks.iter().collect();
    tasks.sort_by(|a, b| {
        display_rank(a.state)
            .cmp(&display_rank(b.state))
            .then(a.order.cmp(&b.order))
            .then(a.id.cmp(&b.id))
    });
    tasks
        .into_iter()
        .map(|t| TaskRow {
            id: t.id.clone(),
            title: t.title.clone(),
            state: t.state,
            role: t.role.clone(),
            pid: t.pid,
            attempts_total: t.attempts.total,
            attempts_failed: t.attempts.failed,
            blocked_reason: t.blocked_reason.clone(),
        })
        .collect()
}

/// One task in the DAG view: forward edges plus the reversed edge set.
#[derive(Debug, Clone, PartialEq)]
pub struct DagRow {
    pub id: String,
    pub state: TaskState,
    pub depends_on: Vec<String>,
    pub blocks: Vec<String>,
}

/// DAG view sorted by id, with "blocks" derived by reversing the
/// dependency edges.
pub fn dag_view(index: &Index) -> Vec<DagRow> {
    let mut rows: Vec<DagRow> = index
        .tasks
        .iter()
        .map(|t| DagRow {
            id: t.id.clone(),
            state: t.state,
            depends_on: t.dependencies.clone(),
            blocks: Vec::new(),
        })
        .collect();

    for task in &index.tasks {
        for dep in &task.dependencies {
            if let Some(row) = rows.iter_mut().find(|r| &r.id == dep) {
                row.blocks.push(task.id.clone());
            }
        }
    }

    rows.sort_by(|a, b| a.id.cmp(&b.id));
    for row in &mut rows {
        row.blocks.sort();
    }
    rows
}

/// Ids of tasks that `why` should surface: blocked or failed.
pub fn troubled_task_ids(index: &Index) -> Vec<String> {
    index
        .tasks
        .iter()
        .filter(|t| matches!(t.state, TaskState::Blocked | TaskState::Failed))
        .map(|t| t.id.clone())
        .collect()
}
