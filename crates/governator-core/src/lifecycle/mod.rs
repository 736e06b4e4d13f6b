//! Task lifecycle state machine.
//!
//! Pure functions over `Task`: which stage a state dispatches, which
//! role runs that stage, and how a worker outcome (or a supervisor
//! merge) advances the state. The supervisor applies the returned
//! transitions to the index and emits the audit events produced here.
//!
//! Happy path:
//!
//! ```text
//! backlog -> triaged -(work)-> worked -(test)-> tested -(review)->
//! reviewed -> mergeable -> merged
//! ```
//!
//! Branches: any worker stage may yield `blocked`; retryable failures
//! bounce back to the dispatching state until attempts are exhausted
//! (`failed`); review rejection reworks from `triaged`; merge conflicts
//! pass through `conflict -(resolve)-> resolved -(test)-> tested`.

use governator_store::models::{AuditEvent, Stage, Task, TaskState};

use crate::runner::OutcomeKind;

/// Stage to dispatch for a task in `state`, if any.
///
/// Dispatching does not change the state; a task is in flight when its
/// `pid` is nonzero. The state advances only when the outcome lands.
pub fn dispatch_stage(state: TaskState) -> Option<Stage> {
    match state {
        TaskState::Triaged => Some(Stage::Work),
        TaskState::Worked => Some(Stage::Test),
        TaskState::Tested => Some(Stage::Review),
        TaskState::Reviewed => Some(Stage::Merge),
        TaskState::Conflict => Some(Stage::Resolve),
        TaskState::Resolved => Some(Stage::Test),
        _ => None,
    }
}

/// Role that runs `stage` for `task`. Work uses the planner-assigned
/// role; the verification stages use fixed specialist roles.
pub fn stage_role(stage: Stage, task: &Task) -> String {
    match stage {
        Stage::Work => task.role.clone(),
        Stage::Test => "tester".to_string(),
        Stage::Review => "reviewer".to_string(),
        Stage::Resolve => "resolver".to_string(),
        Stage::Merge => "supervisor".to_string(),
        Stage::PlanStep => task.role.clone(),
    }
}

/// Target state on stage success.
fn success_state(stage: Stage) -> TaskState {
    match stage {
        Stage::Work => TaskState::Worked,
        Stage::Test => TaskState::Tested,
        Stage::Review => TaskState::Reviewed,
        Stage::Resolve => TaskState::Resolved,
        // Merge success is handled by `apply_merge_outcome`.
        Stage::Merge | Stage::PlanStep => TaskState::Merged,
    }
}

fn clear_dispatch(task: &mut Task) {
    task.pid = 0;
    task.assigned_role = String::new();
    task.worker_state_dir = String::new();
}

/// Apply a worker outcome for the stage dispatched from `task.state`.
///
/// Exactly one transition is defined for every (state, outcome) pair:
/// success advances, blocked parks, rejection (review only) reworks
/// from `triaged`, and retryable failures either bounce back to the
/// dispatching state or exhaust to `failed`.
pub fn apply_worker_outcome(
    task: &mut Task,
    stage: Stage,
    outcome: &OutcomeKind,
    actor: &str,
) -> AuditEvent {
    let from = task.state;
    clear_dispatch(task);

    let (to, reason) = match outcome {
        OutcomeKind::Success => {
            let to = success_state(stage);
            if from == TaskState::Conflict {
                task.merge_conflict = false;
            }
            task.blocked_reason.clear();
            (to, format!("{stage} succeeded"))
        }
        OutcomeKind::Rejected => {
            // Rework, not failure: the attempt counters stay put.
            (
                TaskState::Triaged,
                "review rejected; returned for rework".to_string(),
            )
        }
        OutcomeKind::Blocked { reason } => {
            task.blocked_reason = reason.clone();
            (TaskState::Blocked, format!("blocked: {reason}"))
        }
        OutcomeKind::Retryable { reason } => {
            task.attempts.failed += 1;
            if task.retries_exhausted() {
                (
                    TaskState::Failed,
                    format!(
                        "{reason} (attempt {}/{}; exhausted)",
                        task.attempts.failed, task.retries.max_attempts
                    ),
                )
            } else {
                (
                    from,
                    format!(
                        "{reason} (attempt {}/{}; will retry)",
                        task.attempts.failed, task.retries.max_attempts
                    ),
                )
            }
        }
    };

    task.state = to;
    AuditEvent::task(&task.id, from, to, actor, reason)
}

/// Record that the supervisor is about to integrate: `reviewed ->
/// mergeable`.
pub fn begin_merge(task: &mut Task) -> AuditEvent {
    let from = task.state;
    task.state = TaskState::Mergeable;
    AuditEvent::task(&task.id, from, TaskState::Mergeable, "supervisor", "merge scheduled")
}

/// Result of the supervisor-side integrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    Conflict { details: String },
    /// A git failure unrelated to conflicts; the merge will be retried.
    Failed { reason: String },
}

/// Apply the integrate result from `mergeable`.
pub fn apply_merge_outcome(task: &mut Task, outcome: &MergeOutcome) -> AuditEvent {
    let from = task.state;
    let (to, reason) = match outcome {
        MergeOutcome::Merged => {
            task.blocked_reason.clear();
            task.merge_conflict = false;
            (TaskState::Merged, "integrated into base branch".to_string())
        }
        MergeOutcome::Conflict { details } => {
            task.merge_conflict = true;
            let first = details.lines().next().unwrap_or("merge conflict");
            (TaskState::Conflict, format!("merge conflict: {first}"))
        }
        MergeOutcome::Failed { reason } => {
            task.attempts.failed += 1;
            if task.retries_exhausted() {
                // Exhausted merge retries are handed to a resolver.
                task.merge_conflict = true;
                (
                    TaskState::Conflict,
                    format!("merge failed: {reason} (exhausted; needs resolution)"),
                )
            } else {
                (TaskState::Reviewed, format!("merge failed: {reason}; will retry"))
            }
        }
    };
    task.state = to;
    AuditEvent::task(&task.id, from, to, "supervisor", reason)
}

/// Crash recovery: a task whose recorded worker PID is no longer alive
/// returns to its dispatching state with a failure counted.
///
/// The state itself never moved while the worker ran, so "returning"
/// means clearing the dispatch bookkeeping; exhaustion still applies.
pub fn recover_stale(task: &mut Task) -> AuditEvent {
    let from = task.state;
    clear_dispatch(task);
    task.attempts.failed += 1;

    let to = if task.retries_exhausted() {
        TaskState::Failed
    } else {
        from
    };
    task.state = to;
    AuditEvent::task(
        &task.id,
        from,
        to,
        "supervisor",
        format!(
            "worker died with supervisor (attempt {}/{})",
            task.attempts.failed, task.retries.max_attempts
        ),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
