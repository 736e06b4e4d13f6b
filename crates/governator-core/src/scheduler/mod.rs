//! Dispatch scheduler.
//!
//! A pure function from (index, caps, in-flight set) to an ordered list
//! of decisions. The policy order is a contract:
//!
//! 1. Stage bias: tasks closer to completion dispatch first
//!    (`conflict`/`resolved`, then `tested`, then `worked`, then
//!    `triaged`).
//! 2. Dependency gate: every dependency must be `merged`.
//! 3. Tie-break: `order` ascending, then id ascending. Deterministic.
//! 4. Caps: global, then per-role (a cap of 0 disables the role).
//! 5. Overlap: a task's overlap keys must be disjoint from every
//!    in-flight task's keys, across all stages.
//!
//! Merge is supervisor-internal and never appears in the decision list.

use std::collections::{BTreeMap, BTreeSet};

use governator_store::config::Config;
use governator_store::models::{Index, Stage, Task, TaskState};

use crate::lifecycle::{dispatch_stage, stage_role};

/// Work currently running, as the scheduler needs to see it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InFlight {
    pub total: u32,
    pub per_role: BTreeMap<String, u32>,
    pub overlap: BTreeSet<String>,
}

impl InFlight {
    /// Derive the in-flight set from the index: every task with a live
    /// dispatch (`pid != 0`) contributes its assigned role and overlap
    /// keys.
    pub fn from_index(index: &Index) -> Self {
        let mut in_flight = Self::default();
        for task in index.tasks.iter().filter(|t| t.pid != 0) {
            in_flight.total += 1;
            if !task.assigned_role.is_empty() {
                *in_flight
                    .per_role
                    .entry(task.assigned_role.clone())
                    .or_insert(0) += 1;
            }
            in_flight.overlap.extend(task.overlap.iter().cloned());
        }
        in_flight
    }

    fn role_count(&self, role: &str) -> u32 {
        self.per_role.get(role).copied().unwrap_or(0)
    }
}

/// One visited candidate with the verdict and its reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub task_id: String,
    pub stage: Stage,
    pub role: String,
    pub selected: bool,
    pub reason: String,
}

/// Stage bias. Lower dispatches first.
fn stage_priority(state: TaskState) -> Option<u8> {
    match state {
        TaskState::Conflict | TaskState::Resolved => Some(0),
        TaskState::Tested => Some(1),
        TaskState::Worked => Some(2),
        TaskState::Triaged => Some(3),
        _ => None,
    }
}

/// Compute the ordered decision list for one tick.
///
/// Deterministic: identical inputs produce a byte-identical list.
pub fn plan(index: &Index, config: &Config, in_flight: &InFlight) -> Vec<Decision> {
    let mut candidates: Vec<&Task> = index
        .tasks
        .iter()
        .filter(|t| t.is_idle())
        .filter(|t| stage_priority(t.state).is_some())
        .collect();
    candidates.sort_by(|a, b| {
        stage_priority(a.state)
            .cmp(&stage_priority(b.state))
            .then(a.order.cmp(&b.order))
            .then(a.id.cmp(&b.id))
    });

    let mut decisions = Vec::with_capacity(candidates.len());
    let mut admitted = InFlight::default();

    for task in candidates {
        let stage = match dispatch_stage(task.state) {
            Some(stage) if stage != Stage::Merge => stage,
            _ => continue,
        };
        let role = stage_role(stage, task);

        let decide = |selected: bool, reason: &str| Decision {
            task_id: task.id.clone(),
            stage,
            role: role.clone(),
            selected,
            reason: reason.to_string(),
        };

        if !index.dependencies_met(task) {
            decisions.push(decide(false, "dependency_gate"));
            continue;
        }

        if in_flight.total + admitted.total >= config.concurrency {
            decisions.push(decide(false, "global_cap"));
            continue;
        }

        let cap = config.role_cap(&role);
        if cap == 0 {
            decisions.push(decide(false, "role_cap_disabled"));
            continue;
        }
        if in_flight.role_count(&role) + admitted.role_count(&role) >= cap {
            decisions.push(decide(false, "role_cap"));
            continue;
        }

        let busy = task
            .overlap
            .iter()
            .any(|key| in_flight.overlap.contains(key) || admitted.overlap.contains(key));
        if busy {
            decisions.push(decide(false, "overlap_conflict"));
            continue;
        }

        admitted.total += 1;
        *admitted.per_role.entry(role.clone()).or_insert(0) += 1;
        admitted.overlap.extend(task.overlap.iter().cloned());
        decisions.push(decide(true, "dispatch"));
    }

    decisions
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
