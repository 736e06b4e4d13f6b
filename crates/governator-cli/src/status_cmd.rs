//! `governator status`: counts and per-task rows from the index
//! snapshot. Read-only; tolerates a supervisor updating the index
//! concurrently because saves are rename-atomic.

use anyhow::{Context, Result};

use governator_core::status;
use governator_store::index::IndexStore;
use governator_store::models::Index;
use governator_store::supervisor_state::SupervisorState;

/// Load the index, treating "not yet created" as empty.
pub fn load_index_snapshot(
    layout: &governator_store::layout::Layout,
) -> Result<Index> {
    match IndexStore::new(layout.index_path()).load() {
        Ok(index) => Ok(index),
        Err(e) if e.is_not_found() => Ok(Index::new()),
        Err(e) => Err(e).context("failed to load index"),
    }
}

/// Human description of the supervisor, from its state file + liveness.
pub fn supervisor_line(layout: &governator_store::layout::Layout) -> String {
    match SupervisorState::load(&layout.supervisor_state_path()) {
        Ok(state) if state.is_running() => {
            let step = state
                .current_step_id
                .as_deref()
                .map(|s| format!(" step={s}"))
                .unwrap_or_default();
            format!("supervisor: running pid={} phase={}{step}", state.pid, state.phase)
        }
        Ok(state) => format!("supervisor: not running (last phase={})", state.phase),
        Err(_) => "supervisor: never started".to_string(),
    }
}

pub fn run() -> Result<()> {
    let layout = crate::initialized_layout()?;
    let index = load_index_snapshot(&layout)?;

    println!("{}", supervisor_line(&layout));
    println!("{}", status::counts(&index).summary_line());

    let rows = status::rows(&index);
    if rows.is_empty() {
        return Ok(());
    }

    println!();
    println!(
        "{:<24} {:<10} {:<10} {:>8} {:>9}  {}",
        "TASK", "STATE", "ROLE", "PID", "ATTEMPTS", "NOTE"
    );
    for row in rows {
        let pid = if row.pid == 0 {
            "-".to_string()
        } else {
            row.pid.to_string()
        };
        let note = if row.blocked_reason.is_empty() {
            String::new()
        } else {
            row.blocked_reason.clone()
        };
        println!(
            "{:<24} {:<10} {:<10} {:>8} {:>4}/{:<4}  {}",
            row.id,
            row.state.to_string(),
            row.role,
            pid,
            row.attempts_failed,
            row.attempts_total,
            note
        );
    }
    Ok(())
}
