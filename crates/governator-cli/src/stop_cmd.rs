//! `governator stop`, `restart`, and `reset`.
//!
//! `stop` drops a stop-request file the supervisor consumes on its next
//! tick; `-w` asks it to TERM active workers too. `reset` forcefully
//! clears the lock and supervisor state, for stale locks and crashed
//! supervisors.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use governator_store::lock::{LockManager, pid_alive};
use governator_store::models::Phase;
use governator_store::supervisor_state::SupervisorState;

use crate::start_cmd::LOCK_NAME;

pub fn run_stop(workers: bool) -> Result<()> {
    let layout = crate::initialized_layout()?;
    let locks = LockManager::new(layout.supervisor_dir());

    if !locks.held(LOCK_NAME) {
        anyhow::bail!("not running");
    }

    std::fs::write(
        layout.stop_request_path(),
        format!("workers={workers}\n"),
    )
    .context("failed to write stop request")?;
    println!("stop requested{}", if workers { " (workers will be signalled)" } else { "" });
    Ok(())
}

pub fn run_restart(workers: bool) -> Result<()> {
    let layout = crate::initialized_layout()?;
    let locks = LockManager::new(layout.supervisor_dir());

    if locks.held(LOCK_NAME) {
        run_stop(workers)?;
        // Wait for the running supervisor to release its lock.
        let deadline = Instant::now() + Duration::from_secs(30);
        while locks.held(LOCK_NAME) {
            if Instant::now() > deadline {
                anyhow::bail!("supervisor did not stop within 30s; try `governator reset`");
            }
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    crate::start_cmd::run_start()
}

pub fn run_reset(workers: bool) -> Result<()> {
    let layout = crate::initialized_layout()?;
    let locks = LockManager::new(layout.supervisor_dir());

    if workers {
        if let Ok(index) = crate::status_cmd::load_index_snapshot(&layout) {
            for task in index.tasks.iter().filter(|t| t.pid != 0) {
                if pid_alive(task.pid) {
                    println!("signalling worker pid {} (task {})", task.pid, task.id);
                    terminate_pid(task.pid);
                }
            }
        }
    }

    locks.remove(LOCK_NAME).context("failed to remove lock")?;
    let _ = std::fs::remove_file(layout.stop_request_path());

    // Leave a consistent "stopped" record behind if one exists.
    if let Ok(mut state) = SupervisorState::load(&layout.supervisor_state_path()) {
        state.set_phase(Phase::Stopped);
        state.pid = 0;
        state.notes = "cleared by reset".to_string();
        let _ = state.save(&layout.supervisor_state_path());
    }

    println!("reset ok");
    Ok(())
}

#[cfg(unix)]
fn terminate_pid(pid: u32) {
    // SAFETY: best-effort signal to a recorded worker pid.
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate_pid(_pid: u32) {}
