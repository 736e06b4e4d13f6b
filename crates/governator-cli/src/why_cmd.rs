//! `governator why`: recent supervisor log lines plus the latest worker
//! stdout for every blocked or failed task.

use std::path::PathBuf;

use anyhow::Result;

use governator_core::status;
use governator_store::audit::tail_lines;

pub fn run(supervisor_lines: usize, task_lines: usize) -> Result<()> {
    let layout = crate::initialized_layout()?;
    let index = crate::status_cmd::load_index_snapshot(&layout)?;

    println!("== supervisor log (last {supervisor_lines}) ==");
    let lines = tail_lines(&layout.supervisor_log_path(), supervisor_lines);
    if lines.is_empty() {
        println!("(empty)");
    }
    for line in lines {
        println!("{line}");
    }

    for task_id in status::troubled_task_ids(&index) {
        let task = index.get(&task_id).expect("id from this index");
        println!();
        println!(
            "== {} ({}{}) ==",
            task.id,
            task.state,
            if task.blocked_reason.is_empty() {
                String::new()
            } else {
                format!(": {}", task.blocked_reason)
            }
        );
        match latest_stdout(&layout, &task_id) {
            Some(path) => {
                for line in tail_lines(&path, task_lines) {
                    println!("{line}");
                }
            }
            None => println!("(no worker output recorded)"),
        }
    }
    Ok(())
}

/// Stdout log of the highest-numbered attempt for a task.
fn latest_stdout(
    layout: &governator_store::layout::Layout,
    task_id: &str,
) -> Option<PathBuf> {
    let dir = layout.task_local_dir(task_id);
    let mut attempts: Vec<(u32, PathBuf)> = std::fs::read_dir(&dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let n: u32 = name.strip_prefix("attempt-")?.parse().ok()?;
            Some((n, e.path().join("stdout.log")))
        })
        .filter(|(_, p)| p.exists())
        .collect();
    attempts.sort_by_key(|(n, _)| *n);
    attempts.pop().map(|(_, p)| p)
}
