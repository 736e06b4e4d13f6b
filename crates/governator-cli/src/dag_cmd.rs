//! `governator dag`: the dependency graph with forward and reversed
//! edges.

use anyhow::Result;

use governator_core::status;

pub fn run() -> Result<()> {
    let layout = crate::initialized_layout()?;
    let index = crate::status_cmd::load_index_snapshot(&layout)?;

    let view = status::dag_view(&index);
    if view.is_empty() {
        println!("no tasks");
        return Ok(());
    }

    println!(
        "{:<24} {:<10} {:<40} {}",
        "TASK", "STATE", "DEPENDS ON", "BLOCKS"
    );
    for row in view {
        let depends = if row.depends_on.is_empty() {
            "-".to_string()
        } else {
            row.depends_on.join(", ")
        };
        let blocks = if row.blocks.is_empty() {
            "-".to_string()
        } else {
            row.blocks.join(", ")
        };
        println!(
            "{:<24} {:<10} {:<40} {}",
            row.id,
            row.state.to_string(),
            depends,
            blocks
        );
    }
    Ok(())
}
