//! `governator init`: create the layout, seed config and planning spec,
//! run migrations, and make the initial commit.

use anyhow::{Context, Result};

use governator_core::git::is_git_worktree;
use governator_core::planning::PlanningSpec;
use governator_store::config::Config;
use governator_store::layout::Layout;
use governator_store::migrate;

const INTENT_PLACEHOLDER: &str = "\
# Intent

Describe what you want built: the problem, the constraints, and what
done looks like. The planning pipeline reads this document; it is never
modified by the system.
";

pub struct InitOptions {
    pub agent: Option<String>,
    pub concurrency: Option<u32>,
    pub reasoning_effort: Option<String>,
    pub branch: Option<String>,
    pub timeout: Option<u64>,
}

pub fn run(options: InitOptions) -> Result<()> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    if !is_git_worktree(&cwd) {
        anyhow::bail!("not a git worktree: {} -- run `git init` first", cwd.display());
    }
    let layout = crate::repo_layout()?;

    if layout.is_initialized() {
        anyhow::bail!(
            "already initialized at {}",
            layout.governator_dir().display()
        );
    }

    let mut config = Config::default();
    if let Some(agent) = options.agent {
        config.agent = agent
            .parse()
            .map_err(|e: String| anyhow::anyhow!("--agent: {e}"))?;
    }
    if let Some(concurrency) = options.concurrency {
        if concurrency == 0 {
            anyhow::bail!("--concurrency must be >= 1");
        }
        config.concurrency = concurrency;
    }
    if let Some(effort) = options.reasoning_effort {
        config.reasoning_effort = effort
            .parse()
            .map_err(|e: String| anyhow::anyhow!("--reasoning-effort: {e}"))?;
    }
    if let Some(branch) = options.branch {
        config.base_branch = branch;
    }
    if let Some(timeout) = options.timeout {
        if timeout == 0 {
            anyhow::bail!("--timeout must be >= 1");
        }
        config.worker_timeout_s = timeout;
    }

    layout.ensure_tree().context("failed to create layout")?;
    config
        .save(&layout.config_path())
        .context("failed to write config")?;
    PlanningSpec::default_spec()
        .save(&layout)
        .context("failed to write planning spec")?;
    if !layout.intent_path().exists() {
        std::fs::write(layout.intent_path(), INTENT_PLACEHOLDER)
            .context("failed to write intent placeholder")?;
    }

    let applied = migrate::apply_pending(&layout)?;
    for id in &applied {
        println!("migration applied: {id}");
    }

    initial_commit(&layout)?;

    println!("init ok");
    println!("  agent={}", config.agent);
    println!("  concurrency={}", config.concurrency);
    println!("  base_branch={}", config.base_branch);
    println!("  edit {} and run `governator start`", layout.intent_path().display());
    Ok(())
}

fn initial_commit(layout: &Layout) -> Result<()> {
    let root = layout.repo_root();
    let run = |args: &[&str]| -> Result<std::process::Output> {
        std::process::Command::new("git")
            .args(args)
            .current_dir(root)
            .output()
            .context("failed to run git")
    };

    let add = run(&["add", "_governator"])?;
    if !add.status.success() {
        anyhow::bail!(
            "git add failed: {}",
            String::from_utf8_lossy(&add.stderr).trim()
        );
    }
    let commit = run(&["commit", "-m", "Governator initialized"])?;
    if !commit.status.success() {
        anyhow::bail!(
            "initial commit failed: {}",
            String::from_utf8_lossy(&commit.stderr).trim()
        );
    }
    Ok(())
}
