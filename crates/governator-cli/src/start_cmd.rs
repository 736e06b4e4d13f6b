//! `governator start` and the hidden `supervise` entry point.
//!
//! `start` detaches a child running `governator supervise` with
//! stdout/stderr redirected into the supervisor log, then returns
//! immediately. The child's lifecycle is governed by the lock file, not
//! the parent-child relationship.

use std::sync::Arc;

use anyhow::{Context, Result};

use governator_core::agent::{self, AgentCli};
use governator_core::supervisor::Supervisor;
use governator_store::config::Config;
use governator_store::lock::LockManager;

pub const LOCK_NAME: &str = "supervisor.lock";

pub fn run_start() -> Result<()> {
    let layout = crate::initialized_layout()?;

    let locks = LockManager::new(layout.supervisor_dir());
    if locks.held(LOCK_NAME) {
        let pid = locks.holder(LOCK_NAME).unwrap_or(0);
        anyhow::bail!("already running (pid {pid})");
    }

    // Stale stop requests must not kill the fresh supervisor.
    let _ = std::fs::remove_file(layout.stop_request_path());

    let exe = std::env::current_exe().context("cannot locate own executable")?;
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(layout.supervisor_log_path())
        .context("failed to open supervisor log")?;
    let log_err = log.try_clone().context("failed to clone log handle")?;

    let mut cmd = std::process::Command::new(exe);
    cmd.arg("supervise")
        .current_dir(layout.repo_root())
        .stdin(std::process::Stdio::null())
        .stdout(log)
        .stderr(log_err);
    // Detach from our process group so the supervisor survives the
    // parent's terminal.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let child = cmd.spawn().context("failed to spawn supervisor")?;
    println!("supervisor started (pid {})", child.id());
    println!("  log: {}", layout.supervisor_log_path().display());
    Ok(())
}

/// Foreground supervisor entry point, run by the detached child.
pub async fn run_supervise() -> Result<()> {
    let layout = crate::initialized_layout()?;

    // Everything the supervisor prints belongs in the supervisor log;
    // stdout is already redirected there by `start`.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(false)
        .init();

    let config = Config::load(&layout.config_path()).context("failed to load config")?;

    let locks = LockManager::new(layout.supervisor_dir());
    let lease = locks
        .acquire(LOCK_NAME)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let agent = resolve_agent(&config);
    let mut supervisor = Supervisor::new(layout, config, agent)?;
    if let Ok(ms) = std::env::var("GOVERNATOR_TICK_MS") {
        if let Ok(ms) = ms.parse::<u64>() {
            supervisor = supervisor.with_tick(std::time::Duration::from_millis(ms.max(10)));
        }
    }
    supervisor.run(lease).await
}

/// The configured agent CLI, honoring a `GOVERNATOR_AGENT_BIN` override
/// for non-PATH installs and test stubs.
fn resolve_agent(config: &Config) -> Arc<dyn AgentCli> {
    match std::env::var("GOVERNATOR_AGENT_BIN") {
        Ok(binary) if !binary.is_empty() => {
            Arc::from(agent::for_kind_with_binary(config.agent, binary))
        }
        _ => Arc::from(agent::for_kind(config.agent)),
    }
}
