//! Worker CLI adapters.
//!
//! A worker is an opaque subprocess; the only thing governator knows
//! about each supported CLI is how to hand it a prompt and a working
//! directory. One adapter per CLI kind, behind a common trait so the
//! runner does not care which agent is configured.

mod claude;
mod codex;
mod gemini;

pub use claude::ClaudeCli;
pub use codex::CodexCli;
pub use gemini::GeminiCli;

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::{Child, Command};

use governator_store::config::AgentKind;

/// Everything needed to launch one worker invocation.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Fully assembled prompt stack.
    pub prompt: String,
    /// Working directory (the task worktree, or the repo root for
    /// in-place planning steps).
    pub workdir: PathBuf,
    /// Extra environment merged over the inherited one.
    pub env: Vec<(String, String)>,
}

/// Adapter for one worker CLI.
#[async_trait]
pub trait AgentCli: Send + Sync {
    fn name(&self) -> &str;

    /// Executable path or name.
    fn binary(&self) -> &str;

    /// Fixed arguments before prompt delivery.
    fn args(&self, spec: &LaunchSpec) -> Vec<String>;

    /// True when the prompt is written to stdin after spawn; false when
    /// `args` already embedded it.
    fn prompt_on_stdin(&self) -> bool {
        true
    }

    /// Spawn the worker with the given stdio sinks. The prompt is
    /// delivered per `prompt_on_stdin`; stdin is closed afterwards so
    /// the agent starts processing.
    async fn spawn(&self, spec: &LaunchSpec, stdout: Stdio, stderr: Stdio) -> Result<Child> {
        let mut cmd = Command::new(self.binary());
        cmd.args(self.args(spec))
            .current_dir(&spec.workdir)
            .stdout(stdout)
            .stderr(stderr)
            .stdin(if self.prompt_on_stdin() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(false);

        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn worker CLI '{}' -- is it installed and on PATH?",
                self.binary()
            )
        })?;

        if self.prompt_on_stdin() {
            if let Some(mut stdin) = child.stdin.take() {
                use tokio::io::AsyncWriteExt;
                if let Err(e) = stdin.write_all(spec.prompt.as_bytes()).await {
                    // A fast-exiting worker may close stdin first.
                    tracing::warn!(agent = self.name(), error = %e, "failed to write prompt to stdin");
                }
                drop(stdin);
            }
        }

        Ok(child)
    }
}

/// Adapter for the configured agent kind.
pub fn for_kind(kind: AgentKind) -> Box<dyn AgentCli> {
    match kind {
        AgentKind::Codex => Box::new(CodexCli::new()),
        AgentKind::Claude => Box::new(ClaudeCli::new()),
        AgentKind::Gemini => Box::new(GeminiCli::new()),
    }
}

/// Adapter for the configured kind with a binary override. Used by
/// tests (stub scripts) and operators with non-PATH installs via
/// `GOVERNATOR_AGENT_BIN`.
pub fn for_kind_with_binary(kind: AgentKind, binary: impl Into<String>) -> Box<dyn AgentCli> {
    let binary = binary.into();
    match kind {
        AgentKind::Codex => Box::new(CodexCli::with_binary(binary)),
        AgentKind::Claude => Box::new(ClaudeCli::with_binary(binary)),
        AgentKind::Gemini => Box::new(GeminiCli::with_binary(binary)),
    }
}
