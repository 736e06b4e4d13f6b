//! Claude Code adapter: `claude -p` with the prompt on stdin.

use async_trait::async_trait;

use super::{AgentCli, LaunchSpec};

pub struct ClaudeCli {
    binary: String,
}

impl ClaudeCli {
    pub fn new() -> Self {
        Self {
            binary: "claude".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for ClaudeCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentCli for ClaudeCli {
    fn name(&self) -> &str {
        "claude"
    }

    fn binary(&self) -> &str {
        &self.binary
    }

    fn args(&self, _spec: &LaunchSpec) -> Vec<String> {
        vec![
            "-p".to_string(),
            "--permission-mode".to_string(),
            "acceptEdits".to_string(),
        ]
    }
}
