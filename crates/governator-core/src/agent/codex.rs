//! Codex CLI adapter: `codex exec` reading the prompt from stdin.

use async_trait::async_trait;

use super::{AgentCli, LaunchSpec};

pub struct CodexCli {
    binary: String,
}

impl CodexCli {
    pub fn new() -> Self {
        Self {
            binary: "codex".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for CodexCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentCli for CodexCli {
    fn name(&self) -> &str {
        "codex"
    }

    fn binary(&self) -> &str {
        &self.binary
    }

    fn args(&self, _spec: &LaunchSpec) -> Vec<String> {
        vec![
            "exec".to_string(),
            "--sandbox".to_string(),
            "workspace-write".to_string(),
            "-".to_string(),
        ]
    }
}
