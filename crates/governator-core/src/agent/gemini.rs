//! Gemini CLI adapter. Gemini takes the prompt as an argument, not on
//! stdin.

use async_trait::async_trait;

use super::{AgentCli, LaunchSpec};

pub struct GeminiCli {
    binary: String,
}

impl GeminiCli {
    pub fn new() -> Self {
        Self {
            binary: "gemini".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for GeminiCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentCli for GeminiCli {
    fn name(&self) -> &str {
        "gemini"
    }

    fn binary(&self) -> &str {
        &self.binary
    }

    fn args(&self, spec: &LaunchSpec) -> Vec<String> {
        vec![
            "--approval-mode".to_string(),
            "auto_edit".to_string(),
            "-p".to_string(),
            spec.prompt.clone(),
        ]
    }

    fn prompt_on_stdin(&self) -> bool {
        false
    }
}
