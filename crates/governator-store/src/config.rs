//! Repo-level configuration.
//!
//! JSON at `_governator/_durable-state/config.json`, tracked in git.
//! Every field has a default so partial files load; unknown enum values
//! fail decode and surface as config errors.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{StoreError, read_json, write_json_atomic};

/// Which worker CLI to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Codex,
    #[default]
    Claude,
    Gemini,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Codex => "codex",
            AgentKind::Claude => "claude",
            AgentKind::Gemini => "gemini",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "codex" => Ok(AgentKind::Codex),
            "claude" => Ok(AgentKind::Claude),
            "gemini" => Ok(AgentKind::Gemini),
            other => Err(format!("unknown agent '{other}' (expected codex|claude|gemini)")),
        }
    }
}

/// Reasoning-effort guidance level passed to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasoningEffort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            other => Err(format!(
                "unknown reasoning effort '{other}' (expected low|medium|high)"
            )),
        }
    }
}

/// What to do with `## Additional Work Proposal` sections.
///
/// The upstream behavior was ambiguous, so it is a switch: `hold` parks
/// proposals for operator review; `auto-admit` writes them into the
/// tasks directory for the next triage pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProposalPolicy {
    #[default]
    Hold,
    AutoAdmit,
}

/// Durable configuration. Missing keys take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentKind,
    /// Global concurrency cap; must be >= 1.
    pub concurrency: u32,
    /// Per-role caps. 0 disables the role entirely.
    pub role_caps: BTreeMap<String, u32>,
    /// Cap applied to roles absent from `role_caps`.
    pub default_role_cap: u32,
    pub reasoning_effort: ReasoningEffort,
    pub base_branch: String,
    pub worker_timeout_s: u64,
    /// Default `retries.max_attempts` for tasks that do not set one.
    pub max_attempts: u32,
    pub proposal_policy: ProposalPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent: AgentKind::default(),
            concurrency: 4,
            role_caps: BTreeMap::new(),
            default_role_cap: 4,
            reasoning_effort: ReasoningEffort::default(),
            base_branch: "main".to_string(),
            worker_timeout_s: 1800,
            max_attempts: 3,
            proposal_policy: ProposalPolicy::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let config: Config = read_json(path)?;
        config.validate(path)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_json_atomic(path, self)
    }

    /// Effective cap for a role name.
    pub fn role_cap(&self, role: &str) -> u32 {
        self.role_caps
            .get(role)
            .copied()
            .unwrap_or(self.default_role_cap)
    }

    fn validate(&self, path: &Path) -> Result<(), StoreError> {
        if self.concurrency == 0 {
            return Err(StoreError::Decode {
                path: path.to_path_buf(),
                source: serde::de::Error::custom("concurrency must be >= 1"),
            });
        }
        if self.worker_timeout_s == 0 {
            return Err(StoreError::Decode {
                path: path.to_path_buf(),
                source: serde::de::Error::custom("worker_timeout_s must be >= 1"),
            });
        }
        Ok(())
    }
}
