//! Singleton supervisor state record.
//!
//! External queries use this file (plus a PID liveness probe) to tell a
//! running supervisor from a stale one. Updated only by the supervisor.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lock::pid_alive;
use crate::models::Phase;
use crate::{StoreError, read_json, write_json_atomic};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorState {
    pub phase: Phase,
    pub pid: u32,
    #[serde(default)]
    pub current_step_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_transition: DateTime<Utc>,
    pub log_path: String,
    #[serde(default)]
    pub notes: String,
}

impl SupervisorState {
    pub fn starting(pid: u32, log_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            phase: Phase::Planning,
            pid,
            current_step_id: None,
            started_at: now,
            last_transition: now,
            log_path: log_path.into(),
            notes: String::new(),
        }
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.last_transition = Utc::now();
    }

    /// A supervisor is running iff its recorded phase is live and its
    /// PID is alive.
    pub fn is_running(&self) -> bool {
        !matches!(self.phase, Phase::Stopped | Phase::Failed) && pid_alive(self.pid)
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        write_json_atomic(path, self)
    }
}
