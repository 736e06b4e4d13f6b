//! Serial planning pipeline.
//!
//! Planning runs step by step per the planning spec
//! (`_governator/planning.json`). Each step dispatches one worker with
//! the step's role and prompt template, in-place at the repo root
//! (planning workers only write documents under `_governator/`), then
//! verifies the step's required artifacts exist and are non-empty.
//! Planning is complete when, after the final step, at least one task
//! file exists; the final step is retried up to the attempt budget
//! before planning fails.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use governator_store::layout::Layout;
use governator_store::models::Stage;
use governator_store::{StoreError, read_json, write_json_atomic};

use crate::runner::{WorkerInvocation, WorkerRunner};
use crate::templates::TemplateSet;

/// One step of the planning spec. Read-only at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningStep {
    pub id: String,
    pub display_name: String,
    pub role: String,
    /// Template name resolved through [`TemplateSet::planning_template`].
    pub prompt_template: String,
    /// Paths relative to the docs directory that must exist and be
    /// non-empty after the step.
    #[serde(default)]
    pub required_artifacts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningSpec {
    pub steps: Vec<PlanningStep>,
}

impl PlanningSpec {
    /// The spec seeded by `init`: architecture, then task breakdown.
    pub fn default_spec() -> Self {
        Self {
            steps: vec![
                PlanningStep {
                    id: "01-architecture".to_string(),
                    display_name: "Architecture".to_string(),
                    role: "architect".to_string(),
                    prompt_template: "architecture".to_string(),
                    required_artifacts: vec!["architecture.md".to_string()],
                },
                PlanningStep {
                    id: "02-breakdown".to_string(),
                    display_name: "Task breakdown".to_string(),
                    role: "planner".to_string(),
                    prompt_template: "breakdown".to_string(),
                    required_artifacts: Vec::new(),
                },
            ],
        }
    }

    pub fn load(layout: &Layout) -> Result<Self, StoreError> {
        read_json(&layout.planning_spec_path())
    }

    pub fn save(&self, layout: &Layout) -> Result<(), StoreError> {
        write_json_atomic(&layout.planning_spec_path(), self)
    }
}

/// How a planning run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanningOutcome {
    Complete,
    Failed { step_id: String, reason: String },
}

pub struct PlanningPipeline {
    layout: Layout,
    spec: PlanningSpec,
    templates: TemplateSet,
    runner: WorkerRunner,
    max_attempts: u32,
    timeout: Duration,
}

impl PlanningPipeline {
    pub fn new(
        layout: Layout,
        spec: PlanningSpec,
        templates: TemplateSet,
        runner: WorkerRunner,
        max_attempts: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            layout,
            spec,
            templates,
            runner,
            max_attempts: max_attempts.max(1),
            timeout,
        }
    }

    /// Run every step serially. `on_step` is invoked with each step id
    /// as it starts so the caller can persist `current_step_id`.
    pub async fn run<F>(&self, mut on_step: F) -> Result<PlanningOutcome>
    where
        F: FnMut(&str),
    {
        let Some((last, rest)) = self.spec.steps.split_last() else {
            anyhow::bail!("planning spec has no steps");
        };

        for step in rest {
            on_step(&step.id);
            if let Err(reason) = self.run_step(step, 1).await? {
                return Ok(PlanningOutcome::Failed {
                    step_id: step.id.clone(),
                    reason,
                });
            }
        }

        // The final step must yield at least one task file; retry it
        // within the attempt budget before giving up.
        on_step(&last.id);
        let mut last_reason = String::new();
        for attempt in 1..=self.max_attempts {
            match self.run_step(last, attempt).await? {
                Ok(()) if self.any_task_file()? => return Ok(PlanningOutcome::Complete),
                Ok(()) => {
                    last_reason = "planning produced no task files".to_string();
                }
                Err(reason) => last_reason = reason,
            }
            tracing::warn!(
                step = %last.id,
                attempt,
                max_attempts = self.max_attempts,
                reason = %last_reason,
                "final planning step unsatisfied"
            );
        }

        Ok(PlanningOutcome::Failed {
            step_id: last.id.clone(),
            reason: last_reason,
        })
    }

    /// One attempt of one step. `Ok(Err(reason))` is a step failure the
    /// caller decides about; `Err` is a runner-side fault.
    async fn run_step(&self, step: &PlanningStep, attempt: u32) -> Result<Result<(), String>> {
        // Inputs from earlier steps must be present before we spend a
        // worker on this one.
        for prior in self.spec.steps.iter().take_while(|s| s.id != step.id) {
            for artifact in &prior.required_artifacts {
                if !self.artifact_ok(artifact) {
                    return Ok(Err(format!(
                        "input artifact '{artifact}' from step '{}' is missing",
                        prior.id
                    )));
                }
            }
        }

        let Some(body) = self.templates.planning_template(&step.prompt_template) else {
            return Ok(Err(format!(
                "unknown prompt template '{}'",
                step.prompt_template
            )));
        };

        tracing::info!(step = %step.id, role = %step.role, attempt, "planning step dispatch");

        let invocation = WorkerInvocation {
            task_id: step.id.clone(),
            stage: Stage::PlanStep,
            role: step.role.clone(),
            workdir: self.layout.repo_root().to_path_buf(),
            task_path: None,
            body: Some(body),
            attempt,
            timeout: self.timeout,
        };

        let worker = self.runner.start(invocation).await?;
        let report = self.runner.complete(worker).await?;

        // Planning steps declare success through artifacts, not
        // task-file sections.
        if report.timed_out {
            return Ok(Err("planning worker timed out".to_string()));
        }
        if report.exit_code != 0 {
            return Ok(Err(format!(
                "planning worker exit code {}",
                report.exit_code
            )));
        }

        for artifact in &step.required_artifacts {
            if !self.artifact_ok(artifact) {
                return Ok(Err(format!(
                    "required artifact '{artifact}' missing or empty after step"
                )));
            }
        }

        self.commit_artifacts(&step.id);
        Ok(Ok(()))
    }

    /// Commit whatever the step wrote under `_governator/` so the base
    /// branch stays clean for merges. Best-effort: outside a usable git
    /// repo the merge-time cleanliness check is the backstop.
    fn commit_artifacts(&self, step_id: &str) {
        let root = self.layout.repo_root();
        let run = |args: &[&str]| {
            std::process::Command::new("git")
                .args(args)
                .current_dir(root)
                .output()
        };

        let Ok(add) = run(&["add", "_governator"]) else {
            return;
        };
        if !add.status.success() {
            tracing::debug!(step = step_id, "git add of planning artifacts failed");
            return;
        }
        let staged = run(&["diff", "--cached", "--quiet"]);
        if staged.map(|o| o.status.success()).unwrap_or(true) {
            return; // nothing staged
        }
        let message = format!("governator: planning step {step_id}");
        match run(&["commit", "-m", &message]) {
            Ok(out) if out.status.success() => {
                tracing::info!(step = step_id, "committed planning artifacts");
            }
            _ => tracing::warn!(step = step_id, "commit of planning artifacts failed"),
        }
    }

    fn artifact_ok(&self, rel: &str) -> bool {
        let path = self.layout.docs_dir().join(rel);
        std::fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false)
    }

    fn any_task_file(&self) -> Result<bool> {
        let dir = self.layout.tasks_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to list {}", dir.display()));
            }
        };
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "md") {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
