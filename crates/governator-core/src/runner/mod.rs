//! Worker runner: drives one opaque worker subprocess from spawn to a
//! classified outcome.
//!
//! The runner assembles the prompt stack, spawns the configured agent
//! CLI with a deterministic environment, pipes stdout/stderr into the
//! attempt directory, enforces the per-worker timeout (TERM, grace,
//! KILL), then reads the optional `exit.json` and inspects the task
//! file for appended outcome sections. Classification of the result
//! into a lifecycle outcome lives here too, so the supervisor never
//! parses worker output itself.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::process::Child;

use governator_store::config::ReasoningEffort;
use governator_store::layout::Layout;
use governator_store::models::Stage;

use crate::agent::{AgentCli, LaunchSpec};
use crate::prompt;
use crate::templates::TemplateSet;

/// Grace period between TERM and KILL on timeout.
const KILL_GRACE: Duration = Duration::from_secs(10);

/// Markers workers append to the task file.
pub const CHANGE_SUMMARY: &str = "## Change Summary";
pub const BLOCKING_REASON: &str = "## Blocking Reason";
pub const WORK_PROPOSAL: &str = "## Additional Work Proposal";

/// One worker dispatch.
#[derive(Debug, Clone)]
pub struct WorkerInvocation {
    /// Task id, or the step id for planning dispatches.
    pub task_id: String,
    pub stage: Stage,
    pub role: String,
    /// Working directory: the task worktree, or the repo root for
    /// in-place planning steps.
    pub workdir: PathBuf,
    /// Task markdown file (absolute). Present for execution stages;
    /// `None` for planning steps, which carry `body` instead.
    pub task_path: Option<PathBuf>,
    /// Prompt body when there is no task file.
    pub body: Option<String>,
    /// Value of `attempts.total` for this dispatch; keys the attempt dir.
    pub attempt: u32,
    pub timeout: Duration,
}

/// Optional structured result a worker may leave in its attempt dir.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExitReport {
    #[serde(default)]
    pub tokens: Option<TokenTotals>,
    #[serde(default)]
    pub duration_s: Option<f64>,
    /// Review-stage verdict.
    #[serde(default)]
    pub approved: Option<bool>,
    #[serde(default)]
    pub outcome: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TokenTotals {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
}

/// Sections this attempt appended to the task file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskSections {
    pub change_summary: bool,
    pub blocking_reason: Option<String>,
    pub proposal: Option<String>,
}

/// Everything observed from one finished worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerReport {
    pub exit_code: i32,
    pub timed_out: bool,
    pub exit_json: Option<ExitReport>,
    pub sections: TaskSections,
}

/// How a worker outcome feeds the lifecycle machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    /// Review stage only: worker completed and voted no.
    Rejected,
    Blocked { reason: String },
    Retryable { reason: String },
}

/// A spawned, not-yet-reaped worker.
pub struct RunningWorker {
    pub invocation: WorkerInvocation,
    pub pid: u32,
    child: Child,
    /// Task-file content at spawn; only text appended beyond this is
    /// attributed to the attempt.
    baseline: String,
    attempt_dir: PathBuf,
}

impl std::fmt::Debug for RunningWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningWorker")
            .field("task_id", &self.invocation.task_id)
            .field("stage", &self.invocation.stage)
            .field("pid", &self.pid)
            .finish()
    }
}

#[derive(Clone)]
pub struct WorkerRunner {
    layout: Layout,
    templates: TemplateSet,
    agent: Arc<dyn AgentCli>,
    effort: ReasoningEffort,
}

impl WorkerRunner {
    pub fn new(
        layout: Layout,
        templates: TemplateSet,
        agent: Arc<dyn AgentCli>,
        effort: ReasoningEffort,
    ) -> Self {
        Self {
            layout,
            templates,
            agent,
            effort,
        }
    }

    /// Spawn a worker for `invocation`. Returns as soon as the process
    /// is running so the caller can record its PID before waiting.
    pub async fn start(&self, invocation: WorkerInvocation) -> Result<RunningWorker> {
        let attempt_dir = self
            .layout
            .attempt_dir(&invocation.task_id, invocation.attempt);
        std::fs::create_dir_all(&attempt_dir)
            .with_context(|| format!("failed to create {}", attempt_dir.display()))?;

        let baseline = match &invocation.task_path {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read task file {}", path.display()))?,
            None => invocation
                .body
                .clone()
                .context("invocation has neither task_path nor body")?,
        };

        let prompt = prompt::assemble(&self.templates, &invocation.role, self.effort, &baseline);

        let task_path_env = invocation
            .task_path
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let env = vec![
            ("GOVERNATOR_TASK_ID".to_string(), invocation.task_id.clone()),
            ("GOVERNATOR_TASK_PATH".to_string(), task_path_env),
            (
                "GOVERNATOR_WORKTREE_DIR".to_string(),
                invocation.workdir.to_string_lossy().to_string(),
            ),
            ("GOVERNATOR_ROLE".to_string(), invocation.role.clone()),
            (
                "GOVERNATOR_STAGE".to_string(),
                invocation.stage.as_str().to_string(),
            ),
            (
                "GOVERNATOR_REASONING_EFFORT".to_string(),
                self.effort.as_str().to_string(),
            ),
            (
                "GOVERNATOR_WORKER_STATE_DIR".to_string(),
                attempt_dir.to_string_lossy().to_string(),
            ),
        ];

        let stdout = std::fs::File::create(attempt_dir.join("stdout.log"))
            .with_context(|| "failed to create stdout.log")?;
        let stderr = std::fs::File::create(attempt_dir.join("stderr.log"))
            .with_context(|| "failed to create stderr.log")?;

        let spec = LaunchSpec {
            prompt,
            workdir: invocation.workdir.clone(),
            env,
        };
        let child = self
            .agent
            .spawn(&spec, Stdio::from(stdout), Stdio::from(stderr))
            .await?;
        let pid = child.id().context("spawned worker has no pid")?;

        tracing::info!(
            task = %invocation.task_id,
            stage = %invocation.stage,
            role = %invocation.role,
            pid,
            "worker started"
        );

        Ok(RunningWorker {
            invocation,
            pid,
            child,
            baseline,
            attempt_dir,
        })
    }

    /// Wait for the worker, enforcing its timeout, then gather the
    /// report. Never errors on worker misbehavior; only on runner-side
    /// I/O problems that prevent observing the outcome.
    pub async fn complete(&self, mut worker: RunningWorker) -> Result<WorkerReport> {
        let timeout = worker.invocation.timeout;
        let (exit_code, timed_out) = match tokio::time::timeout(timeout, worker.child.wait()).await
        {
            Ok(status) => {
                let status = status.context("failed to wait on worker")?;
                (status.code().unwrap_or(-1), false)
            }
            Err(_elapsed) => {
                tracing::warn!(
                    task = %worker.invocation.task_id,
                    pid = worker.pid,
                    "worker timed out; sending TERM"
                );
                terminate(worker.pid);
                match tokio::time::timeout(KILL_GRACE, worker.child.wait()).await {
                    Ok(status) => (status.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1), true),
                    Err(_) => {
                        tracing::warn!(
                            task = %worker.invocation.task_id,
                            pid = worker.pid,
                            "worker ignored TERM; killing"
                        );
                        let _ = worker.child.kill().await;
                        (-1, true)
                    }
                }
            }
        };

        let exit_json = read_exit_json(&worker.attempt_dir.join("exit.json"));

        let sections = match &worker.invocation.task_path {
            Some(path) => {
                let after = std::fs::read_to_string(path).unwrap_or_default();
                inspect_appended(&worker.baseline, &after)
            }
            None => TaskSections::default(),
        };

        tracing::info!(
            task = %worker.invocation.task_id,
            stage = %worker.invocation.stage,
            exit_code,
            timed_out,
            completed = sections.change_summary,
            blocked = sections.blocking_reason.is_some(),
            "worker finished"
        );

        Ok(WorkerReport {
            exit_code,
            timed_out,
            exit_json,
            sections,
        })
    }
}

/// Send SIGTERM. `Child::kill` would skip straight to SIGKILL.
#[cfg(unix)]
fn terminate(pid: u32) {
    // SAFETY: pid belongs to a child we spawned.
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}

fn read_exit_json(path: &std::path::Path) -> Option<ExitReport> {
    let body = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&body) {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed exit.json");
            None
        }
    }
}

/// Parse outcome sections from the text a worker appended this attempt.
///
/// If the worker rewrote earlier content (contract violation) the whole
/// file is scanned instead, so a declared outcome is never lost.
pub fn inspect_appended(baseline: &str, after: &str) -> TaskSections {
    let appended = if after.len() >= baseline.len() && after.starts_with(baseline) {
        &after[baseline.len()..]
    } else {
        after
    };
    parse_sections(appended)
}

fn parse_sections(text: &str) -> TaskSections {
    let mut sections = TaskSections::default();

    let mut current: Option<&str> = None;
    let mut bodies: std::collections::HashMap<&str, String> = std::collections::HashMap::new();

    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed.starts_with(CHANGE_SUMMARY) {
            sections.change_summary = true;
            current = Some(CHANGE_SUMMARY);
        } else if trimmed.starts_with(BLOCKING_REASON) {
            current = Some(BLOCKING_REASON);
        } else if trimmed.starts_with(WORK_PROPOSAL) {
            current = Some(WORK_PROPOSAL);
        } else if trimmed.starts_with("## ") {
            current = None;
        } else if let Some(section) = current {
            let body = bodies.entry(section).or_default();
            body.push_str(line);
            body.push('\n');
        }
    }

    sections.blocking_reason = bodies
        .remove(BLOCKING_REASON)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or(if text.contains(BLOCKING_REASON) {
            Some("blocking reason declared".to_string())
        } else {
            None
        });
    sections.proposal = bodies
        .remove(WORK_PROPOSAL)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    sections
}

/// Classify a report into the lifecycle outcome for its stage.
///
/// Order matters: timeouts and nonzero exits are infrastructure
/// failures regardless of what the worker wrote; a declared blocking
/// reason beats a change summary; review verdicts come from
/// `exit.json` first, the change-summary claim second.
pub fn classify(stage: Stage, report: &WorkerReport) -> OutcomeKind {
    if report.timed_out {
        return OutcomeKind::Retryable {
            reason: "worker timed out".to_string(),
        };
    }
    if report.exit_code != 0 {
        return OutcomeKind::Retryable {
            reason: format!("worker exit code {}", report.exit_code),
        };
    }
    if let Some(reason) = &report.sections.blocking_reason {
        return OutcomeKind::Blocked {
            reason: reason.lines().next().unwrap_or("blocked").to_string(),
        };
    }

    if stage == Stage::Review {
        if let Some(approved) = report.exit_json.as_ref().and_then(|e| e.approved) {
            return if approved {
                OutcomeKind::Success
            } else {
                OutcomeKind::Rejected
            };
        }
    }

    if report.sections.change_summary {
        OutcomeKind::Success
    } else {
        OutcomeKind::Retryable {
            reason: "worker declared no outcome".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use governator_store::config::AgentKind;
    use governator_test_utils::write_script;

    fn runner_with_script(
        root: &std::path::Path,
        script: &std::path::Path,
    ) -> (Layout, WorkerRunner) {
        let layout = Layout::new(root);
        layout.ensure_tree().unwrap();
        let templates = TemplateSet::new(layout.clone());
        let agent: Arc<dyn AgentCli> = Arc::from(crate::agent::for_kind_with_binary(
            AgentKind::Claude,
            script.to_string_lossy(),
        ));
        let runner = WorkerRunner::new(
            layout.clone(),
            templates,
            agent,
            ReasoningEffort::Medium,
        );
        (layout, runner)
    }

    fn invocation(layout: &Layout, task_path: PathBuf) -> WorkerInvocation {
        WorkerInvocation {
            task_id: "001-a".to_string(),
            stage: Stage::Work,
            role: "default".to_string(),
            workdir: layout.repo_root().to_path_buf(),
            task_path: Some(task_path),
            body: None,
            attempt: 1,
            timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn success_path_captures_logs_and_sections() {
        let tmp = tempfile::tempdir().unwrap();
        let script = governator_test_utils::succeeding_worker(tmp.path());
        let (layout, runner) = runner_with_script(tmp.path(), &script);

        let task_path = layout.tasks_dir().join("001-a.md");
        std::fs::write(&task_path, "---\ntask: 001-a\n---\n\nObjective.\n").unwrap();

        let worker = runner.start(invocation(&layout, task_path)).await.unwrap();
        assert!(worker.pid > 0);

        let report = runner.complete(worker).await.unwrap();
        assert_eq!(report.exit_code, 0);
        assert!(!report.timed_out);
        assert!(report.sections.change_summary);
        assert_eq!(classify(Stage::Work, &report), OutcomeKind::Success);

        let attempt_dir = layout.attempt_dir("001-a", 1);
        assert!(attempt_dir.join("stdout.log").exists());
        assert!(attempt_dir.join("stderr.log").exists());
    }

    #[tokio::test]
    async fn blocked_worker_yields_blocked_outcome() {
        let tmp = tempfile::tempdir().unwrap();
        let script = governator_test_utils::blocking_worker(tmp.path());
        let (layout, runner) = runner_with_script(tmp.path(), &script);

        let task_path = layout.tasks_dir().join("001-a.md");
        std::fs::write(&task_path, "---\ntask: 001-a\n---\n\nObjective.\n").unwrap();

        let worker = runner.start(invocation(&layout, task_path)).await.unwrap();
        let report = runner.complete(worker).await.unwrap();

        match classify(Stage::Work, &report) {
            OutcomeKind::Blocked { reason } => assert_eq!(reason, "need credentials"),
            other => panic!("expected Blocked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_is_retryable() {
        let tmp = tempfile::tempdir().unwrap();
        let script = governator_test_utils::failing_worker(tmp.path());
        let (layout, runner) = runner_with_script(tmp.path(), &script);

        let task_path = layout.tasks_dir().join("001-a.md");
        std::fs::write(&task_path, "---\ntask: 001-a\n---\n").unwrap();

        let worker = runner.start(invocation(&layout, task_path)).await.unwrap();
        let report = runner.complete(worker).await.unwrap();
        assert_eq!(report.exit_code, 1);
        assert!(matches!(
            classify(Stage::Work, &report),
            OutcomeKind::Retryable { .. }
        ));
    }

    #[tokio::test]
    async fn timeout_terminates_worker() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(
            tmp.path(),
            "sleepy.sh",
            "#!/bin/sh\ncat > /dev/null\nsleep 600\n",
        );
        let (layout, runner) = runner_with_script(tmp.path(), &script);

        let task_path = layout.tasks_dir().join("001-a.md");
        std::fs::write(&task_path, "---\ntask: 001-a\n---\n").unwrap();

        let mut inv = invocation(&layout, task_path);
        inv.timeout = Duration::from_millis(200);

        let worker = runner.start(inv).await.unwrap();
        let pid = worker.pid;
        let report = runner.complete(worker).await.unwrap();

        assert!(report.timed_out);
        assert!(matches!(
            classify(Stage::Work, &report),
            OutcomeKind::Retryable { .. }
        ));
        assert!(!governator_store::lock::pid_alive(pid));
    }

    #[tokio::test]
    async fn exit_json_review_verdict_wins() {
        let tmp = tempfile::tempdir().unwrap();
        // Reviewer that rejects via exit.json but still appends a summary.
        let script = write_script(
            tmp.path(),
            "reviewer.sh",
            "#!/bin/sh\n\
             cat > /dev/null\n\
             printf '{\"approved\": false, \"tokens\": {\"input\": 10, \"output\": 2}}' > \"$GOVERNATOR_WORKER_STATE_DIR/exit.json\"\n\
             printf '\\n## Change Summary\\n\\nreviewed\\n' >> \"$GOVERNATOR_TASK_PATH\"\n",
        );
        let (layout, runner) = runner_with_script(tmp.path(), &script);

        let task_path = layout.tasks_dir().join("001-a.md");
        std::fs::write(&task_path, "---\ntask: 001-a\n---\n").unwrap();

        let mut inv = invocation(&layout, task_path);
        inv.stage = Stage::Review;
        inv.role = "reviewer".to_string();

        let worker = runner.start(inv).await.unwrap();
        let report = runner.complete(worker).await.unwrap();

        let exit = report.exit_json.as_ref().unwrap();
        assert_eq!(exit.approved, Some(false));
        assert_eq!(exit.tokens.unwrap().input, 10);
        assert_eq!(classify(Stage::Review, &report), OutcomeKind::Rejected);
    }

    #[tokio::test]
    async fn planning_invocation_without_task_file() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(
            tmp.path(),
            "planner.sh",
            "#!/bin/sh\ncat > /dev/null\nmkdir -p _governator/docs\nprintf 'arch' > _governator/docs/architecture.md\n",
        );
        let (layout, runner) = runner_with_script(tmp.path(), &script);

        let inv = WorkerInvocation {
            task_id: "01-architecture".to_string(),
            stage: Stage::PlanStep,
            role: "architect".to_string(),
            workdir: layout.repo_root().to_path_buf(),
            task_path: None,
            body: Some("write the architecture".to_string()),
            attempt: 1,
            timeout: Duration::from_secs(30),
        };

        let worker = runner.start(inv).await.unwrap();
        let report = runner.complete(worker).await.unwrap();
        assert_eq!(report.exit_code, 0);
        assert_eq!(report.sections, TaskSections::default());
        assert!(layout.docs_dir().join("architecture.md").exists());
    }

    // -- pure parsing/classification ----------------------------------------

    #[test]
    fn inspect_appended_only_sees_new_text() {
        let baseline = "---\ntask: 001\n---\n\n## Change Summary\n\nfrom last attempt\n";
        let after = format!("{baseline}\n## Blocking Reason\n\nstuck on schema\n");
        let sections = inspect_appended(baseline, &after);
        assert!(!sections.change_summary);
        assert_eq!(sections.blocking_reason.as_deref(), Some("stuck on schema"));
    }

    #[test]
    fn inspect_rewritten_file_scans_everything() {
        let baseline = "original body\n";
        let after = "rewritten\n\n## Change Summary\n\nnew\n";
        let sections = inspect_appended(baseline, after);
        assert!(sections.change_summary);
    }

    #[test]
    fn proposal_body_is_extracted() {
        let sections = parse_sections(
            "## Change Summary\n\ndone\n\n## Additional Work Proposal\n\nsplit the API module\n",
        );
        assert!(sections.change_summary);
        assert_eq!(sections.proposal.as_deref(), Some("split the API module"));
    }

    #[test]
    fn blocking_reason_beats_change_summary() {
        let report = WorkerReport {
            exit_code: 0,
            timed_out: false,
            exit_json: None,
            sections: TaskSections {
                change_summary: true,
                blocking_reason: Some("waiting on operator".to_string()),
                proposal: None,
            },
        };
        assert!(matches!(
            classify(Stage::Work, &report),
            OutcomeKind::Blocked { .. }
        ));
    }

    #[test]
    fn review_without_exit_json_uses_summary_claim() {
        let report = WorkerReport {
            exit_code: 0,
            timed_out: false,
            exit_json: None,
            sections: TaskSections {
                change_summary: true,
                ..Default::default()
            },
        };
        assert_eq!(classify(Stage::Review, &report), OutcomeKind::Success);

        let silent = WorkerReport::default();
        assert!(matches!(
            classify(Stage::Review, &silent),
            OutcomeKind::Retryable { .. }
        ));
    }
}
