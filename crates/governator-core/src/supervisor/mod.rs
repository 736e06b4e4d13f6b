//! The supervisor event loop.
//!
//! One long-lived process owns all index mutations. Each tick it reaps
//! finished workers, applies their outcomes through the lifecycle
//! machine, performs supervisor-internal merges, checks for
//! architecture drift, and asks the scheduler for new dispatches under
//! the concurrency semaphore. All coordination state is on disk; the
//! loop can be killed and restarted at any point.
//!
//! Phase flow: `planning -> triage -> execution`, looping back through
//! `replan_quiesce -> planning` when drift is observed. Graceful
//! shutdown (signal or stop file) drains in-flight workers within a
//! grace period and persists phase `stopped`; unrecoverable errors
//! persist `failed` and keep the lock on disk for inspection.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use governator_store::audit::AuditLog;
use governator_store::config::{Config, ProposalPolicy};
use governator_store::index::IndexStore;
use governator_store::layout::Layout;
use governator_store::lock::{Lease, pid_alive};
use governator_store::models::{Index, Phase, Stage, TaskState};
use governator_store::supervisor_state::SupervisorState;

use crate::agent::AgentCli;
use crate::drift;
use crate::git::{GitError, GitGateway, IntegrateOutcome};
use crate::lifecycle::{
    self, MergeOutcome, apply_merge_outcome, apply_worker_outcome, begin_merge,
};
use crate::planning::{PlanningOutcome, PlanningPipeline, PlanningSpec};
use crate::runner::{OutcomeKind, WorkerInvocation, WorkerReport, WorkerRunner, classify};
use crate::scheduler::{self, InFlight};
use crate::templates::TemplateSet;
use crate::triage;

/// How long shutdown waits for in-flight workers.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// Completion message from a spawned worker watcher.
struct WorkerDone {
    task_id: String,
    stage: Stage,
    attempt: u32,
    result: Result<WorkerReport, String>,
}

/// Why the execution loop returned.
#[derive(Debug, PartialEq, Eq)]
enum ExecutionExit {
    /// Shutdown requested (signal or stop file).
    Shutdown,
    /// Drift observed and the loop has quiesced.
    Drift,
    /// Every task is in a terminal state.
    Complete,
}

pub struct Supervisor {
    layout: Layout,
    config: Config,
    store: IndexStore,
    audit: AuditLog,
    git: GitGateway,
    runner: WorkerRunner,
    state: SupervisorState,
    cancel: CancellationToken,
    tick: Duration,
}

impl Supervisor {
    pub fn new(layout: Layout, config: Config, agent: Arc<dyn AgentCli>) -> Result<Self> {
        let git = GitGateway::new(layout.clone(), config.base_branch.clone())?;
        let templates = TemplateSet::new(layout.clone());
        let runner = WorkerRunner::new(
            layout.clone(),
            templates,
            agent,
            config.reasoning_effort,
        );
        let store = IndexStore::new(layout.index_path());
        let audit = AuditLog::new(layout.supervisor_log_path());
        let state = SupervisorState::starting(
            std::process::id(),
            layout.supervisor_log_path().to_string_lossy(),
        );

        Ok(Self {
            layout,
            config,
            store,
            audit,
            git,
            runner,
            state,
            cancel: CancellationToken::new(),
            tick: Duration::from_secs(1),
        })
    }

    /// Override the tick period (tests).
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Cancellation handle; external shutdown triggers flow through it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn persist_state(&self) -> Result<()> {
        self.state
            .save(&self.layout.supervisor_state_path())
            .context("failed to persist supervisor state")
    }

    fn set_phase(&mut self, phase: Phase, reason: &str) -> Result<()> {
        let from = self.state.phase;
        if from == phase {
            return Ok(());
        }
        self.state.set_phase(phase);
        self.persist_state()?;
        self.audit
            .append(&governator_store::models::AuditEvent::phase(from, phase, reason));
        tracing::info!(from = %from, to = %phase, reason, "phase transition");
        Ok(())
    }

    /// Run the supervisor to completion. The lock lease is held for the
    /// whole run: released on clean exit, forgotten (left on disk) when
    /// the supervisor fails so the operator can inspect.
    pub async fn run(mut self, lease: Lease) -> Result<()> {
        match self.drive().await {
            Ok(()) => {
                drop(lease);
                Ok(())
            }
            Err(e) => {
                self.state.notes = format!("{e:#}");
                self.state.set_phase(Phase::Failed);
                let _ = self.persist_state();
                self.audit.note("supervisor", &format!("fatal: {e:#}"));
                // Keep the lock for inspection; `reset` clears it.
                lease.forget();
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<()> {
        self.audit.note("supervisor", "startup");
        self.spawn_signal_watcher();

        governator_store::migrate::apply_pending(&self.layout)
            .context("failed to apply migrations")?;

        let mut index = self.load_or_bootstrap_index()?;
        self.recover_stale_workers(&mut index)?;

        let mut force_plan = false;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if force_plan || self.needs_planning(&index)? {
                force_plan = false;
                self.set_phase(Phase::Planning, "planning")?;
                self.run_planning().await?;
            }

            // Triage is idempotent: unchanged files retain their state.
            self.set_phase(Phase::Triage, "triaging task files")?;
            let report = triage::triage(&mut index, &self.layout, &self.config)
                .map_err(|e| anyhow::anyhow!("triage failed: {e}"))?;
            index.digests = drift::compute_digests(&self.layout)?;
            self.save_index(&index)?;
            for event in &report.events {
                self.audit.append(event);
            }

            self.set_phase(Phase::Execution, "entering execution")?;
            match self.execution_loop(&mut index).await? {
                ExecutionExit::Shutdown => break,
                ExecutionExit::Complete => {
                    self.audit.note("supervisor", "all tasks terminal");
                    break;
                }
                ExecutionExit::Drift => {
                    // Quiescence already achieved; replan from step 0.
                    self.set_phase(Phase::ReplanQuiesce, "architecture drift observed")?;
                    force_plan = true;
                }
            }
        }

        self.set_phase(Phase::Stopped, "shutdown")?;
        self.audit.note("supervisor", "stopped");
        Ok(())
    }

    // -- startup ------------------------------------------------------------

    fn load_or_bootstrap_index(&self) -> Result<Index> {
        match self.store.load() {
            Ok(index) => Ok(index),
            Err(e) if e.is_not_found() => {
                let index = Index::new();
                self.save_index(&index)?;
                Ok(index)
            }
            Err(e) => Err(e).context("failed to load index"),
        }
    }

    /// Tasks with a recorded PID that is no longer alive died with a
    /// previous supervisor; return them to their dispatching state.
    fn recover_stale_workers(&self, index: &mut Index) -> Result<()> {
        let mut events = Vec::new();
        for task in &mut index.tasks {
            if task.pid != 0 && !pid_alive(task.pid) {
                tracing::warn!(task = %task.id, pid = task.pid, "recovering task from dead worker");
                events.push(lifecycle::recover_stale(task));
            }
        }
        if !events.is_empty() {
            self.save_index(index)?;
            for event in &events {
                self.audit.append(event);
            }
        }
        Ok(())
    }

    fn needs_planning(&self, index: &Index) -> Result<bool> {
        if !index.tasks.is_empty() {
            return Ok(false);
        }
        let dir = self.layout.tasks_dir();
        let has_files = std::fs::read_dir(&dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .any(|e| e.path().extension().is_some_and(|ext| ext == "md"))
            })
            .unwrap_or(false);
        Ok(!has_files)
    }

    async fn run_planning(&mut self) -> Result<()> {
        let spec = match PlanningSpec::load(&self.layout) {
            Ok(spec) => spec,
            Err(e) if e.is_not_found() => PlanningSpec::default_spec(),
            Err(e) => return Err(e).context("failed to load planning spec"),
        };

        let pipeline = PlanningPipeline::new(
            self.layout.clone(),
            spec,
            TemplateSet::new(self.layout.clone()),
            self.runner.clone(),
            self.config.max_attempts,
            Duration::from_secs(self.config.worker_timeout_s),
        );

        let state_path = self.layout.supervisor_state_path();
        let state = &mut self.state;
        let outcome = pipeline
            .run(|step_id| {
                state.current_step_id = Some(step_id.to_string());
                state.last_transition = chrono::Utc::now();
                let _ = state.save(&state_path);
            })
            .await?;
        self.state.current_step_id = None;

        match outcome {
            PlanningOutcome::Complete => {
                self.audit.note("planning", "planning complete");
                Ok(())
            }
            PlanningOutcome::Failed { step_id, reason } => {
                anyhow::bail!("planning step '{step_id}' failed: {reason}")
            }
        }
    }

    // -- execution ----------------------------------------------------------

    async fn execution_loop(&mut self, index: &mut Index) -> Result<ExecutionExit> {
        let (tx, mut rx) = mpsc::channel::<WorkerDone>(64);
        let mut in_flight: usize = 0;
        let mut quiescing = false;
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // (a) Reap completions without blocking.
            while let Ok(done) = rx.try_recv() {
                in_flight -= 1;
                self.apply_worker_done(index, done)?;
            }

            // (b) Shutdown?
            if self.cancel.is_cancelled() {
                return self
                    .shutdown(index, &mut rx, in_flight, self.stop_requested().unwrap_or(false))
                    .await;
            }
            if let Some(term_workers) = self.stop_requested() {
                self.audit.note("supervisor", "stop requested");
                return self.shutdown(index, &mut rx, in_flight, term_workers).await;
            }

            // (c) Drift check; on drift stop dispatching and drain.
            if !quiescing {
                let current = drift::compute_digests(&self.layout)?;
                let report = drift::detect(&index.digests, &current);
                if report.is_drifted() {
                    quiescing = true;
                    self.audit.note(
                        "drift",
                        &format!("drift observed ({}); quiescing", report.describe()),
                    );
                    tracing::info!(detail = %report.describe(), "drift observed; quiescing");
                }
            }
            if quiescing {
                if in_flight == 0 {
                    return Ok(ExecutionExit::Drift);
                }
            } else {
                // (d) Supervisor-internal merges, one per tick.
                self.merge_pass(index)?;

                // (e) Dispatch under caps.
                in_flight += self.dispatch_pass(index, &tx).await?;

                // (f) All settled?
                if in_flight == 0 && index.tasks.iter().all(|t| t.state.is_terminal()) {
                    return Ok(ExecutionExit::Complete);
                }
            }

            // (g) Wait for the next event.
            tokio::select! {
                _ = interval.tick() => {}
                done = rx.recv() => {
                    if let Some(done) = done {
                        in_flight -= 1;
                        self.apply_worker_done(index, done)?;
                    }
                }
                _ = self.cancel.cancelled() => {}
            }
        }
    }

    /// Read and consume a stop request file, returning its
    /// `workers=true|false` flag.
    fn stop_requested(&self) -> Option<bool> {
        let path = self.layout.stop_request_path();
        let body = std::fs::read_to_string(&path).ok()?;
        let _ = std::fs::remove_file(&path);
        Some(body.contains("workers=true"))
    }

    async fn shutdown(
        &mut self,
        index: &mut Index,
        rx: &mut mpsc::Receiver<WorkerDone>,
        mut in_flight: usize,
        term_workers: bool,
    ) -> Result<ExecutionExit> {
        tracing::info!(in_flight, term_workers, "graceful shutdown");

        if term_workers {
            for task in index.tasks.iter().filter(|t| t.pid != 0) {
                tracing::info!(task = %task.id, pid = task.pid, "signalling worker");
                terminate_pid(task.pid);
            }
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while in_flight > 0 {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(done)) => {
                    in_flight -= 1;
                    self.apply_worker_done(index, done)?;
                }
                _ => break,
            }
        }
        if in_flight > 0 {
            tracing::warn!(remaining = in_flight, "grace period expired with workers in flight");
        }

        Ok(ExecutionExit::Shutdown)
    }

    /// Integrate one reviewed task per tick. Merge is the only state
    /// change made without dispatching a worker.
    fn merge_pass(&mut self, index: &mut Index) -> Result<()> {
        let Some(task_id) = index
            .tasks
            .iter()
            .find(|t| t.state == TaskState::Reviewed && t.is_idle())
            .map(|t| t.id.clone())
        else {
            return Ok(());
        };

        let task = index.get_mut(&task_id).expect("task just found");
        let event = begin_merge(task);
        self.save_index(index)?;
        self.audit.append(&event);

        let outcome = match self.git.integrate(&task_id) {
            Ok(IntegrateOutcome::Merged) => MergeOutcome::Merged,
            Ok(IntegrateOutcome::Conflict { details }) => MergeOutcome::Conflict { details },
            Err(e @ GitError::Dirty { .. }) | Err(e @ GitError::Missing(_)) => {
                MergeOutcome::Failed {
                    reason: e.to_string(),
                }
            }
            Err(e) => MergeOutcome::Failed {
                reason: e.to_string(),
            },
        };

        let task = index.get_mut(&task_id).expect("task still present");
        let event = apply_merge_outcome(task, &outcome);
        let merged = task.state == TaskState::Merged;
        self.save_index(index)?;
        self.audit.append(&event);

        if merged {
            if let Err(e) = self.git.finalize(&task_id) {
                tracing::warn!(task = %task_id, error = %e, "worktree finalize failed");
            }
        }
        Ok(())
    }

    /// Ask the scheduler for work and spawn each selected candidate.
    /// Returns how many workers were started.
    async fn dispatch_pass(
        &mut self,
        index: &mut Index,
        tx: &mpsc::Sender<WorkerDone>,
    ) -> Result<usize> {
        let in_flight = InFlight::from_index(index);
        let decisions = scheduler::plan(index, &self.config, &in_flight);
        let mut started = 0;

        for decision in decisions {
            if !decision.selected {
                tracing::debug!(
                    task = %decision.task_id,
                    reason = %decision.reason,
                    "dispatch skipped"
                );
                continue;
            }

            match self.start_worker(index, &decision.task_id, decision.stage, &decision.role, tx).await {
                Ok(()) => started += 1,
                Err(e) => {
                    // Spawn failures are retryable worker outcomes, not
                    // supervisor faults.
                    tracing::warn!(task = %decision.task_id, error = %e, "worker start failed");
                    let task = index
                        .get_mut(&decision.task_id)
                        .expect("scheduled task exists");
                    let event = apply_worker_outcome(
                        task,
                        decision.stage,
                        &OutcomeKind::Retryable {
                            reason: format!("failed to start worker: {e:#}"),
                        },
                        "supervisor",
                    );
                    self.save_index(index)?;
                    self.audit.append(&event);
                }
            }
        }
        Ok(started)
    }

    async fn start_worker(
        &mut self,
        index: &mut Index,
        task_id: &str,
        stage: Stage,
        role: &str,
        tx: &mpsc::Sender<WorkerDone>,
    ) -> Result<()> {
        let worktree = self.git.prepare(task_id)?;

        let (invocation, attempt) = {
            let task = index.get_mut(task_id).context("task vanished")?;
            task.attempts.total += 1;
            let attempt = task.attempts.total;
            let invocation = WorkerInvocation {
                task_id: task.id.clone(),
                stage,
                role: role.to_string(),
                workdir: worktree.clone(),
                task_path: Some(worktree.join(&task.path)),
                body: None,
                attempt,
                timeout: Duration::from_secs(self.config.worker_timeout_s),
            };
            (invocation, attempt)
        };

        let worker = self.runner.start(invocation).await?;
        let pid = worker.pid;

        {
            let task = index.get_mut(task_id).context("task vanished")?;
            task.pid = pid;
            task.assigned_role = role.to_string();
            task.worker_state_dir = self
                .layout
                .attempt_dir(task_id, attempt)
                .to_string_lossy()
                .to_string();
        }
        self.save_index(index)?;
        self.audit.note(
            "scheduler",
            &format!("dispatched task={task_id} stage={stage} role={role} pid={pid} attempt={attempt}"),
        );

        let runner = self.runner.clone();
        let tx = tx.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            let result = runner
                .complete(worker)
                .await
                .map_err(|e| format!("{e:#}"));
            let _ = tx
                .send(WorkerDone {
                    task_id,
                    stage,
                    attempt,
                    result,
                })
                .await;
        });

        Ok(())
    }

    /// Apply one reaped worker outcome to the index.
    fn apply_worker_done(&mut self, index: &mut Index, done: WorkerDone) -> Result<()> {
        let Some(task) = index.get(&done.task_id) else {
            tracing::warn!(task = %done.task_id, "outcome for unknown task dropped");
            return Ok(());
        };
        // Applied exactly once, keyed on (task_id, attempts.total).
        if task.pid == 0 || task.attempts.total != done.attempt {
            tracing::warn!(
                task = %done.task_id,
                attempt = done.attempt,
                "stale outcome dropped"
            );
            return Ok(());
        }

        let report = match done.result {
            Ok(report) => report,
            Err(e) => {
                let task = index.get_mut(&done.task_id).expect("task present");
                let event = apply_worker_outcome(
                    task,
                    done.stage,
                    &OutcomeKind::Retryable {
                        reason: format!("runner error: {e}"),
                    },
                    "supervisor",
                );
                self.save_index(index)?;
                self.audit.append(&event);
                return Ok(());
            }
        };

        let outcome = classify(done.stage, &report);

        // Commit whatever the worker left uncommitted so the branch
        // carries the full result before test/review/merge.
        if outcome == OutcomeKind::Success
            && matches!(done.stage, Stage::Work | Stage::Test | Stage::Resolve)
        {
            match self.git.commit_all(
                &done.task_id,
                &format!("governator: {} {} attempt {}", done.task_id, done.stage, done.attempt),
            ) {
                Ok(true) => tracing::debug!(task = %done.task_id, "committed worker leftovers"),
                Ok(false) => {}
                Err(e) => tracing::warn!(task = %done.task_id, error = %e, "commit of worker changes failed"),
            }
        }

        if let Some(proposal) = &report.sections.proposal {
            self.handle_proposal(index, &done.task_id, done.attempt, proposal);
        }

        let task = index.get_mut(&done.task_id).expect("task present");
        let event = apply_worker_outcome(task, done.stage, &outcome, "lifecycle");
        self.save_index(index)?;
        self.audit.append(&event);
        Ok(())
    }

    /// Apply the configured `## Additional Work Proposal` policy.
    fn handle_proposal(&self, index: &Index, task_id: &str, attempt: u32, proposal: &str) {
        match self.config.proposal_policy {
            ProposalPolicy::Hold => {
                let path = self
                    .layout
                    .proposals_dir()
                    .join(format!("{task_id}-attempt-{attempt}.md"));
                if let Err(e) = std::fs::write(&path, proposal) {
                    tracing::warn!(task = task_id, error = %e, "failed to park proposal");
                } else {
                    self.audit.note(
                        "proposal",
                        &format!("held proposal from {task_id} at {}", path.display()),
                    );
                }
            }
            ProposalPolicy::AutoAdmit => {
                let next = next_task_prefix(index);
                let id = format!("{next:03}-proposed-{task_id}");
                let body = format!(
                    "---\ntask: {id}\ndepends_on: [\"{task_id}\"]\norder: {next}\n---\n\n# Proposed follow-up from {task_id}\n\n{proposal}\n"
                );
                let path = self.layout.tasks_dir().join(format!("{id}.md"));
                if let Err(e) = std::fs::write(&path, body) {
                    tracing::warn!(task = task_id, error = %e, "failed to admit proposal");
                } else {
                    self.audit.note(
                        "proposal",
                        &format!("auto-admitted proposal from {task_id} as {id}"),
                    );
                }
            }
        }
    }

    fn save_index(&self, index: &Index) -> Result<()> {
        self.store.save(index).context("failed to save index")
    }

    #[cfg(unix)]
    fn spawn_signal_watcher(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("SIGTERM received");
                }
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "ctrl_c watcher failed");
                        return;
                    }
                    tracing::info!("SIGINT received");
                }
            }
            cancel.cancel();
        });
    }

    #[cfg(not(unix))]
    fn spawn_signal_watcher(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }
}

/// Next free numeric task prefix, stepping by ten like planners do.
fn next_task_prefix(index: &Index) -> i64 {
    let max = index
        .tasks
        .iter()
        .filter_map(|t| {
            t.id.split('-')
                .next()
                .and_then(|prefix| prefix.parse::<i64>().ok())
        })
        .max()
        .unwrap_or(0);
    (max / 10 + 1) * 10
}

#[cfg(unix)]
fn terminate_pid(pid: u32) {
    // SAFETY: pid was recorded from a child we spawned.
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate_pid(_pid: u32) {}
