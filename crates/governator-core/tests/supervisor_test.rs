//! End-to-end supervisor scenarios driven by stub worker scripts.
//!
//! Each test builds a real git repository with an initialized layout,
//! points the agent adapter at a shell script, and runs the supervisor
//! with a fast tick until it exits (all tasks terminal) or the test
//! cancels it.

use std::sync::Arc;
use std::time::Duration;

use governator_core::agent::{AgentCli, for_kind_with_binary};
use governator_core::supervisor::Supervisor;
use governator_store::audit::tail_lines;
use governator_store::config::{AgentKind, Config};
use governator_store::index::IndexStore;
use governator_store::layout::Layout;
use governator_store::lock::LockManager;
use governator_store::models::{Index, TaskState};
use governator_test_utils::{ScratchRepo, git, write_script};

struct Harness {
    repo: ScratchRepo,
    layout: Layout,
}

impl Harness {
    /// A repo with layout, config, and the given task files, all
    /// committed on `main`.
    fn new(config: &Config, tasks: &[(&str, &str)]) -> Self {
        let repo = ScratchRepo::new();
        let layout = Layout::new(repo.path());
        layout.ensure_tree().unwrap();

        config.save(&layout.config_path()).unwrap();
        std::fs::write(layout.intent_path(), "# Intent\n\nbuild the thing\n").unwrap();
        for (name, content) in tasks {
            std::fs::write(layout.tasks_dir().join(name), content).unwrap();
        }

        git(repo.path(), &["add", "."]);
        git(repo.path(), &["commit", "-m", "seed governator state"]);

        Self { repo, layout }
    }

    fn supervisor(&self, script: &std::path::Path, config: Config) -> Supervisor {
        let agent: Arc<dyn AgentCli> = Arc::from(for_kind_with_binary(
            AgentKind::Claude,
            script.to_string_lossy(),
        ));
        Supervisor::new(self.layout.clone(), config, agent)
            .unwrap()
            .with_tick(Duration::from_millis(50))
    }

    /// Run the supervisor until it exits on its own.
    async fn run_to_completion(&self, script: &std::path::Path, config: Config) {
        let supervisor = self.supervisor(script, config);
        let locks = LockManager::new(self.layout.supervisor_dir());
        let lease = locks.acquire("supervisor.lock").unwrap();

        tokio::time::timeout(Duration::from_secs(60), supervisor.run(lease))
            .await
            .expect("supervisor did not finish in time")
            .expect("supervisor failed");
    }

    /// Run the supervisor for `duration`, then cancel and wait for a
    /// clean shutdown.
    async fn run_for(&self, script: &std::path::Path, config: Config, duration: Duration) {
        let supervisor = self.supervisor(script, config);
        let cancel = supervisor.cancel_token();
        let locks = LockManager::new(self.layout.supervisor_dir());
        let lease = locks.acquire("supervisor.lock").unwrap();

        let handle = tokio::spawn(supervisor.run(lease));
        tokio::time::sleep(duration).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(30), handle)
            .await
            .expect("supervisor did not shut down")
            .expect("join failed")
            .expect("supervisor failed");
    }

    fn index(&self) -> Index {
        IndexStore::new(self.layout.index_path()).load().unwrap()
    }

    fn audit_log(&self) -> String {
        tail_lines(&self.layout.supervisor_log_path(), 10_000).join("\n")
    }
}

fn task_file(id: &str, extra_front: &str) -> String {
    format!("---\ntask: {id}\n{extra_front}---\n\n# {id}\n\nDo the thing.\n")
}

/// A worker that succeeds at every stage and approves reviews.
fn happy_worker(dir: &std::path::Path) -> std::path::PathBuf {
    write_script(
        dir,
        "happy.sh",
        "#!/bin/sh\n\
         cat > /dev/null\n\
         case \"$GOVERNATOR_STAGE\" in\n\
           review)\n\
             printf '{\"approved\": true}' > \"$GOVERNATOR_WORKER_STATE_DIR/exit.json\"\n\
             printf '\\n## Change Summary\\n\\nreview ok\\n' >> \"$GOVERNATOR_TASK_PATH\"\n\
             ;;\n\
           plan_step) : ;;\n\
           *)\n\
             printf '\\n## Change Summary\\n\\n%s ok\\n' \"$GOVERNATOR_STAGE\" >> \"$GOVERNATOR_TASK_PATH\"\n\
             ;;\n\
         esac\n\
         exit 0\n",
    )
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.concurrency = 2;
    config.worker_timeout_s = 30;
    config
}

// ---------------------------------------------------------------------------
// Scenario: single-task happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_task_happy_path_reaches_merged_with_exact_audit_sequence() {
    let mut config = fast_config();
    config.concurrency = 1;

    let harness = Harness::new(&config, &[("001-foo.md", &task_file("001-foo", ""))]);
    let tmp = tempfile::tempdir().unwrap();
    let script = happy_worker(tmp.path());

    harness.run_to_completion(&script, config).await;

    let index = harness.index();
    let task = index.get("001-foo").unwrap();
    assert_eq!(task.state, TaskState::Merged);
    assert_eq!(task.pid, 0);
    assert!(task.blocked_reason.is_empty());

    // The audit log carries the exact lifecycle sequence.
    let log = harness.audit_log();
    let expected = [
        ("backlog", "triaged"),
        ("triaged", "worked"),
        ("worked", "tested"),
        ("tested", "reviewed"),
        ("reviewed", "mergeable"),
        ("mergeable", "merged"),
    ];
    let mut cursor = 0;
    for (from, to) in expected {
        let needle = format!("task=001-foo from={from} to={to}");
        let at = log[cursor..]
            .find(&needle)
            .unwrap_or_else(|| panic!("missing '{needle}' after byte {cursor} in:\n{log}"));
        cursor += at;
    }

    // The branch merged into main: the worker's change summary landed
    // in the base-branch task file, and the worktree is gone.
    let merged_task =
        std::fs::read_to_string(harness.layout.tasks_dir().join("001-foo.md")).unwrap();
    assert!(merged_task.contains("## Change Summary"));
    assert!(!harness.layout.worktree_dir("001-foo").exists());
}

// ---------------------------------------------------------------------------
// Scenario: overlap serialization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn overlap_keys_serialize_conflicting_tasks() {
    let config = fast_config();
    let harness = Harness::new(
        &config,
        &[
            ("001-a.md", &task_file("001-a", "overlap: [db]\norder: 1\n")),
            ("002-b.md", &task_file("002-b", "overlap: [db]\norder: 2\n")),
            ("003-c.md", &task_file("003-c", "overlap: [api]\norder: 3\n")),
        ],
    );

    // Workers holding a db marker long enough to catch a violation.
    let tmp = tempfile::tempdir().unwrap();
    let shared = tmp.path().to_string_lossy().to_string();
    let script = write_script(
        tmp.path(),
        "overlap.sh",
        &format!(
            "#!/bin/sh\n\
             cat > /dev/null\n\
             SHARED=\"{shared}\"\n\
             case \"$GOVERNATOR_TASK_ID\" in\n\
               001-a|002-b)\n\
                 if [ -e \"$SHARED/db-running\" ]; then touch \"$SHARED/violation\"; fi\n\
                 touch \"$SHARED/db-running\"\n\
                 sleep 0.3\n\
                 rm -f \"$SHARED/db-running\"\n\
                 ;;\n\
             esac\n\
             case \"$GOVERNATOR_STAGE\" in\n\
               review)\n\
                 printf '{{\"approved\": true}}' > \"$GOVERNATOR_WORKER_STATE_DIR/exit.json\"\n\
                 printf '\\n## Change Summary\\n\\nok\\n' >> \"$GOVERNATOR_TASK_PATH\"\n\
                 ;;\n\
               *)\n\
                 printf '\\n## Change Summary\\n\\nok\\n' >> \"$GOVERNATOR_TASK_PATH\"\n\
                 ;;\n\
             esac\n\
             exit 0\n"
        ),
    );

    harness.run_to_completion(&script, config).await;

    let index = harness.index();
    for id in ["001-a", "002-b", "003-c"] {
        assert_eq!(index.get(id).unwrap().state, TaskState::Merged, "{id}");
    }
    assert!(
        !tmp.path().join("violation").exists(),
        "two db-overlap workers ran concurrently"
    );
}

// ---------------------------------------------------------------------------
// Scenario: dependency gate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dependency_gate_holds_dependent_until_merge() {
    let config = fast_config();
    let harness = Harness::new(
        &config,
        &[
            ("001-a.md", &task_file("001-a", "order: 10\n")),
            (
                "002-b.md",
                &task_file("002-b", "order: 20\ndepends_on: [\"001-a\"]\n"),
            ),
        ],
    );

    // Record every stage execution in order.
    let tmp = tempfile::tempdir().unwrap();
    let shared = tmp.path().to_string_lossy().to_string();
    let script = write_script(
        tmp.path(),
        "sequence.sh",
        &format!(
            "#!/bin/sh\n\
             cat > /dev/null\n\
             echo \"$GOVERNATOR_STAGE $GOVERNATOR_TASK_ID\" >> \"{shared}/sequence\"\n\
             case \"$GOVERNATOR_STAGE\" in\n\
               review) printf '{{\"approved\": true}}' > \"$GOVERNATOR_WORKER_STATE_DIR/exit.json\" ;;\n\
             esac\n\
             printf '\\n## Change Summary\\n\\nok\\n' >> \"$GOVERNATOR_TASK_PATH\"\n\
             exit 0\n"
        ),
    );

    harness.run_to_completion(&script, config).await;

    let index = harness.index();
    assert_eq!(index.get("001-a").unwrap().state, TaskState::Merged);
    assert_eq!(index.get("002-b").unwrap().state, TaskState::Merged);

    let sequence = std::fs::read_to_string(tmp.path().join("sequence")).unwrap();
    let lines: Vec<&str> = sequence.lines().collect();
    let last_a = lines
        .iter()
        .rposition(|l| l.ends_with("001-a"))
        .expect("001-a ran");
    let first_b = lines
        .iter()
        .position(|l| l.ends_with("002-b"))
        .expect("002-b ran");
    assert!(
        last_a < first_b,
        "002-b was dispatched before 001-a finished its pipeline:\n{sequence}"
    );
}

// ---------------------------------------------------------------------------
// Scenario: disabled role parks the task
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disabled_reviewer_role_parks_task_at_tested() {
    let mut config = fast_config();
    config.role_caps.insert("reviewer".into(), 0);

    let harness = Harness::new(&config, &[("001-a.md", &task_file("001-a", ""))]);
    let tmp = tempfile::tempdir().unwrap();
    let script = happy_worker(tmp.path());

    harness.run_for(&script, config, Duration::from_secs(5)).await;

    let index = harness.index();
    let task = index.get("001-a").unwrap();
    assert_eq!(task.state, TaskState::Tested, "task must park at tested");
    assert_eq!(task.pid, 0);

    let counts = governator_core::status::counts(&index);
    assert_eq!(counts.in_progress, 1);
    assert_eq!(counts.merged, 0);
}

// ---------------------------------------------------------------------------
// Scenario: review rejection reworks the task
// ---------------------------------------------------------------------------

#[tokio::test]
async fn review_rejection_returns_task_to_work_and_then_merges() {
    let mut config = fast_config();
    config.concurrency = 1;

    let harness = Harness::new(&config, &[("001-a.md", &task_file("001-a", ""))]);
    let tmp = tempfile::tempdir().unwrap();
    let shared = tmp.path().to_string_lossy().to_string();
    // First review rejects, later reviews approve.
    let script = write_script(
        tmp.path(),
        "picky-reviewer.sh",
        &format!(
            "#!/bin/sh\n\
             cat > /dev/null\n\
             case \"$GOVERNATOR_STAGE\" in\n\
               review)\n\
                 if [ -e \"{shared}/rejected-once\" ]; then\n\
                   printf '{{\"approved\": true}}' > \"$GOVERNATOR_WORKER_STATE_DIR/exit.json\"\n\
                 else\n\
                   touch \"{shared}/rejected-once\"\n\
                   printf '{{\"approved\": false}}' > \"$GOVERNATOR_WORKER_STATE_DIR/exit.json\"\n\
                 fi\n\
                 printf '\\n## Change Summary\\n\\nreviewed\\n' >> \"$GOVERNATOR_TASK_PATH\"\n\
                 ;;\n\
               *)\n\
                 printf '\\n## Change Summary\\n\\nok\\n' >> \"$GOVERNATOR_TASK_PATH\"\n\
                 ;;\n\
             esac\n\
             exit 0\n"
        ),
    );

    harness.run_to_completion(&script, config).await;

    let index = harness.index();
    assert_eq!(index.get("001-a").unwrap().state, TaskState::Merged);

    let log = harness.audit_log();
    assert!(
        log.contains("task=001-a from=tested to=triaged"),
        "rework transition missing:\n{log}"
    );
    // Reworked through the pipeline a second time.
    assert!(log.matches("task=001-a from=triaged to=worked").count() >= 2);
}

// ---------------------------------------------------------------------------
// Scenario: blocked worker parks the task with its reason
// ---------------------------------------------------------------------------

#[tokio::test]
async fn blocking_reason_parks_task() {
    let config = fast_config();
    let harness = Harness::new(&config, &[("001-a.md", &task_file("001-a", ""))]);
    let tmp = tempfile::tempdir().unwrap();
    let script = write_script(
        tmp.path(),
        "stuck.sh",
        "#!/bin/sh\n\
         cat > /dev/null\n\
         printf '\\n## Blocking Reason\\n\\nneed a database password\\n' >> \"$GOVERNATOR_TASK_PATH\"\n\
         exit 0\n",
    );

    harness.run_for(&script, config, Duration::from_secs(3)).await;

    let index = harness.index();
    let task = index.get("001-a").unwrap();
    assert_eq!(task.state, TaskState::Blocked);
    assert_eq!(task.blocked_reason, "need a database password");
}

// ---------------------------------------------------------------------------
// Scenario: drift mid-execution quiesces and replans
// ---------------------------------------------------------------------------

#[tokio::test]
async fn drift_quiesces_and_replans_then_resumes() {
    let mut config = fast_config();
    config.concurrency = 1;

    let harness = Harness::new(&config, &[("001-a.md", &task_file("001-a", ""))]);
    // An architecture doc whose digest is recorded at triage.
    std::fs::write(
        harness.layout.docs_dir().join("architecture.md"),
        "original architecture\n",
    )
    .unwrap();
    git(harness.repo.path(), &["add", "."]);
    git(harness.repo.path(), &["commit", "-m", "add architecture doc"]);

    // The work-stage worker edits the root architecture doc (outside
    // its worktree) to force drift; everything else succeeds.
    let tmp = tempfile::tempdir().unwrap();
    let root_doc = harness
        .layout
        .docs_dir()
        .join("architecture.md")
        .to_string_lossy()
        .to_string();
    let script = write_script(
        tmp.path(),
        "drifter.sh",
        &format!(
            "#!/bin/sh\n\
             cat > /dev/null\n\
             case \"$GOVERNATOR_STAGE\" in\n\
               work)\n\
                 echo 'amended by worker' >> \"{root_doc}\"\n\
                 printf '\\n## Change Summary\\n\\nok\\n' >> \"$GOVERNATOR_TASK_PATH\"\n\
                 ;;\n\
               review)\n\
                 printf '{{\"approved\": true}}' > \"$GOVERNATOR_WORKER_STATE_DIR/exit.json\"\n\
                 printf '\\n## Change Summary\\n\\nok\\n' >> \"$GOVERNATOR_TASK_PATH\"\n\
                 ;;\n\
               plan_step) : ;;\n\
               *)\n\
                 printf '\\n## Change Summary\\n\\nok\\n' >> \"$GOVERNATOR_TASK_PATH\"\n\
                 ;;\n\
             esac\n\
             exit 0\n"
        ),
    );

    harness.run_to_completion(&script, config).await;

    let log = harness.audit_log();
    assert!(log.contains("drift observed"), "no drift in log:\n{log}");
    assert!(
        log.contains("from=execution to=replan_quiesce"),
        "no quiesce phase transition:\n{log}"
    );
    assert!(
        log.contains("from=replan_quiesce to=planning"),
        "no replanning transition:\n{log}"
    );

    // Execution resumed after replanning and the task still merged.
    let index = harness.index();
    assert_eq!(index.get("001-a").unwrap().state, TaskState::Merged);
}

// ---------------------------------------------------------------------------
// Scenario: crash recovery resets stale PIDs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restart_recovers_tasks_with_dead_worker_pids() {
    let config = fast_config();
    let harness = Harness::new(&config, &[("001-a.md", &task_file("001-a", ""))]);

    // Simulate a crash: an index with a recorded PID that is not alive.
    let store = IndexStore::new(harness.layout.index_path());
    let mut index = Index::new();
    let mut task = governator_store::models::Task::new(
        "001-a",
        "001-a",
        "_governator/tasks/001-a.md",
    );
    task.state = TaskState::Triaged;
    task.pid = 999_999_999;
    task.attempts.total = 1;
    task.file_digest = governator_core::drift::sha256_hex(
        std::fs::read(harness.layout.tasks_dir().join("001-a.md"))
            .unwrap()
            .as_slice(),
    );
    index.tasks.push(task);
    store.save(&index).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let script = happy_worker(tmp.path());

    harness.run_to_completion(&script, config).await;

    let index = harness.index();
    let task = index.get("001-a").unwrap();
    // Recovered, re-dispatched, and completed; the dead attempt counted.
    assert_eq!(task.state, TaskState::Merged);
    assert_eq!(task.pid, 0);
    assert!(task.attempts.failed >= 1);

    let log = harness.audit_log();
    assert!(log.contains("died"), "no recovery event in log:\n{log}");
}
