//! Binary-level integration tests for the `governator` CLI.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use governator_store::layout::Layout;
use governator_test_utils::{ScratchRepo, write_script};

// ─── helpers ───────────────────────────────────────────────────────

struct TestEnv {
    repo: ScratchRepo,
}

impl TestEnv {
    fn new() -> Self {
        Self {
            repo: ScratchRepo::new(),
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("governator").expect("binary");
        cmd.current_dir(self.repo.path());
        cmd
    }

    fn layout(&self) -> Layout {
        Layout::new(self.repo.path())
    }

    fn init(&self) {
        self.cmd().arg("init").assert().success();
    }

    fn git_log(&self) -> String {
        let out = std::process::Command::new("git")
            .args(["log", "--oneline"])
            .current_dir(self.repo.path())
            .output()
            .expect("git log");
        String::from_utf8_lossy(&out.stdout).to_string()
    }

    fn write_task(&self, name: &str, content: &str) {
        std::fs::write(self.layout().tasks_dir().join(name), content).unwrap();
        governator_test_utils::git(self.repo.path(), &["add", "."]);
        governator_test_utils::git(self.repo.path(), &["commit", "-m", "add task"]);
    }

    /// Wait until `predicate` holds or the deadline passes.
    fn wait_for(&self, what: &str, timeout: Duration, predicate: impl Fn() -> bool) {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate() {
                return;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        panic!("timed out waiting for {what}");
    }
}

fn blocking_worker_script(dir: &std::path::Path) -> PathBuf {
    write_script(
        dir,
        "worker.sh",
        "#!/bin/sh\n\
         cat > /dev/null\n\
         printf '\\n## Blocking Reason\\n\\nwaiting on operator\\n' >> \"$GOVERNATOR_TASK_PATH\"\n\
         exit 0\n",
    )
}

// ─── init & status ─────────────────────────────────────────────────

#[test]
fn init_then_status_in_fresh_repo() {
    let env = TestEnv::new();

    env.cmd()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("init ok"));

    let layout = env.layout();
    assert!(layout.config_path().exists());
    assert!(layout.planning_spec_path().exists());
    assert!(layout.intent_path().exists());
    assert!(layout.tasks_dir().is_dir());
    assert!(env.git_log().contains("Governator initialized"));

    env.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("backlog=0 merged=0 in-progress=0"));
}

#[test]
fn init_outside_git_repo_fails() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("governator").unwrap();
    cmd.current_dir(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a git worktree").or(predicate::str::contains("not inside a git worktree")));
}

#[test]
fn init_twice_fails() {
    let env = TestEnv::new();
    env.init();
    env.cmd()
        .arg("init")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("already initialized"));
}

#[test]
fn init_accepts_config_flags() {
    let env = TestEnv::new();
    env.cmd()
        .args([
            "init",
            "--agent",
            "codex",
            "--concurrency",
            "2",
            "--reasoning-effort",
            "high",
            "--branch",
            "main",
            "--timeout",
            "60",
        ])
        .assert()
        .success();

    let config =
        governator_store::config::Config::load(&env.layout().config_path()).unwrap();
    assert_eq!(config.agent.to_string(), "codex");
    assert_eq!(config.concurrency, 2);
    assert_eq!(config.reasoning_effort.to_string(), "high");
    assert_eq!(config.worker_timeout_s, 60);
}

#[test]
fn init_rejects_unknown_agent() {
    let env = TestEnv::new();
    env.cmd()
        .args(["init", "--agent", "copilot"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown agent"));
}

#[test]
fn status_before_init_fails() {
    let env = TestEnv::new();
    env.cmd()
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

// ─── version ───────────────────────────────────────────────────────

#[test]
fn version_subcommand_and_flag() {
    let env = TestEnv::new();
    let expected = predicate::str::is_match("version=[^ ]+ commit=[^ ]+ built_at=").unwrap();

    env.cmd().arg("version").assert().success().stdout(expected.clone());
    env.cmd().arg("-V").assert().success().stdout(expected);
}

// ─── dag & why ─────────────────────────────────────────────────────

#[test]
fn dag_with_no_tasks() {
    let env = TestEnv::new();
    env.init();
    env.cmd()
        .arg("dag")
        .assert()
        .success()
        .stdout(predicate::str::contains("no tasks"));
}

#[test]
fn why_rejects_bad_line_count() {
    let env = TestEnv::new();
    env.init();
    env.cmd().args(["why", "-s", "abc"]).assert().code(2);
}

#[test]
fn why_with_empty_logs() {
    let env = TestEnv::new();
    env.init();
    env.cmd()
        .args(["why", "-s", "5", "-t", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("supervisor log"));
}

// ─── stop & reset ──────────────────────────────────────────────────

#[test]
fn stop_when_not_running_fails() {
    let env = TestEnv::new();
    env.init();
    env.cmd()
        .args(["stop"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not running"));
}

#[test]
fn reset_clears_stale_lock() {
    let env = TestEnv::new();
    env.init();

    let lock_path = env.layout().lock_path();
    std::fs::write(&lock_path, "pid=999999999\nstarted_at=2026-01-01T00:00:00Z\n").unwrap();

    env.cmd().arg("reset").assert().success();
    assert!(!lock_path.exists());
}

// ─── supervisor lifecycle through the binary ───────────────────────

#[test]
fn start_excludes_second_supervisor_and_stop_shuts_down() {
    let env = TestEnv::new();
    env.init();
    env.write_task(
        "001-a.md",
        "---\ntask: 001-a\n---\n\n# 001-a\n\nDo the thing.\n",
    );

    let tmp = TempDir::new().unwrap();
    let script = blocking_worker_script(tmp.path());

    // First start detaches a supervisor that will park the task as
    // blocked and then idle.
    env.cmd()
        .arg("start")
        .env("GOVERNATOR_AGENT_BIN", &script)
        .env("GOVERNATOR_TICK_MS", "50")
        .assert()
        .success()
        .stdout(predicate::str::contains("supervisor started"));

    let layout = env.layout();
    env.wait_for("lock to appear", Duration::from_secs(10), || {
        governator_store::lock::LockManager::new(layout.supervisor_dir()).held("supervisor.lock")
    });

    // Second start must refuse.
    env.cmd()
        .arg("start")
        .env("GOVERNATOR_AGENT_BIN", &script)
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("already running"));

    // The blocked task shows up in status eventually.
    env.wait_for("task to block", Duration::from_secs(20), || {
        let out = env.cmd().arg("status").output().unwrap();
        String::from_utf8_lossy(&out.stdout).contains("blocked")
    });

    // Stop and wait for the lock to clear.
    env.cmd().arg("stop").assert().success();
    env.wait_for("supervisor to stop", Duration::from_secs(20), || {
        !governator_store::lock::LockManager::new(layout.supervisor_dir()).held("supervisor.lock")
    });

    // Stopped supervisor leaves a stopped phase behind.
    env.cmd()
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"));
}
