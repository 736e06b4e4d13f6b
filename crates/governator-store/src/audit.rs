//! Append-only supervisor log.
//!
//! One human-readable structured line per event. Appends happen after
//! the corresponding index save and are best-effort: an audit failure
//! is logged but never blocks a transition. Line shape:
//!
//! ```text
//! <rfc3339> level=info task=<id|-> from=<state|-> to=<state|-> actor=<actor> reason=<reason>
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::models::AuditEvent;

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

fn dash_if_empty(s: &str) -> &str {
    if s.is_empty() { "-" } else { s }
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a state-change record.
    pub fn append(&self, event: &AuditEvent) {
        let line = format!(
            "{} level=info task={} from={} to={} actor={} reason={}\n",
            event.ts.to_rfc3339(),
            dash_if_empty(&event.task_id),
            dash_if_empty(&event.from_state),
            dash_if_empty(&event.to_state),
            dash_if_empty(&event.actor),
            dash_if_empty(&event.reason.replace('\n', " ")),
        );
        self.write_line(&line);
    }

    /// Append a free-form note (startup, shutdown, dispatch decisions).
    pub fn note(&self, actor: &str, reason: &str) {
        let line = format!(
            "{} level=info task=- from=- to=- actor={} reason={}\n",
            Utc::now().to_rfc3339(),
            dash_if_empty(actor),
            dash_if_empty(&reason.replace('\n', " ")),
        );
        self.write_line(&line);
    }

    fn write_line(&self, line: &str) {
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "audit append failed");
        }
    }
}

/// Last `n` lines of a text file. Missing file yields an empty vec.
pub fn tail_lines(path: &Path, n: usize) -> Vec<String> {
    let Ok(body) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let lines: Vec<&str> = body.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditEvent, TaskState};

    #[test]
    fn append_writes_structured_line() {
        let tmp = tempfile::tempdir().unwrap();
        let log = AuditLog::new(tmp.path().join("supervisor.log"));

        log.append(&AuditEvent::task(
            "001-a",
            TaskState::Triaged,
            TaskState::Worked,
            "lifecycle",
            "worker exit 0 with change summary",
        ));

        let body = std::fs::read_to_string(log.path()).unwrap();
        assert!(body.contains("task=001-a"));
        assert!(body.contains("from=triaged to=worked"));
        assert!(body.contains("actor=lifecycle"));
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn appends_accumulate_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let log = AuditLog::new(tmp.path().join("supervisor.log"));

        log.note("supervisor", "startup");
        log.append(&AuditEvent::task(
            "001-a",
            TaskState::Backlog,
            TaskState::Triaged,
            "triage",
            "admitted",
        ));
        log.note("supervisor", "shutdown");

        let lines = tail_lines(log.path(), 10);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("startup"));
        assert!(lines[1].contains("to=triaged"));
        assert!(lines[2].contains("shutdown"));
    }

    #[test]
    fn newlines_in_reason_are_flattened() {
        let tmp = tempfile::tempdir().unwrap();
        let log = AuditLog::new(tmp.path().join("supervisor.log"));
        log.note("supervisor", "line one\nline two");

        let lines = tail_lines(log.path(), 10);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("line one line two"));
    }

    #[test]
    fn tail_lines_bounds() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log");
        std::fs::write(&path, "a\nb\nc\nd\n").unwrap();

        assert_eq!(tail_lines(&path, 2), vec!["c", "d"]);
        assert_eq!(tail_lines(&path, 10).len(), 4);
        assert!(tail_lines(&tmp.path().join("missing"), 5).is_empty());
    }

    #[test]
    fn append_to_unwritable_path_does_not_panic() {
        let log = AuditLog::new("/nonexistent-dir/supervisor.log");
        log.note("supervisor", "best effort");
    }
}
