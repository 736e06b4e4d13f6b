//! DAG builder and triage: task files in, a validated index out.
//!
//! Triage is the only place new tasks are admitted. It discovers task
//! files, parses their front matter, validates id uniqueness and
//! dependency references, rejects cycles (reporting the full cycle
//! path), and merges the result into the index: unchanged files retain
//! their task's state, new files enter as `backlog` and are promoted to
//! `triaged`, and tasks whose files disappeared become `obsolete`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use thiserror::Error;

use governator_store::config::Config;
use governator_store::layout::Layout;
use governator_store::models::{AuditEvent, Index, Task, TaskKind, TaskState};

use crate::drift::sha256_hex;

#[derive(Debug, Error)]
pub enum TriageError {
    #[error("duplicate task id '{id}' in {path}")]
    DuplicateId { id: String, path: PathBuf },

    #[error("task '{id}' depends on unknown task '{dependency}'")]
    UnknownDependency { id: String, dependency: String },

    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("bad front matter in {path}: {detail}")]
    FrontMatter { path: PathBuf, detail: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A task file after parsing, before index merge.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTask {
    pub id: String,
    pub title: String,
    pub kind: TaskKind,
    pub depends_on: Vec<String>,
    pub role: String,
    pub overlap: Vec<String>,
    pub order: i64,
    /// Repo-relative path of the file.
    pub rel_path: String,
    pub digest: String,
}

/// What a triage pass changed.
#[derive(Debug, Default)]
pub struct TriageReport {
    pub admitted: Vec<String>,
    pub updated: Vec<String>,
    pub obsoleted: Vec<String>,
    pub events: Vec<AuditEvent>,
}

// ---------------------------------------------------------------------------
// Front matter
// ---------------------------------------------------------------------------

/// Parse the `---`-delimited front-matter block of a task file.
///
/// Accepted keys: `task` (required), `title`, `depends_on`, `role`,
/// `overlap`, `order`, `kind`. Lists are inline (`["a", "b"]`). A
/// missing title falls back to the first `# ` heading, then the id.
pub fn parse_task_file(path: &Path, rel_path: &str, content: &str) -> Result<ParsedTask, TriageError> {
    let front_err = |detail: &str| TriageError::FrontMatter {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    };

    let rest = content
        .strip_prefix("---")
        .ok_or_else(|| front_err("missing opening --- delimiter"))?;
    let end = rest
        .find("\n---")
        .ok_or_else(|| front_err("missing closing --- delimiter"))?;
    let block = &rest[..end];
    let body = &rest[end + 4..];

    let mut fields: HashMap<String, String> = HashMap::new();
    for line in block.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(front_err(&format!("expected 'key: value', got '{line}'")));
        };
        fields.insert(key.trim().to_string(), value.trim().to_string());
    }

    let id = fields
        .get("task")
        .map(|s| unquote(s).to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| front_err("missing required 'task' key"))?;

    let title = fields
        .get("title")
        .map(|s| unquote(s).to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            body.lines()
                .find_map(|l| l.strip_prefix("# ").map(|t| t.trim().to_string()))
        })
        .unwrap_or_else(|| id.clone());

    let depends_on = fields
        .get("depends_on")
        .map(|s| parse_inline_list(s, path))
        .transpose()?
        .unwrap_or_default();
    let overlap = fields
        .get("overlap")
        .map(|s| parse_inline_list(s, path))
        .transpose()?
        .unwrap_or_default();

    let role = fields
        .get("role")
        .map(|s| unquote(s).to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "default".to_string());

    let order = match fields.get("order") {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| front_err(&format!("order is not an integer: '{raw}'")))?,
        None => 0,
    };

    let kind = match fields.get("kind").map(|s| unquote(s)) {
        Some("planning") => TaskKind::Planning,
        Some("execution") | None => TaskKind::Execution,
        Some(other) => return Err(front_err(&format!("unknown kind '{other}'"))),
    };

    Ok(ParsedTask {
        id,
        title,
        kind,
        depends_on,
        role,
        overlap,
        order,
        rel_path: rel_path.to_string(),
        digest: sha256_hex(content.as_bytes()),
    })
}

fn unquote(s: &str) -> &str {
    s.trim().trim_matches('"').trim_matches('\'')
}

fn parse_inline_list(raw: &str, path: &Path) -> Result<Vec<String>, TriageError> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "[]" {
        return Ok(Vec::new());
    }
    let inner = raw
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| TriageError::FrontMatter {
            path: path.to_path_buf(),
            detail: format!("expected an inline list, got '{raw}'"),
        })?;
    Ok(inner
        .split(',')
        .map(|item| unquote(item).to_string())
        .filter(|item| !item.is_empty())
        .collect())
}

// ---------------------------------------------------------------------------
// Discovery & validation
// ---------------------------------------------------------------------------

/// Parse every `.md` file under the tasks directory, sorted by filename.
pub fn discover(layout: &Layout) -> Result<Vec<ParsedTask>, TriageError> {
    let dir = layout.tasks_dir();
    let mut paths: Vec<PathBuf> = match std::fs::read_dir(&dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(TriageError::Io { path: dir, source: e }),
    };
    paths.sort();

    let mut parsed = Vec::with_capacity(paths.len());
    for path in paths {
        let content = std::fs::read_to_string(&path).map_err(|e| TriageError::Io {
            path: path.clone(),
            source: e,
        })?;
        let rel = path
            .strip_prefix(layout.repo_root())
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();
        parsed.push(parse_task_file(&path, &rel, &content)?);
    }
    Ok(parsed)
}

/// Validate id uniqueness, dependency resolution, and acyclicity.
pub fn validate(tasks: &[ParsedTask]) -> Result<(), TriageError> {
    let mut seen: HashMap<&str, &ParsedTask> = HashMap::new();
    for task in tasks {
        if seen.insert(&task.id, task).is_some() {
            return Err(TriageError::DuplicateId {
                id: task.id.clone(),
                path: PathBuf::from(&task.rel_path),
            });
        }
    }

    for task in tasks {
        for dep in &task.depends_on {
            if !seen.contains_key(dep.as_str()) {
                return Err(TriageError::UnknownDependency {
                    id: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    detect_cycle(tasks)
}

/// Three-color DFS; on a back edge the full cycle path is reported.
fn detect_cycle(tasks: &[ParsedTask]) -> Result<(), TriageError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let adjacency: HashMap<&str, &[String]> = tasks
        .iter()
        .map(|t| (t.id.as_str(), t.depends_on.as_slice()))
        .collect();
    let mut color: HashMap<&str, Color> =
        tasks.iter().map(|t| (t.id.as_str(), Color::White)).collect();

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, &'a [String]>,
        color: &mut HashMap<&'a str, Color>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        color.insert(node, Color::Gray);
        stack.push(node);

        if let Some(deps) = adjacency.get(node) {
            for dep in deps.iter() {
                match color.get(dep.as_str()) {
                    Some(Color::Gray) => {
                        // Back edge: slice the stack from the cycle entry.
                        let start = stack.iter().position(|n| *n == dep.as_str()).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|s| s.to_string()).collect();
                        path.push(dep.clone());
                        return Some(path);
                    }
                    Some(Color::White) => {
                        if let Some(cycle) = visit(dep.as_str(), adjacency, color, stack) {
                            return Some(cycle);
                        }
                    }
                    _ => {}
                }
            }
        }

        stack.pop();
        color.insert(node, Color::Black);
        None
    }

    let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    for id in ids {
        if color[id] == Color::White {
            let mut stack = Vec::new();
            if let Some(path) = visit(id, &adjacency, &mut color, &mut stack) {
                return Err(TriageError::Cycle { path });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Index merge
// ---------------------------------------------------------------------------

/// Merge discovered tasks into the index.
pub fn triage(
    index: &mut Index,
    layout: &Layout,
    config: &Config,
) -> Result<TriageReport, TriageError> {
    let parsed = discover(layout)?;
    validate(&parsed)?;

    let mut report = TriageReport::default();
    let present: HashSet<&str> = parsed.iter().map(|t| t.id.as_str()).collect();

    for p in &parsed {
        match index.get_mut(&p.id) {
            Some(existing) => {
                let changed = existing.file_digest != p.digest;
                // Metadata always follows the file; state is retained.
                existing.title = p.title.clone();
                existing.kind = p.kind;
                existing.dependencies = p.depends_on.clone();
                existing.role = p.role.clone();
                existing.overlap = p.overlap.clone();
                existing.order = p.order;
                existing.file_digest = p.digest.clone();
                if existing.state == TaskState::Obsolete {
                    // The file came back; re-admit it.
                    existing.state = TaskState::Triaged;
                    report.events.push(AuditEvent::task(
                        &p.id,
                        TaskState::Obsolete,
                        TaskState::Triaged,
                        "triage",
                        "task file restored",
                    ));
                }
                if changed {
                    report.updated.push(p.id.clone());
                }
            }
            None => {
                let mut task = Task::new(&p.id, &p.title, &p.rel_path);
                task.kind = p.kind;
                task.dependencies = p.depends_on.clone();
                task.role = p.role.clone();
                task.overlap = p.overlap.clone();
                task.order = p.order;
                task.retries.max_attempts = config.max_attempts;
                task.file_digest = p.digest.clone();
                // Admission: backlog on entry, triaged once inserted.
                task.state = TaskState::Triaged;
                report.events.push(AuditEvent::task(
                    &p.id,
                    TaskState::Backlog,
                    TaskState::Triaged,
                    "triage",
                    "admitted from task file",
                ));
                report.admitted.push(p.id.clone());
                index.tasks.push(task);
            }
        }
    }

    // Files gone from the tasks directory: mark obsolete, never dispatch.
    for task in &mut index.tasks {
        if !present.contains(task.id.as_str()) && task.state != TaskState::Obsolete {
            report.events.push(AuditEvent::task(
                &task.id,
                task.state,
                TaskState::Obsolete,
                "triage",
                "task file removed by replanning",
            ));
            task.state = TaskState::Obsolete;
            task.pid = 0;
            report.obsoleted.push(task.id.clone());
        }
    }

    index.tasks.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
