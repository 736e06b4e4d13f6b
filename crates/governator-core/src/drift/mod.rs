//! Architecture drift detection.
//!
//! The index records a content digest for the operator intent document
//! and every architecture doc at triage time. After each worker
//! completion the digests are recomputed; any difference means a worker
//! (or the operator) changed the architecture, and the supervisor must
//! quiesce and re-enter planning.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use governator_store::layout::Layout;

/// Lowercase hex SHA-256.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Digest the intent document and every `.md` under the docs directory,
/// keyed by repo-relative path. Missing files are simply absent.
pub fn compute_digests(layout: &Layout) -> Result<BTreeMap<String, String>> {
    let mut digests = BTreeMap::new();

    let rel = |path: &std::path::Path| {
        path.strip_prefix(layout.repo_root())
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    };

    let intent = layout.intent_path();
    if intent.exists() {
        let body = std::fs::read(&intent)
            .with_context(|| format!("failed to read {}", intent.display()))?;
        digests.insert(rel(&intent), sha256_hex(&body));
    }

    let docs_dir = layout.docs_dir();
    let entries = match std::fs::read_dir(&docs_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(digests),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to list {}", docs_dir.display()));
        }
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "md") {
            let body = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            digests.insert(rel(&path), sha256_hex(&body));
        }
    }

    Ok(digests)
}

/// Difference between recorded and current digests.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DriftReport {
    pub changed: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl DriftReport {
    pub fn is_drifted(&self) -> bool {
        !(self.changed.is_empty() && self.added.is_empty() && self.removed.is_empty())
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        for (label, paths) in [
            ("changed", &self.changed),
            ("added", &self.added),
            ("removed", &self.removed),
        ] {
            if !paths.is_empty() {
                parts.push(format!("{label}: {}", paths.join(", ")));
            }
        }
        parts.join("; ")
    }
}

/// Compare the digests recorded in the index against the current tree.
pub fn detect(
    recorded: &BTreeMap<String, String>,
    current: &BTreeMap<String, String>,
) -> DriftReport {
    let mut report = DriftReport::default();

    for (path, digest) in current {
        match recorded.get(path) {
            None => report.added.push(path.clone()),
            Some(old) if old != digest => report.changed.push(path.clone()),
            Some(_) => {}
        }
    }
    for path in recorded.keys() {
        if !current.contains_key(path) {
            report.removed.push(path.clone());
        }
    }
    report
}
