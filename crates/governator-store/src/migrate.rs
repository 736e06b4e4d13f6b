//! Durable-state migrations.
//!
//! Migrations are numbered transforms over the on-disk index JSON,
//! stamped in a tracked ledger under
//! `_governator/_durable-state/migrations/`. Every supervisor start
//! applies unapplied migrations before anything else reads the index.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::layout::Layout;
use crate::models::SCHEMA_VERSION;

/// A single migration: an id, a human summary, and a transform over the
/// raw index document. The transform returns `true` when it changed
/// anything.
pub struct Migration {
    pub id: &'static str,
    pub summary: &'static str,
    apply: fn(&mut serde_json::Value) -> Result<bool>,
}

/// Tracked record of applied migrations.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Ledger {
    pub applied: Vec<String>,
}

/// Per-migration stamp written next to the ledger.
#[derive(Debug, Serialize, Deserialize)]
struct Stamp {
    id: String,
    summary: String,
    applied_at: String,
}

fn migrate_0001_init(_doc: &mut serde_json::Value) -> Result<bool> {
    Ok(false)
}

fn migrate_0002_index_digests(doc: &mut serde_json::Value) -> Result<bool> {
    let Some(obj) = doc.as_object_mut() else {
        anyhow::bail!("index document is not a JSON object");
    };
    let mut changed = false;
    if !obj.contains_key("digests") {
        obj.insert("digests".into(), serde_json::json!({}));
        changed = true;
    }
    let version = obj
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .unwrap_or(1);
    if version < 2 {
        obj.insert("schema_version".into(), serde_json::json!(2));
        changed = true;
    }
    Ok(changed)
}

/// All migrations, in application order.
static MIGRATIONS: &[Migration] = &[
    Migration {
        id: "0001-init",
        summary: "baseline schema",
        apply: migrate_0001_init,
    },
    Migration {
        id: "0002-index-digests",
        summary: "add digests map to the index; schema_version 1 -> 2",
        apply: migrate_0002_index_digests,
    },
];

pub fn builtin_migrations() -> &'static [Migration] {
    MIGRATIONS
}

fn load_ledger(path: &Path) -> Result<Ledger> {
    match crate::read_json(path) {
        Ok(ledger) => Ok(ledger),
        Err(e) if e.is_not_found() => Ok(Ledger::default()),
        Err(e) => Err(e).context("failed to read migration ledger"),
    }
}

/// Ids of migrations not yet recorded in the ledger.
pub fn pending(layout: &Layout) -> Result<Vec<&'static str>> {
    let ledger = load_ledger(&layout.migration_ledger_path())?;
    Ok(builtin_migrations()
        .iter()
        .filter(|m| !ledger.applied.iter().any(|id| id == m.id))
        .map(|m| m.id)
        .collect())
}

/// Apply every unapplied migration, in order. Returns the applied ids.
///
/// The index file may be absent (fresh `init`); transforms then run
/// against nothing and only the ledger advances.
pub fn apply_pending(layout: &Layout) -> Result<Vec<String>> {
    let ledger_path = layout.migration_ledger_path();
    let mut ledger = load_ledger(&ledger_path)?;
    let index_path = layout.index_path();

    let mut document: Option<serde_json::Value> = match crate::read_json(&index_path) {
        Ok(doc) => Some(doc),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e).context("failed to read index for migration"),
    };

    let mut applied = Vec::new();
    for migration in builtin_migrations() {
        if ledger.applied.iter().any(|id| id == migration.id) {
            continue;
        }

        let mut changed = false;
        if let Some(doc) = document.as_mut() {
            changed = (migration.apply)(doc)
                .with_context(|| format!("migration {} failed", migration.id))?;
        }

        tracing::info!(
            migration = migration.id,
            changed,
            "applied durable-state migration"
        );

        // Stamp the migration file, then the ledger. The stamp is the
        // tracked artifact; the ledger is what gates reapplication.
        let stamp = Stamp {
            id: migration.id.to_string(),
            summary: migration.summary.to_string(),
            applied_at: Utc::now().to_rfc3339(),
        };
        let stamp_path = layout.migrations_dir().join(format!("{}.json", migration.id));
        crate::write_json_atomic(&stamp_path, &stamp)
            .with_context(|| format!("failed to stamp migration {}", migration.id))?;

        ledger.applied.push(migration.id.to_string());
        applied.push(migration.id.to_string());
    }

    if !applied.is_empty() {
        if let Some(doc) = &document {
            crate::write_json_atomic(&index_path, doc)
                .context("failed to write migrated index")?;
        }
        crate::write_json_atomic(&ledger_path, &ledger)
            .context("failed to write migration ledger")?;
    }

    // Sanity: the migrated index must decode at the current schema.
    if document.is_some() {
        let index = crate::index::IndexStore::new(&index_path)
            .load()
            .context("migrated index does not decode")?;
        if index.schema_version != SCHEMA_VERSION {
            anyhow::bail!(
                "migrations left schema_version at {} (expected {})",
                index.schema_version,
                SCHEMA_VERSION
            );
        }
    }

    Ok(applied)
}
