//! Durable state for governator: filesystem layout, config, the task
//! index, the supervisor lock, migrations, and the audit log.
//!
//! Everything the supervisor persists lives under `_governator/` at the
//! repository root, split into a git-tracked durable namespace and a
//! gitignored local namespace. This crate owns the on-disk formats; it
//! never shells out to git and never spawns workers.

pub mod audit;
pub mod config;
pub mod index;
pub mod layout;
pub mod lock;
pub mod migrate;
pub mod models;
pub mod supervisor_state;

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the persistence layer.
///
/// `NotFound` is distinct from decode failures so callers can tell
/// "not initialized" apart from "corrupt".
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported schema_version {found} (supported: {supported})")]
    SchemaVersion { found: u32, supported: u32 },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// Writes to `<path>.tmp` in the same directory, fsyncs, then renames
/// over the target so concurrent readers always see a complete file.
pub fn write_json_atomic<T: serde::Serialize>(
    path: &std::path::Path,
    value: &T,
) -> Result<(), StoreError> {
    use std::io::Write;

    let body = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Decode {
        path: path.to_path_buf(),
        source: e,
    })?;

    let tmp = path.with_extension("json.tmp");
    {
        let mut f = std::fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
        f.write_all(&body).map_err(|e| StoreError::io(&tmp, e))?;
        f.write_all(b"\n").map_err(|e| StoreError::io(&tmp, e))?;
        f.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    }
    std::fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

/// Read and decode a JSON file, mapping a missing file to `NotFound`.
pub fn read_json<T: serde::de::DeserializeOwned>(
    path: &std::path::Path,
) -> Result<T, StoreError> {
    let body = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&body).map_err(|e| StoreError::Decode {
        path: path.to_path_buf(),
        source: e,
    })
}
