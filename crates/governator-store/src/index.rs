//! Atomic persistence for the task index.
//!
//! Every mutation to the index goes through [`IndexStore::save`], which
//! writes a temp file in the same directory, fsyncs, and renames over
//! the canonical path. Readers (`status`, `dag`) therefore always see a
//! complete snapshot. In-process saves are serialized by a mutex;
//! cross-process exclusion belongs to the lock manager.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::models::{Index, SCHEMA_VERSION};
use crate::{StoreError, read_json, write_json_atomic};

#[derive(Debug)]
pub struct IndexStore {
    path: PathBuf,
    save_lock: Mutex<()>,
}

impl IndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the index, rejecting unknown schema versions.
    ///
    /// Returns [`StoreError::NotFound`] when the file does not exist so
    /// callers can distinguish "not initialized" from "corrupt".
    pub fn load(&self) -> Result<Index, StoreError> {
        let index: Index = read_json(&self.path)?;
        if index.schema_version > SCHEMA_VERSION {
            return Err(StoreError::SchemaVersion {
                found: index.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        Ok(index)
    }

    /// Persist the index atomically.
    pub fn save(&self, index: &Index) -> Result<(), StoreError> {
        let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
        write_json_atomic(&self.path, index)
    }
}
