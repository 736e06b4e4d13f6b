//! Exclusive PID-stamped lockfile for the supervisor.
//!
//! The lockfile is created with `O_CREAT|O_EXCL` and contains
//! `pid=<n>\nstarted_at=<rfc3339>\n`. A lock whose recorded PID is
//! still alive means another supervisor holds it; a dead PID is a stale
//! lock that the operator must clear with `reset`. Stale locks are
//! never auto-cleared.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("already held by running process (pid {pid})")]
    Held { pid: u32 },

    #[error("stale lock left by dead process (pid {pid}); run `governator reset`")]
    Stale { pid: u32 },

    #[error("unreadable lock file at {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Is a process with this PID alive?
///
/// `kill(pid, 0)` probes existence without signalling. EPERM still
/// means the process exists.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // SAFETY: signal 0 performs error checking only.
    let ret = unsafe { libc::kill(pid as i32, 0) };
    if ret == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    false
}

/// Handle on a held lock. Releasing unlinks the file; release is
/// idempotent and also runs best-effort on drop.
#[derive(Debug)]
pub struct Lease {
    path: PathBuf,
    released: bool,
}

impl Lease {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock");
            }
        }
    }

    /// Keep the file on disk after drop. Used when the supervisor dies
    /// in phase `failed` and the lock should be retained for inspection.
    pub fn forget(mut self) {
        self.released = true;
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

/// Manages named lockfiles in a directory.
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Acquire an exclusive lock, stamping it with our PID.
    pub fn acquire(&self, name: &str) -> Result<Lease, LockError> {
        let path = self.lock_path(name);

        std::fs::create_dir_all(&self.dir).map_err(|e| LockError::Io {
            path: self.dir.clone(),
            source: e,
        })?;

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                let body = format!(
                    "pid={}\nstarted_at={}\n",
                    std::process::id(),
                    Utc::now().to_rfc3339()
                );
                file.write_all(body.as_bytes()).map_err(|e| LockError::Io {
                    path: path.clone(),
                    source: e,
                })?;
                Ok(Lease {
                    path,
                    released: false,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let pid = self.read_holder(&path)?;
                if pid_alive(pid) {
                    Err(LockError::Held { pid })
                } else {
                    Err(LockError::Stale { pid })
                }
            }
            Err(e) => Err(LockError::Io { path, source: e }),
        }
    }

    /// Is the named lock currently held by a live process?
    pub fn held(&self, name: &str) -> bool {
        let path = self.lock_path(name);
        match self.read_holder(&path) {
            Ok(pid) => pid_alive(pid),
            Err(_) => false,
        }
    }

    /// PID recorded in the lockfile, if any.
    pub fn holder(&self, name: &str) -> Option<u32> {
        self.read_holder(&self.lock_path(name)).ok()
    }

    /// Unconditionally remove the lockfile. For `reset` only.
    pub fn remove(&self, name: &str) -> Result<(), LockError> {
        let path = self.lock_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LockError::Io { path, source: e }),
        }
    }

    fn read_holder(&self, path: &Path) -> Result<u32, LockError> {
        let body = std::fs::read_to_string(path).map_err(|e| LockError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        for line in body.lines() {
            if let Some(value) = line.strip_prefix("pid=") {
                return value.trim().parse().map_err(|_| LockError::Corrupt {
                    path: path.to_path_buf(),
                    detail: format!("bad pid value '{value}'"),
                });
            }
        }
        Err(LockError::Corrupt {
            path: path.to_path_buf(),
            detail: "missing pid= line".to_string(),
        })
    }
}
