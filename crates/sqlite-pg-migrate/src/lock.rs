//! Single-run lock marker.
//!
//! A file created exclusively at the start of a run, holding the PID and run
//! id. It is removed when the guard drops, on success and failure alike.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{MigrateError, Result};

/// Holds the lock until dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Create the lock file, refusing if it already exists.
    pub fn acquire(path: &Path, run_id: &str) -> Result<Self> {
        let mut file = match OpenOptions::new().create_new(true).write(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(MigrateError::Locked(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let guard = Self {
            path: path.to_path_buf(),
        };
        writeln!(file, "pid={}", std::process::id())?;
        writeln!(file, "run_id={}", run_id)?;
        file.sync_all()?;
        debug!("Acquired lock {}", path.display());
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove lock {}: {}", self.path.display(), e);
        }
    }
}

/// Whether a run currently holds the lock at `path`.
pub fn is_locked(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db.migrate.lock");

        let guard = LockGuard::acquire(&path, "run-1").unwrap();
        assert!(is_locked(&path));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("run_id=run-1"));
        assert!(content.contains(&format!("pid={}", std::process::id())));

        let err = LockGuard::acquire(&path, "run-2").unwrap_err();
        assert!(matches!(err, MigrateError::Locked(_)));

        drop(guard);
        assert!(!is_locked(&path));
        LockGuard::acquire(&path, "run-3").unwrap();
    }
}
