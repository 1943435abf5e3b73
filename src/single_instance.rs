//! Single-instance guard (spec §5 concurrency model: "at most one
//! reconciliation pass runs at a time").
//!
//! Uses an advisory file lock rather than a PID file — a PID file can go
//! stale if the process is killed without cleanup; an OS-held lock is
//! released automatically when the process exits, crash or not.

use crate::error::AgentError;
use fd_lock::RwLock;
use std::fs::File;
use std::path::Path;

pub struct SingleInstance {
    _lock: RwLock<File>,
}

impl SingleInstance {
    /// Acquires the lock at `lock_path`, failing fast with
    /// `AgentError::ErrAlreadyRunning` instead of blocking — a second
    /// invocation should exit immediately, not queue up behind the first.
    pub fn acquire(lock_path: &Path) -> Result<Self, AgentError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(lock_path)?;
        let mut lock = RwLock::new(file);
        {
            match lock.try_write() {
                Ok(guard) => std::mem::forget(guard),
                Err(_) => return Err(AgentError::ErrAlreadyRunning),
            }
        }
        Ok(SingleInstance { _lock: lock })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".cimian.lock");
        let first = SingleInstance::acquire(&lock_path).unwrap();
        let second = SingleInstance::acquire(&lock_path);
        assert!(matches!(second, Err(AgentError::ErrAlreadyRunning)));
        drop(first);
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".cimian.lock");
        {
            let _first = SingleInstance::acquire(&lock_path).unwrap();
        }
        let second = SingleInstance::acquire(&lock_path);
        assert!(second.is_ok());
    }
}
