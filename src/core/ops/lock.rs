//! core::ops::lock
//!
//! Exclusive advisory lock on a repository's local state.
//!
//! A deployment plan holds this lock from the first step to the audit
//! record. History rewrites do not compose, so a second invocation against
//! the same repository fails fast instead of queueing.
//!
//! # Invariants
//!
//! - Lock is held for the entire plan run
//! - Released on drop (RAII)
//! - Acquisition is non-blocking
//! - Repo-scoped: all worktrees contend for `<common_dir>/scour/lock`
//!
//! # Example
//!
//! ```ignore
//! use scour::core::ops::lock::RepoLock;
//!
//! let lock = RepoLock::acquire(&paths)?;
//! // ... run the plan ...
//! drop(lock);
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

use crate::core::paths::ScourPaths;

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process already holds the lock.
    #[error("another scour operation is in progress on this repository")]
    AlreadyLocked,

    /// Failed to create lock file or directory.
    #[error("failed to create lock: {0}")]
    CreateFailed(String),

    /// Failed to acquire the OS lock.
    #[error("failed to acquire lock: {0}")]
    AcquireFailed(String),

    /// Failed to release the lock.
    #[error("failed to release lock: {0}")]
    ReleaseFailed(String),
}

/// An exclusive lock on the repository.
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
    /// Some while the lock is held.
    file: Option<File>,
}

impl RepoLock {
    /// Attempt to acquire the repository lock.
    ///
    /// Uses OS-level file locking via `fs2`, which works across processes.
    ///
    /// # Errors
    ///
    /// - [`LockError::AlreadyLocked`] if another process holds the lock
    /// - [`LockError::CreateFailed`] if the lock file cannot be created
    /// - [`LockError::AcquireFailed`] if the OS lock cannot be acquired
    pub fn acquire(paths: &ScourPaths) -> Result<Self, LockError> {
        let dir = paths.repo_scour_dir();
        fs::create_dir_all(&dir).map_err(|e| {
            LockError::CreateFailed(format!("cannot create {}: {}", dir.display(), e))
        })?;

        let path = paths.repo_lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                LockError::CreateFailed(format!("cannot open {}: {}", path.display(), e))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "repository lock acquired");
                Ok(Self {
                    path,
                    file: Some(file),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(LockError::AlreadyLocked),
            // fs2 reports contention as a raw OS error on some platforms
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Err(LockError::AlreadyLocked)
            }
            Err(e) => Err(LockError::AcquireFailed(e.to_string())),
        }
    }

    /// Try to acquire the lock, returning None if already held.
    pub fn try_acquire(paths: &ScourPaths) -> Result<Option<Self>, LockError> {
        match Self::acquire(paths) {
            Ok(lock) => Ok(Some(lock)),
            Err(LockError::AlreadyLocked) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Check if this guard still holds the lock.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock before the guard goes out of scope.
    pub fn release(&mut self) -> Result<(), LockError> {
        if let Some(file) = self.file.take() {
            file.unlock()
                .map_err(|e| LockError::ReleaseFailed(e.to_string()))?;
            tracing::debug!(path = %self.path.display(), "repository lock released");
        }
        Ok(())
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_paths(dir: &Path) -> ScourPaths {
        ScourPaths::new(dir.to_path_buf(), dir.to_path_buf())
    }

    #[test]
    fn acquire_creates_scour_dir() {
        let temp = TempDir::new().expect("create temp dir");
        let paths = test_paths(temp.path());
        assert!(!paths.repo_scour_dir().exists());

        let lock = RepoLock::acquire(&paths).expect("acquire lock");
        assert!(lock.is_held());
        assert!(paths.repo_scour_dir().exists());
        assert_eq!(lock.path(), paths.repo_lock_path());
    }

    #[test]
    fn second_acquire_fails_fast() {
        let temp = TempDir::new().expect("create temp dir");
        let paths = test_paths(temp.path());

        let _lock = RepoLock::acquire(&paths).expect("first acquire");
        assert!(matches!(
            RepoLock::acquire(&paths),
            Err(LockError::AlreadyLocked)
        ));
        assert!(RepoLock::try_acquire(&paths).expect("try").is_none());
    }

    #[test]
    fn released_on_drop() {
        let temp = TempDir::new().expect("create temp dir");
        let paths = test_paths(temp.path());

        {
            let _lock = RepoLock::acquire(&paths).expect("first acquire");
        }
        assert!(RepoLock::acquire(&paths).expect("reacquire").is_held());
    }

    #[test]
    fn explicit_release_is_idempotent() {
        let temp = TempDir::new().expect("create temp dir");
        let paths = test_paths(temp.path());

        let mut lock = RepoLock::acquire(&paths).expect("acquire");
        lock.release().expect("first release");
        lock.release().expect("second release");
        assert!(!lock.is_held());
        assert!(RepoLock::acquire(&paths).is_ok());
    }

    #[test]
    fn worktree_contends_with_main_checkout() {
        let temp = TempDir::new().expect("create temp dir");
        let common = temp.path().to_path_buf();
        let main = ScourPaths::new(common.clone(), common.clone());
        let worktree = ScourPaths::new(common.join("worktrees").join("wt"), common);

        let _lock = RepoLock::acquire(&main).expect("main acquire");
        assert!(matches!(
            RepoLock::acquire(&worktree),
            Err(LockError::AlreadyLocked)
        ));
    }
}
