//! core::paths
//!
//! Centralized path routing for scour storage locations.
//!
//! # Storage Layout
//!
//! All repository-scoped data lives under `<common_dir>/scour/`:
//! - `config.toml` - Repository configuration
//! - `remotes.toml` - Remote registry (URLs, roles, auth references)
//! - `lock` - Exclusive advisory lock file
//! - `purge-state.json` - Marker present while a purge is rewriting
//! - `audit.jsonl` - Append-only operation audit log
//!
//! Linked worktrees share `common_dir`, so they share the lock and the
//! audit log with the main checkout.
//!
//! # Example
//!
//! ```
//! use scour::core::paths::ScourPaths;
//! use std::path::PathBuf;
//!
//! let paths = ScourPaths::new(
//!     PathBuf::from("/repo/.git"),
//!     PathBuf::from("/repo/.git"),
//! );
//!
//! assert_eq!(
//!     paths.repo_lock_path(),
//!     PathBuf::from("/repo/.git/scour/lock")
//! );
//! ```

use std::path::{Path, PathBuf};

use crate::git::RepositoryHandle;

/// Centralized path routing for scour storage.
///
/// No code outside this module should compute `*.join("scour")` paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScourPaths {
    /// Per-worktree git directory.
    pub git_dir: PathBuf,
    /// Shared git directory (refs, objects, config).
    pub common_dir: PathBuf,
}

impl ScourPaths {
    /// Create paths from a git_dir and common_dir.
    pub fn new(git_dir: PathBuf, common_dir: PathBuf) -> Self {
        Self {
            git_dir,
            common_dir,
        }
    }

    /// Create paths for whatever repository a handle is bound to.
    pub fn for_handle(handle: &dyn RepositoryHandle) -> Self {
        Self::new(handle.git_dir(), handle.common_dir())
    }

    /// Root scour directory under common_dir.
    pub fn repo_scour_dir(&self) -> PathBuf {
        self.common_dir.join("scour")
    }

    /// `<common_dir>/scour/config.toml`
    pub fn repo_config_path(&self) -> PathBuf {
        self.repo_scour_dir().join("config.toml")
    }

    /// `<common_dir>/scour/remotes.toml`
    pub fn repo_remotes_path(&self) -> PathBuf {
        self.repo_scour_dir().join("remotes.toml")
    }

    /// `<common_dir>/scour/lock`
    pub fn repo_lock_path(&self) -> PathBuf {
        self.repo_scour_dir().join("lock")
    }

    /// `<common_dir>/scour/purge-state.json`
    pub fn repo_purge_marker_path(&self) -> PathBuf {
        self.repo_scour_dir().join("purge-state.json")
    }

    /// `<common_dir>/scour/audit.jsonl`
    pub fn repo_audit_log_path(&self) -> PathBuf {
        self.repo_scour_dir().join("audit.jsonl")
    }

    /// Check if this is a linked worktree.
    pub fn is_worktree(&self) -> bool {
        self.git_dir != self.common_dir
    }

    /// Get the common_dir as a Path reference.
    pub fn common_dir(&self) -> &Path {
        &self.common_dir
    }
}
