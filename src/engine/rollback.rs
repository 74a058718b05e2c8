//! engine::rollback
//!
//! Undo records and their execution.
//!
//! Each step that changes local state leaves an [`Undo`] behind, captured
//! before the change is made. On failure the orchestrator replays them
//! newest first: the failing step's own record, then every earlier
//! step's, each exactly once.
//!
//! Ref restores are CAS against the value the step wrote. A ref moved by
//! someone else since then is left alone and reported as failed; other
//! records are still replayed.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use crate::core::paths::ScourPaths;
use crate::git::RepositoryHandle;
use crate::purge::{HistoryPurgeEngine, RewriteResult};
use crate::remotes::{ChangeRecord, RemoteRegistry};

/// How to undo one completed (or half-completed) step.
#[derive(Debug, Clone)]
pub enum Undo {
    /// Put purged refs back
    Refs(RewriteResult),
    /// Restore the ignore file; `previous: None` means delete it
    IgnoreFile {
        path: PathBuf,
        previous: Option<Vec<u8>>,
    },
    /// Revert a URL change in the registry and git config
    Url(ChangeRecord),
    /// The step has nothing to undo
    Nothing { reason: String },
}

/// What everything an undo touches lives in.
pub struct RollbackTarget<'a> {
    pub handle: &'a dyn RepositoryHandle,
    pub registry: &'a mut RemoteRegistry,
    pub paths: &'a ScourPaths,
}

impl Undo {
    pub fn nothing(reason: impl Into<String>) -> Self {
        Undo::Nothing {
            reason: reason.into(),
        }
    }

    /// Run the undo.
    ///
    /// Returns `Skipped` for [`Undo::Nothing`].
    pub fn apply(&self, target: &mut RollbackTarget<'_>) -> RollbackStatus {
        let result = match self {
            Undo::Nothing { .. } => return RollbackStatus::Skipped,
            Undo::Refs(rewrite) => {
                if rewrite.ref_updates.is_empty() {
                    return RollbackStatus::Skipped;
                }
                HistoryPurgeEngine::new(target.handle, target.paths.clone())
                    .restore(rewrite)
                    .map_err(|e| e.to_string())
            }
            Undo::IgnoreFile { path, previous } => match previous {
                Some(bytes) => fs::write(path, bytes),
                None => match fs::remove_file(path) {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            }
            .map_err(|e| format!("{}: {}", path.display(), e)),
            Undo::Url(change) => {
                let inverse = change.inverse();
                target
                    .registry
                    .retarget(&inverse.name, &inverse.new_url)
                    .and_then(|_| target.registry.apply(target.handle, &inverse))
                    .and_then(|_| target.registry.save(target.paths))
                    .map_err(|e| e.to_string())
            }
        };

        match result {
            Ok(()) => RollbackStatus::Succeeded,
            Err(message) => RollbackStatus::Failed(message),
        }
    }

    /// One-line description for reports.
    pub fn describe(&self) -> String {
        match self {
            Undo::Refs(rewrite) => format!("restore {} refs", rewrite.ref_updates.len()),
            Undo::IgnoreFile {
                path,
                previous: Some(_),
            } => format!("restore {}", path.display()),
            Undo::IgnoreFile {
                path,
                previous: None,
            } => format!("remove {}", path.display()),
            Undo::Url(change) => format!("point {} back at {}", change.name, change.old_url),
            Undo::Nothing { reason } => reason.clone(),
        }
    }
}

/// Outcome of one rollback action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackStatus {
    Succeeded,
    Failed(String),
    /// No local state to undo
    Skipped,
}

impl fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackStatus::Succeeded => write!(f, "ok"),
            RollbackStatus::Failed(msg) => write!(f, "FAILED: {}", msg),
            RollbackStatus::Skipped => write!(f, "skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackEntry {
    pub step: String,
    pub status: RollbackStatus,
}

/// Rollback actions in the order they ran.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub entries: Vec<RollbackEntry>,
}

impl RollbackReport {
    pub fn record(&mut self, step: impl Into<String>, status: RollbackStatus) {
        self.entries.push(RollbackEntry {
            step: step.into(),
            status,
        });
    }

    /// True if no action failed.
    pub fn is_complete(&self) -> bool {
        !self
            .entries
            .iter()
            .any(|e| matches!(e.status, RollbackStatus::Failed(_)))
    }

    pub fn summary(&self) -> String {
        let failed = self
            .entries
            .iter()
            .filter(|e| matches!(e.status, RollbackStatus::Failed(_)))
            .count();
        if failed == 0 {
            format!("rolled back {} steps", self.entries.len())
        } else {
            format!(
                "partial rollback: {} of {} steps failed",
                failed,
                self.entries.len()
            )
        }
    }
}
