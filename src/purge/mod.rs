//! purge
//!
//! History purge: rewrite every reachable revision so that matched paths
//! never existed (or so that only matched paths remain).
//!
//! # Modules
//!
//! - [`matcher`] - Path predicates, globs and content patterns
//! - [`engine`] - The rewrite itself and its rollback
//!
//! # Invariants
//!
//! - A dirty working tree is refused before any object is read
//! - Revisions whose tree and ancestry are untouched keep their ids
//! - Refs are only moved after the whole graph is rewritten, with CAS
//! - A second identical purge purges nothing

pub mod engine;
pub mod matcher;

pub use engine::{HistoryPurgeEngine, RefChange, RevisionFate, RewriteResult};
pub use matcher::{normalize_path, ContentCache, DirectoryPolicy, PathMatcher, PathPredicate};

use thiserror::Error;

use crate::git::GitError;

/// What to do with matched paths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PurgeMode {
    /// Drop matched paths
    #[default]
    RemovePath,
    /// Drop everything except matched paths
    KeepOnly,
}

impl std::fmt::Display for PurgeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PurgeMode::RemovePath => write!(f, "remove-path"),
            PurgeMode::KeepOnly => write!(f, "keep-only"),
        }
    }
}

/// A complete purge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeSpec {
    pub predicate: PathPredicate,
    pub mode: PurgeMode,
    pub directory_policy: DirectoryPolicy,
    /// Drop non-merge revisions left with their parent's tree
    pub prune_empty: bool,
}

impl PurgeSpec {
    /// Remove a set of exact paths with default policy.
    pub fn remove_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            predicate: PathPredicate::AnyOf(
                paths
                    .into_iter()
                    .map(|p| PathPredicate::Exact(p.into()))
                    .collect(),
            ),
            mode: PurgeMode::RemovePath,
            directory_policy: DirectoryPolicy::default(),
            prune_empty: false,
        }
    }

    /// Compile the predicate under this spec's directory policy.
    pub fn matcher(&self) -> Result<PathMatcher, PurgeError> {
        PathMatcher::compile(&self.predicate, self.directory_policy)
    }

    /// Exact paths and globs, as ignore-file lines.
    ///
    /// Content patterns have no ignore-file form and are skipped.
    pub fn ignore_patterns(&self) -> Vec<String> {
        fn collect(p: &PathPredicate, out: &mut Vec<String>) {
            match p {
                PathPredicate::Exact(path) => {
                    if let Ok(path) = normalize_path(path) {
                        out.push(format!("/{}", path));
                    }
                }
                PathPredicate::Glob(glob) => out.push(glob.clone()),
                PathPredicate::Content(_) => {}
                PathPredicate::AnyOf(all) => all.iter().for_each(|inner| collect(inner, out)),
            }
        }
        let mut out = Vec::new();
        collect(&self.predicate, &mut out);
        out
    }
}

/// Errors from purge operations.
#[derive(Debug, Error)]
pub enum PurgeError {
    /// Staged or unstaged changes would be lost by the rewrite.
    #[error("working tree has uncommitted changes ({details}); commit or stash them first")]
    DirtyWorkingState { details: String },

    /// Another purge is running, was interrupted, or refs moved underneath
    /// this one.
    #[error("rewrite conflict: {message}")]
    RewriteConflict { message: String },

    /// Malformed path, glob or content pattern.
    #[error("invalid predicate: {message}")]
    InvalidPredicate { message: String },

    /// Purge marker could not be written or removed.
    #[error("purge state file error: {0}")]
    Marker(#[from] std::io::Error),

    #[error(transparent)]
    Git(#[from] GitError),
}
