//! git::error
//!
//! Typed failure categories for repository handle operations.
//!
//! Both handle implementations normalize their failures into [`GitError`],
//! so callers can branch on the category (CAS mismatch, network timeout,
//! cancellation) without knowing which engine produced it.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::TypeError;

/// Errors from repository handle operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Not inside a Git repository.
    #[error("not a git repository: {path}")]
    NotARepo {
        /// The path that was searched
        path: PathBuf,
    },

    /// Repository is bare (no working directory).
    #[error("bare repository not supported")]
    BareRepo,

    /// Requested ref does not exist.
    #[error("ref not found: {refname}")]
    RefNotFound {
        /// The ref that was not found
        refname: String,
    },

    /// Compare-and-swap precondition failed.
    ///
    /// The ref moved between the read that planned the update and the
    /// update itself.
    #[error("CAS failed for {refname}: expected {expected}, found {actual}")]
    CasFailed {
        /// The ref being updated
        refname: String,
        /// The expected old value
        expected: String,
        /// The actual current value
        actual: String,
    },

    /// Object not found in repository.
    #[error("object not found: {oid}")]
    ObjectNotFound {
        /// The OID that was not found
        oid: String,
    },

    /// Invalid object id format.
    #[error("invalid object id: {oid}")]
    InvalidOid {
        /// The invalid OID string
        oid: String,
    },

    /// Invalid ref name format.
    #[error("invalid ref name: {message}")]
    InvalidRefName {
        /// Description of the problem
        message: String,
    },

    /// Remote is not configured.
    #[error("remote not found: {name}")]
    RemoteNotFound {
        /// The remote name
        name: String,
    },

    /// A fetch or push exceeded its time budget.
    #[error("network operation timed out after {secs}s: {operation}")]
    Timeout {
        /// fetch or push
        operation: String,
        /// The budget that was exceeded
        secs: u64,
    },

    /// A fetch or push was cancelled by the user.
    #[error("network operation cancelled: {operation}")]
    Cancelled {
        /// fetch or push
        operation: String,
    },

    /// Transport-level failure (connection, authentication, protocol).
    #[error("network error during {operation}: {message}")]
    Network {
        /// fetch or push
        operation: String,
        /// Engine message, never contains credentials
        message: String,
    },

    /// Permission or filesystem error.
    #[error("repository access error: {message}")]
    AccessError {
        /// Description of the error
        message: String,
    },

    /// Internal engine error.
    #[error("git error: {message}")]
    Internal {
        /// The error message
        message: String,
    },
}

impl GitError {
    /// Create a GitError from a git2::Error with richer context.
    pub(crate) fn from_git2(err: git2::Error, context: &str) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => {
                if context.starts_with("refs/") || context.contains("ref") {
                    GitError::RefNotFound {
                        refname: context.to_string(),
                    }
                } else {
                    GitError::ObjectNotFound {
                        oid: context.to_string(),
                    }
                }
            }
            git2::ErrorCode::InvalidSpec => GitError::InvalidOid {
                oid: context.to_string(),
            },
            git2::ErrorCode::Locked => GitError::AccessError {
                message: format!("repository is locked: {}", err.message()),
            },
            _ => GitError::Internal {
                message: format!("{}: {}", context, err.message()),
            },
        }
    }

    /// Whether this error is a transport failure worth retrying for a
    /// read-only operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, GitError::Timeout { .. } | GitError::Network { .. })
    }
}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        match err.code() {
            git2::ErrorCode::NotFound => GitError::RefNotFound {
                refname: err.message().to_string(),
            },
            git2::ErrorCode::InvalidSpec => GitError::InvalidOid {
                oid: err.message().to_string(),
            },
            _ => GitError::Internal {
                message: err.message().to_string(),
            },
        }
    }
}

impl From<TypeError> for GitError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidOid(msg) => GitError::InvalidOid { oid: msg },
            TypeError::InvalidRefName(msg) => GitError::InvalidRefName { message: msg },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formatting() {
        let err = GitError::CasFailed {
            refname: "refs/heads/main".to_string(),
            expected: "abc".to_string(),
            actual: "def".to_string(),
        };
        assert!(err.to_string().contains("CAS failed"));
        assert!(err.to_string().contains("refs/heads/main"));

        let err = GitError::Timeout {
            operation: "push".to_string(),
            secs: 30,
        };
        assert_eq!(err.to_string(), "network operation timed out after 30s: push");
    }

    #[test]
    fn transient_classification() {
        assert!(GitError::Timeout {
            operation: "fetch".into(),
            secs: 1
        }
        .is_transient());
        assert!(GitError::Network {
            operation: "fetch".into(),
            message: "connection reset".into()
        }
        .is_transient());
        assert!(!GitError::Cancelled {
            operation: "fetch".into()
        }
        .is_transient());
        assert!(!GitError::BareRepo.is_transient());
    }

    #[test]
    fn type_errors_convert() {
        let err: GitError = TypeError::InvalidRefName("HEAD".into()).into();
        assert!(matches!(err, GitError::InvalidRefName { .. }));
    }
}
