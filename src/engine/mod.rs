//! engine
//!
//! Plans, runs, verifies and rolls back deployments.
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> Purging -> IgnoreUpdating -> Retargeting -> Pushing -> Verifying -> Committed
//!   \_______________________ any failure ______________________/
//!                              |
//!                         RollingBack -> Idle
//! ```
//!
//! States whose steps are absent from a plan are skipped.
//!
//! # Modules
//!
//! - [`plan`] - [`DeploymentPlan`] and its builder; each step declares its rollback
//! - [`orchestrator`] - runs a plan under the repository lock
//! - [`rollback`] - undo records captured while steps run
//! - [`verify`] - read-only post-operation checks
//!
//! # Failure Classes
//!
//! Every [`DeployError`] maps to an [`ErrorClass`], which fixes the exit
//! code. A class is about what happened to the repository, not about which
//! step raised it: a policy refusal raised after earlier steps ran is still
//! a refusal once those steps are rolled back.

pub mod orchestrator;
pub mod plan;
pub mod rollback;
pub mod verify;

pub use orchestrator::{DeployReport, DeployState, Orchestrator, OrchestratorSettings, PushRecord};
pub use plan::{DeploymentPlan, DeploymentPlanBuilder, PlanError, PlanStep, RollbackKind, StepKind};
pub use rollback::{RollbackEntry, RollbackReport, RollbackStatus, Undo};
pub use verify::{RetryPolicy, VerificationProbe};

use std::path::PathBuf;

use thiserror::Error;

use crate::core::ops::audit::AuditError;
use crate::core::ops::lock::LockError;
use crate::git::GitError;
use crate::purge::PurgeError;
use crate::remotes::RegistryError;

/// Global settings derived from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub cwd: Option<PathBuf>,
    pub debug: bool,
    pub quiet: bool,
}

/// How a failure left the repository, and what exit code it earns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Refused by policy before anything changed
    Policy,
    /// Lost a race or named something that clashes; nothing changed
    Conflict,
    /// Network trouble that a retry may clear
    Transient,
    /// A step failed and rollback ran
    Fatal,
    /// The remote may hold part of a push
    Divergence,
}

impl ErrorClass {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorClass::Policy | ErrorClass::Conflict => 1,
            ErrorClass::Transient | ErrorClass::Fatal => 2,
            ErrorClass::Divergence => 3,
        }
    }
}

/// Class of a registry error, also used by commands that touch the
/// registry outside a plan.
pub fn registry_error_class(err: &RegistryError) -> ErrorClass {
    match err {
        RegistryError::DuplicateName { .. }
        | RegistryError::RoleConflict { .. }
        | RegistryError::UnknownRemote { .. }
        | RegistryError::CredentialInUrl { .. }
        | RegistryError::InvalidName { .. } => ErrorClass::Conflict,
        RegistryError::Git(g) if g.is_transient() => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

/// Errors from deployment runs.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("working tree has uncommitted changes ({details}); commit or stash them first")]
    DirtyWorkingState { details: String },

    #[error("refusing to rewrite history on '{remote}': {reason}")]
    NonFastForwardRejected { remote: String, reason: String },

    #[error("another scour operation is in progress in this repository")]
    OperationInProgress,

    #[error("rewrite conflict: {message}")]
    RewriteConflict { message: String },

    /// The remote refused some refs and kept its previous tips.
    #[error("push to '{remote}' rejected: {detail}")]
    PushRejected { remote: String, detail: String },

    #[error("verification failed: {check}")]
    VerificationFailed { check: String },

    /// A push may have landed partly. Never resolved automatically.
    #[error("remote '{remote}' may be partially updated: {detail}")]
    PartialPushDivergence { remote: String, detail: String },

    #[error("ignore file {path}: {source}")]
    IgnoreFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid plan: {0}")]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Purge(PurgeError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("lock error: {0}")]
    Lock(LockError),

    #[error("audit log error: {0}")]
    Audit(#[from] AuditError),

    /// A step failed after earlier steps ran; `rollback` says how undoing went.
    #[error("step '{step}' failed: {source}")]
    Aborted {
        step: String,
        #[source]
        source: Box<DeployError>,
        rollback: RollbackReport,
    },
}

impl From<PurgeError> for DeployError {
    fn from(err: PurgeError) -> Self {
        match err {
            PurgeError::DirtyWorkingState { details } => DeployError::DirtyWorkingState { details },
            PurgeError::RewriteConflict { message } => DeployError::RewriteConflict { message },
            PurgeError::Git(e) => DeployError::Git(e),
            other => DeployError::Purge(other),
        }
    }
}

impl From<LockError> for DeployError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::AlreadyLocked => DeployError::OperationInProgress,
            other => DeployError::Lock(other),
        }
    }
}

impl DeployError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DeployError::DirtyWorkingState { .. } | DeployError::NonFastForwardRejected { .. } => {
                ErrorClass::Policy
            }
            DeployError::OperationInProgress | DeployError::RewriteConflict { .. } => {
                ErrorClass::Conflict
            }
            DeployError::Registry(e) => registry_error_class(e),
            DeployError::Purge(PurgeError::InvalidPredicate { .. }) => ErrorClass::Policy,
            DeployError::Plan(_) => ErrorClass::Policy,
            DeployError::Git(e) if e.is_transient() => ErrorClass::Transient,
            DeployError::PartialPushDivergence { .. } => ErrorClass::Divergence,
            DeployError::Aborted {
                source, rollback, ..
            } => {
                if !rollback.is_complete() {
                    return ErrorClass::Fatal;
                }
                match source.class() {
                    class @ (ErrorClass::Policy | ErrorClass::Conflict | ErrorClass::Divergence) => {
                        class
                    }
                    ErrorClass::Transient | ErrorClass::Fatal => ErrorClass::Fatal,
                }
            }
            _ => ErrorClass::Fatal,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.class().exit_code()
    }

    /// The rollback report, if this error came with one.
    pub fn rollback(&self) -> Option<&RollbackReport> {
        match self {
            DeployError::Aborted { rollback, .. } => Some(rollback),
            _ => None,
        }
    }

    /// The error that triggered a rollback, or self.
    pub fn root(&self) -> &DeployError {
        match self {
            DeployError::Aborted { source, .. } => source.root(),
            other => other,
        }
    }
}
