//! engine::plan
//!
//! Deployment plans.
//!
//! A plan is pure data: building one performs no I/O and reads no
//! repository state. Steps must appear in lifecycle order (purge, ignore
//! update, retarget, push, verify) and each declares how it is undone.
//!
//! # Example
//!
//! ```
//! use scour::engine::plan::{DeploymentPlanBuilder, RollbackKind};
//! use scour::purge::PurgeSpec;
//!
//! let plan = DeploymentPlanBuilder::new("deploy")
//!     .purge(PurgeSpec::remove_paths(["config/secret.env"]))
//!     .push("mirror", Vec::new())
//!     .verify_remote("mirror", Vec::new())
//!     .allow_history_rewrite(true)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(plan.steps[0].rollback_kind(), RollbackKind::RestoreRefs);
//! assert!(plan.purges() && plan.pushes());
//! ```

use std::fmt;

use thiserror::Error;

use crate::core::ops::audit::OpId;
use crate::core::types::RefName;
use crate::purge::{PurgeMode, PurgeSpec};

/// Errors from plan construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan has no steps")]
    Empty,

    #[error("step '{step}' cannot follow '{after}'")]
    OutOfOrder { step: String, after: String },

    #[error("{0}")]
    Invalid(String),
}

/// Lifecycle phase a step belongs to, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StepKind {
    Purge,
    IgnoreUpdate,
    Retarget,
    Push,
    Verify,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepKind::Purge => "purge",
            StepKind::IgnoreUpdate => "ignore-update",
            StepKind::Retarget => "retarget",
            StepKind::Push => "push",
            StepKind::Verify => "verify",
        };
        f.write_str(name)
    }
}

/// How a completed step is undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackKind {
    /// CAS every moved ref back, then reset the index
    RestoreRefs,
    /// Write back the old ignore file, or delete a file we created
    RestoreIgnoreFile,
    /// Put the previous URL back in the registry and git config
    RestoreUrl,
    /// Nothing local to undo
    None,
}

/// One step of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanStep {
    /// Rewrite local history.
    Purge { spec: PurgeSpec },

    /// Append patterns to the ignore file.
    UpdateIgnore { patterns: Vec<String> },

    /// Point a registered remote at a new URL.
    Retarget { remote: String, url: String },

    /// Push refs to a remote. Empty `refs` means the HEAD branch.
    Push { remote: String, refs: Vec<RefName> },

    /// No reachable revision contains a match for `spec`.
    VerifyAbsent { spec: PurgeSpec },

    /// The remote's refs equal the local tips. Empty `refs` means the HEAD branch.
    VerifyRemote { remote: String, refs: Vec<RefName> },

    /// Git config holds `url` for the remote.
    VerifyUrl { remote: String, url: String },
}

impl PlanStep {
    pub fn kind(&self) -> StepKind {
        match self {
            PlanStep::Purge { .. } => StepKind::Purge,
            PlanStep::UpdateIgnore { .. } => StepKind::IgnoreUpdate,
            PlanStep::Retarget { .. } => StepKind::Retarget,
            PlanStep::Push { .. } => StepKind::Push,
            PlanStep::VerifyAbsent { .. }
            | PlanStep::VerifyRemote { .. }
            | PlanStep::VerifyUrl { .. } => StepKind::Verify,
        }
    }

    pub fn rollback_kind(&self) -> RollbackKind {
        match self.kind() {
            StepKind::Purge => RollbackKind::RestoreRefs,
            StepKind::IgnoreUpdate => RollbackKind::RestoreIgnoreFile,
            StepKind::Retarget => RollbackKind::RestoreUrl,
            // The remote is external state
            StepKind::Push => RollbackKind::None,
            StepKind::Verify => RollbackKind::None,
        }
    }

    /// Human-readable description, used in output and the audit log.
    pub fn description(&self) -> String {
        fn refs_label(refs: &[RefName]) -> String {
            if refs.is_empty() {
                "HEAD branch".to_string()
            } else {
                refs.iter()
                    .map(|r| r.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        }

        match self {
            PlanStep::Purge { spec } => match spec.mode {
                PurgeMode::RemovePath => format!("purge {} from history", spec.predicate),
                PurgeMode::KeepOnly => format!("keep only {} in history", spec.predicate),
            },
            PlanStep::UpdateIgnore { patterns } => {
                format!("add {} to ignore file", patterns.join(", "))
            }
            PlanStep::Retarget { remote, url } => format!("point {} at {}", remote, url),
            PlanStep::Push { remote, refs } => format!("push {} to {}", refs_label(refs), remote),
            PlanStep::VerifyAbsent { spec } => format!("verify {} absent", spec.predicate),
            PlanStep::VerifyRemote { remote, refs } => {
                format!("verify {} on {}", refs_label(refs), remote)
            }
            PlanStep::VerifyUrl { remote, url } => format!("verify {} is {}", remote, url),
        }
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A validated, ordered deployment.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub op_id: OpId,
    /// Command name recorded in the audit log
    pub command: String,
    pub steps: Vec<PlanStep>,
    /// Consent to purge-then-push and to non-fast-forward pushes
    pub allow_history_rewrite: bool,
}

impl DeploymentPlan {
    pub fn purges(&self) -> bool {
        self.steps.iter().any(|s| s.kind() == StepKind::Purge)
    }

    pub fn pushes(&self) -> bool {
        self.steps.iter().any(|s| s.kind() == StepKind::Push)
    }

    /// Numbered step list for previews.
    pub fn preview(&self) -> String {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, s))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Builder for [`DeploymentPlan`].
#[derive(Debug)]
pub struct DeploymentPlanBuilder {
    command: String,
    steps: Vec<PlanStep>,
    allow_history_rewrite: bool,
}

impl DeploymentPlanBuilder {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            steps: Vec::new(),
            allow_history_rewrite: false,
        }
    }

    pub fn step(mut self, step: PlanStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn purge(self, spec: PurgeSpec) -> Self {
        self.step(PlanStep::Purge { spec })
    }

    pub fn update_ignore(self, patterns: Vec<String>) -> Self {
        self.step(PlanStep::UpdateIgnore { patterns })
    }

    pub fn retarget(self, remote: impl Into<String>, url: impl Into<String>) -> Self {
        self.step(PlanStep::Retarget {
            remote: remote.into(),
            url: url.into(),
        })
    }

    pub fn push(self, remote: impl Into<String>, refs: Vec<RefName>) -> Self {
        self.step(PlanStep::Push {
            remote: remote.into(),
            refs,
        })
    }

    pub fn verify_absent(self, spec: PurgeSpec) -> Self {
        self.step(PlanStep::VerifyAbsent { spec })
    }

    pub fn verify_remote(self, remote: impl Into<String>, refs: Vec<RefName>) -> Self {
        self.step(PlanStep::VerifyRemote {
            remote: remote.into(),
            refs,
        })
    }

    pub fn verify_url(self, remote: impl Into<String>, url: impl Into<String>) -> Self {
        self.step(PlanStep::VerifyUrl {
            remote: remote.into(),
            url: url.into(),
        })
    }

    pub fn allow_history_rewrite(mut self, allow: bool) -> Self {
        self.allow_history_rewrite = allow;
        self
    }

    /// Validate order and contents.
    pub fn build(self) -> Result<DeploymentPlan, PlanError> {
        if self.steps.is_empty() {
            return Err(PlanError::Empty);
        }

        for pair in self.steps.windows(2) {
            if pair[1].kind() < pair[0].kind() {
                return Err(PlanError::OutOfOrder {
                    step: pair[1].kind().to_string(),
                    after: pair[0].kind().to_string(),
                });
            }
        }

        for step in &self.steps {
            match step {
                PlanStep::UpdateIgnore { patterns } if patterns.is_empty() => {
                    return Err(PlanError::Invalid("ignore update with no patterns".into()));
                }
                PlanStep::Retarget { remote, url } | PlanStep::VerifyUrl { remote, url }
                    if remote.is_empty() || url.is_empty() =>
                {
                    return Err(PlanError::Invalid(format!(
                        "step '{}' needs a remote and a URL",
                        step.kind()
                    )));
                }
                PlanStep::Push { remote, .. } | PlanStep::VerifyRemote { remote, .. }
                    if remote.is_empty() =>
                {
                    return Err(PlanError::Invalid(format!(
                        "step '{}' needs a remote",
                        step.kind()
                    )));
                }
                _ => {}
            }
        }

        Ok(DeploymentPlan {
            op_id: OpId::new(),
            command: self.command,
            steps: self.steps,
            allow_history_rewrite: self.allow_history_rewrite,
        })
    }
}
