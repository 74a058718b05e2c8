//! engine::orchestrator
//!
//! Runs a [`DeploymentPlan`].
//!
//! # Run
//!
//! 1. Take the repository lock; a concurrent run fails fast
//! 2. Preflight: refuse purge-then-push without consent, and a dirty
//!    working tree when the plan purges
//! 3. Run steps in order, keeping each step's [`Undo`]
//! 4. On failure, undo the failing step, then every earlier step newest
//!    first, and return the error with the rollback report
//! 5. Append one audit record, whatever happened
//!
//! # Pushes
//!
//! Remote tips are listed before pushing. A tip that is not an ancestor of
//! the local one needs `allow_history_rewrite`, and only those refs are
//! pushed with force. Pushes are never retried: after any push failure the
//! remote is listed again, and if any ref moved the run stops with
//! [`DeployError::PartialPushDivergence`] without touching anything else,
//! earlier steps included.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use super::plan::{DeploymentPlan, PlanError, PlanStep, RollbackKind, StepKind};
use super::rollback::{RollbackReport, RollbackStatus, RollbackTarget, Undo};
use super::verify::{RetryPolicy, VerificationProbe};
use super::DeployError;
use crate::core::config::Config;
use crate::core::ops::audit::{AuditLog, AuditRecord, EntryStatus, OpId, Outcome};
use crate::core::ops::lock::RepoLock;
use crate::core::paths::ScourPaths;
use crate::core::types::{Oid, RefName};
use crate::git::{CancelFlag, Credential, GitError, NetworkBudget, RefEntry, RepositoryHandle};
use crate::purge::{HistoryPurgeEngine, RewriteResult};
use crate::remotes::{ChangeRecord, CredentialResolver, RemoteEndpoint, RemoteRegistry};

/// Orchestrator states, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Idle,
    Purging,
    IgnoreUpdating,
    Retargeting,
    Pushing,
    Verifying,
    Committed,
    RollingBack,
}

impl From<StepKind> for DeployState {
    fn from(kind: StepKind) -> Self {
        match kind {
            StepKind::Purge => DeployState::Purging,
            StepKind::IgnoreUpdate => DeployState::IgnoreUpdating,
            StepKind::Retarget => DeployState::Retargeting,
            StepKind::Push => DeployState::Pushing,
            StepKind::Verify => DeployState::Verifying,
        }
    }
}

/// Tunables, usually from [`Config`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Ignore file, relative to the working tree
    pub ignore_file: String,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.network_timeout(),
            retry: RetryPolicy::from_config(config),
            ignore_file: config.ignore_file().to_string(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            ignore_file: ".gitignore".to_string(),
        }
    }
}

/// One ref moved on a remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRecord {
    pub remote: String,
    pub refname: RefName,
    /// Remote tip before the push, None if the ref was new
    pub old: Option<Oid>,
    pub new: Oid,
    pub forced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: String,
    pub detail: String,
}

/// What a successful run did.
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub op_id: OpId,
    pub transitions: Vec<DeployState>,
    pub steps: Vec<StepOutcome>,
    pub rewrite: Option<RewriteResult>,
    pub retargets: Vec<ChangeRecord>,
    pub pushes: Vec<PushRecord>,
    pub warnings: Vec<String>,
}

impl DeployReport {
    fn new(op_id: OpId) -> Self {
        Self {
            op_id,
            transitions: Vec::new(),
            steps: Vec::new(),
            rewrite: None,
            retargets: Vec::new(),
            pushes: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Runs deployment plans against one repository.
pub struct Orchestrator<'a> {
    handle: &'a dyn RepositoryHandle,
    paths: ScourPaths,
    registry: RemoteRegistry,
    credentials: &'a CredentialResolver,
    settings: OrchestratorSettings,
    cancel: CancelFlag,
    transitions: Vec<DeployState>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        handle: &'a dyn RepositoryHandle,
        paths: ScourPaths,
        registry: RemoteRegistry,
        credentials: &'a CredentialResolver,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            handle,
            paths,
            registry,
            credentials,
            settings,
            cancel: CancelFlag::new(),
            transitions: vec![DeployState::Idle],
        }
    }

    /// Share a cancel flag with a signal handler.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Every state entered during the last run, in order.
    pub fn transitions(&self) -> &[DeployState] {
        &self.transitions
    }

    pub fn registry(&self) -> &RemoteRegistry {
        &self.registry
    }

    fn enter(&mut self, state: DeployState) {
        if self.transitions.last() != Some(&state) {
            tracing::debug!(?state, "entering state");
            self.transitions.push(state);
        }
    }

    fn probe(&self) -> VerificationProbe {
        VerificationProbe::new(self.settings.retry, self.settings.timeout, self.cancel.clone())
    }

    /// Run a plan.
    ///
    /// # Errors
    ///
    /// - Preflight refusals and lock contention, before anything changes
    /// - [`DeployError::Aborted`] after a step failure, carrying the
    ///   triggering error and the rollback report. When the root is
    ///   [`DeployError::PartialPushDivergence`] the report is empty.
    pub fn run(&mut self, plan: DeploymentPlan) -> Result<DeployReport, DeployError> {
        self.transitions = vec![DeployState::Idle];
        let mut audit = AuditRecord::with_op_id(plan.op_id.clone(), plan.command.clone());
        tracing::info!(op_id = %plan.op_id, command = %plan.command, steps = plan.steps.len(), "starting plan");

        let mut result = self.run_steps(&plan, &mut audit);

        match &result {
            Ok(_) => audit.finish(Outcome::Committed),
            Err(err) => {
                let outcome = match err {
                    _ if matches!(err.root(), DeployError::PartialPushDivergence { .. }) => {
                        Outcome::Diverged
                    }
                    DeployError::Aborted { rollback, .. } if rollback.is_complete() => {
                        Outcome::RolledBack
                    }
                    DeployError::Aborted { .. } => Outcome::Incomplete,
                    _ => Outcome::Refused,
                };
                audit.finish_with_error(outcome, err);
            }
        }

        if let Err(e) = AuditLog::new(&self.paths).append(&audit) {
            tracing::warn!(error = %e, "failed to append audit record");
            if let Ok(report) = &mut result {
                report.warnings.push(format!("audit record not written: {}", e));
            }
        }
        result
    }

    fn run_steps(
        &mut self,
        plan: &DeploymentPlan,
        audit: &mut AuditRecord,
    ) -> Result<DeployReport, DeployError> {
        let _lock = RepoLock::acquire(&self.paths)?;
        self.preflight(plan)?;

        let mut report = DeployReport::new(plan.op_id.clone());
        let mut done: Vec<(String, Undo)> = Vec::new();

        for step in &plan.steps {
            self.enter(step.kind().into());
            let description = step.description();
            tracing::info!(step = %description, "running step");

            let mut pending: Option<Undo> = None;
            let outcome = self
                .execute(step, plan, &mut report, &mut pending)
                .map_err(|err| divergence_after_push(step, &report, err));

            match outcome {
                Ok(detail) => {
                    tracing::info!(step = %description, %detail, "step succeeded");
                    audit.step_succeeded(&description, &detail);
                    report.steps.push(StepOutcome {
                        step: description.clone(),
                        detail,
                    });
                    let undo = pending.unwrap_or_else(|| match step.rollback_kind() {
                        RollbackKind::None => Undo::nothing("no local state to undo"),
                        _ => Undo::nothing("step changed nothing"),
                    });
                    done.push((description, undo));
                }
                Err(err @ DeployError::PartialPushDivergence { .. }) => {
                    tracing::error!(step = %description, error = %err, "remote diverged; stopping without rollback");
                    audit.step_failed(&description, err.to_string());
                    return Err(DeployError::Aborted {
                        step: description,
                        source: Box::new(err),
                        rollback: RollbackReport::default(),
                    });
                }
                Err(err) => {
                    tracing::warn!(step = %description, error = %err, "step failed; rolling back");
                    audit.step_failed(&description, err.to_string());
                    let rollback = self.roll_back(&description, pending, done, audit);
                    return Err(DeployError::Aborted {
                        step: description,
                        source: Box::new(err),
                        rollback,
                    });
                }
            }
        }

        self.enter(DeployState::Committed);
        report.transitions = self.transitions.clone();
        Ok(report)
    }

    fn preflight(&self, plan: &DeploymentPlan) -> Result<(), DeployError> {
        if plan.purges() {
            let status = self.handle.worktree_status()?;
            if !status.is_clean() {
                return Err(DeployError::DirtyWorkingState {
                    details: status.describe(),
                });
            }
        }
        Ok(())
    }

    /// Undo the failing step, then completed steps newest first.
    fn roll_back(
        &mut self,
        failed_step: &str,
        pending: Option<Undo>,
        done: Vec<(String, Undo)>,
        audit: &mut AuditRecord,
    ) -> RollbackReport {
        self.enter(DeployState::RollingBack);
        let mut report = RollbackReport::default();

        {
            let mut target = RollbackTarget {
                handle: self.handle,
                registry: &mut self.registry,
                paths: &self.paths,
            };
            let own = pending.unwrap_or_else(|| Undo::nothing("failed before changing anything"));
            let actions =
                std::iter::once((failed_step.to_string(), own)).chain(done.into_iter().rev());

            for (step, undo) in actions {
                let status = undo.apply(&mut target);
                tracing::info!(%step, action = %undo.describe(), %status, "rollback action");
                let entry_status = match &status {
                    RollbackStatus::Succeeded => EntryStatus::Succeeded,
                    RollbackStatus::Failed(_) => EntryStatus::Failed,
                    RollbackStatus::Skipped => EntryStatus::Skipped,
                };
                audit.rollback(&step, entry_status, format!("{}: {}", undo.describe(), status));
                report.record(step, status);
            }
        }

        self.enter(DeployState::Idle);
        tracing::info!(summary = %report.summary(), "rollback finished");
        report
    }

    fn execute(
        &mut self,
        step: &PlanStep,
        plan: &DeploymentPlan,
        report: &mut DeployReport,
        pending: &mut Option<Undo>,
    ) -> Result<String, DeployError> {
        match step {
            PlanStep::Purge { spec } => {
                let result = HistoryPurgeEngine::new(self.handle, self.paths.clone()).purge(spec)?;
                if result.is_noop() {
                    let warning = format!("{} matched nothing; history unchanged", spec.predicate);
                    tracing::warn!(%warning, "ambiguous predicate");
                    report.warnings.push(warning);
                }
                *pending = Some(Undo::Refs(result.clone()));
                let detail = result.summary();
                report.rewrite = Some(result);
                Ok(detail)
            }

            PlanStep::UpdateIgnore { patterns } => self.update_ignore(patterns, pending),

            PlanStep::Retarget { remote, url } => {
                let change = self.registry.retarget(remote, url)?;
                *pending = Some(Undo::Url(change.clone()));
                self.registry.apply(self.handle, &change)?;
                self.registry.save(&self.paths)?;
                let detail = format!("{}: {} -> {}", change.name, change.old_url, change.new_url);
                report.retargets.push(change);
                Ok(detail)
            }

            PlanStep::Push { remote, refs } => {
                *pending = Some(Undo::nothing("remote is external state"));
                self.push(remote, refs, plan.allow_history_rewrite, report)
            }

            PlanStep::VerifyAbsent { spec } => {
                let probe = self.probe();
                if let Some(result) = &report.rewrite {
                    if !probe.confirm_rewrite(self.handle, result, spec)? {
                        return Err(DeployError::VerificationFailed {
                            check: "rewritten history does not match the purge".to_string(),
                        });
                    }
                }
                match probe.find_violation(spec, self.handle)? {
                    Some(found) => Err(DeployError::VerificationFailed {
                        check: format!(
                            "{} still present: {} in {}",
                            spec.predicate,
                            found.path,
                            found.revision.short(7)
                        ),
                    }),
                    None => Ok("no reachable revision violates the purge".to_string()),
                }
            }

            PlanStep::VerifyRemote { remote, refs } => {
                let endpoint = self.registry.resolve(remote)?.clone();
                let refs = self.resolve_refs(refs)?;
                let local = self.local_refs()?;
                let credential = self.credentials.resolve(&endpoint.auth)?;
                let probe = self.probe();

                let mut mismatched = Vec::new();
                for name in &refs {
                    let tip = &local_entry(&local, name)?.target;
                    if !probe.confirm_remote_matches(
                        self.handle,
                        &endpoint,
                        credential.as_ref(),
                        name,
                        tip,
                    )? {
                        mismatched.push(name.to_string());
                    }
                }
                if mismatched.is_empty() {
                    Ok(format!("{} refs match on {}", refs.len(), remote))
                } else {
                    Err(DeployError::VerificationFailed {
                        check: format!("{} differ on {}", mismatched.join(", "), remote),
                    })
                }
            }

            PlanStep::VerifyUrl { remote, url } => {
                let change = ChangeRecord {
                    name: remote.clone(),
                    old_url: report
                        .retargets
                        .iter()
                        .rev()
                        .find(|c| &c.name == remote)
                        .map(|c| c.old_url.clone())
                        .unwrap_or_default(),
                    new_url: url.clone(),
                };
                let registered = self.registry.resolve(remote)?.url == *url;
                if registered && self.probe().confirm_remote_url(self.handle, &change)? {
                    Ok(format!("{} is {}", remote, url))
                } else {
                    Err(DeployError::VerificationFailed {
                        check: format!("{} does not point at {}", remote, url),
                    })
                }
            }
        }
    }

    fn update_ignore(
        &self,
        patterns: &[String],
        pending: &mut Option<Undo>,
    ) -> Result<String, DeployError> {
        let work_dir = self.handle.work_dir().ok_or(GitError::BareRepo)?;
        let path = work_dir.join(&self.settings.ignore_file);
        let io_err = |source| DeployError::IgnoreFile {
            path: path.clone(),
            source,
        };

        let previous = match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_err(e)),
        };
        let mut content = previous
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();

        let present: HashSet<&str> = content.lines().map(str::trim).collect();
        let missing: Vec<String> = patterns
            .iter()
            .filter(|p| !present.contains(p.as_str()))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(format!("{} already lists every pattern", self.settings.ignore_file));
        }

        *pending = Some(Undo::IgnoreFile {
            path: path.clone(),
            previous,
        });

        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        for pattern in &missing {
            content.push_str(pattern);
            content.push('\n');
        }
        write_atomic(&path, content.as_bytes()).map_err(io_err)?;

        Ok(format!(
            "added {} to {}",
            missing.join(", "),
            self.settings.ignore_file
        ))
    }

    fn push(
        &self,
        remote: &str,
        refs: &[RefName],
        allow_history_rewrite: bool,
        report: &mut DeployReport,
    ) -> Result<String, DeployError> {
        let endpoint = self.registry.resolve(remote)?.clone();
        let refs = self.resolve_refs(refs)?;
        let local = self.local_refs()?;
        let credential = self.credentials.resolve(&endpoint.auth)?;
        let probe = self.probe();

        let before = probe.list_remote(self.handle, &endpoint.url, credential.as_ref())?;

        let mut refspecs = Vec::new();
        let mut planned = Vec::new();
        for name in &refs {
            let entry = local_entry(&local, name)?;
            let old = before.get(name.as_str()).cloned();
            if old.as_ref() == Some(&entry.target) {
                tracing::debug!(refname = %name, "remote already up to date");
                continue;
            }

            let fast_forward = match &old {
                None => true,
                Some(tip) => self.handle.is_ancestor(tip, &entry.commit)?,
            };
            if !fast_forward && !allow_history_rewrite {
                return Err(DeployError::NonFastForwardRejected {
                    remote: remote.to_string(),
                    reason: format!(
                        "{} on the remote is not an ancestor of the local tip; pass --force to overwrite it",
                        name
                    ),
                });
            }

            let force_prefix = if fast_forward { "" } else { "+" };
            refspecs.push(format!("{}{}:{}", force_prefix, name, name));
            planned.push(PushRecord {
                remote: remote.to_string(),
                refname: name.clone(),
                old,
                new: entry.target.clone(),
                forced: !fast_forward,
            });
        }

        if refspecs.is_empty() {
            return Ok(format!("{} already up to date", remote));
        }

        tracing::info!(remote, refs = refspecs.len(), authenticated = credential.is_some(), "pushing");
        let budget = NetworkBudget::new(self.settings.timeout, self.cancel.clone());
        let failure = match self.handle.push(
            &endpoint.url,
            &refspecs,
            false,
            credential.as_ref(),
            &budget,
        ) {
            Ok(outcome) if outcome.all_accepted() => None,
            Ok(outcome) => Some(DeployError::PushRejected {
                remote: remote.to_string(),
                detail: outcome
                    .rejected()
                    .map(|s| {
                        format!("{} ({})", s.refname, s.rejected.as_deref().unwrap_or("rejected"))
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
            Err(e) => {
                if matches!(e, GitError::AccessError { .. } | GitError::Network { .. }) {
                    self.credentials.invalidate_binding(&endpoint.auth);
                }
                Some(DeployError::Git(e))
            }
        };

        if let Some(err) = failure {
            return Err(self.classify_push_failure(&probe, &endpoint, credential.as_ref(), &planned, err));
        }

        let forced = planned.iter().filter(|p| p.forced).count();
        let detail = format!(
            "pushed {} refs to {}{}",
            planned.len(),
            remote,
            if forced > 0 {
                format!(" ({} forced)", forced)
            } else {
                String::new()
            }
        );
        report.pushes.extend(planned);
        Ok(detail)
    }

    /// Decide whether a failed push left the remote untouched.
    fn classify_push_failure(
        &self,
        probe: &VerificationProbe,
        endpoint: &RemoteEndpoint,
        credential: Option<&Credential>,
        planned: &[PushRecord],
        err: DeployError,
    ) -> DeployError {
        tracing::warn!(remote = %endpoint.name, error = %err, "push failed; re-reading remote");
        match probe.list_remote_uncancellable(self.handle, &endpoint.url, credential) {
            Ok(after) => {
                let moved: Vec<String> = planned
                    .iter()
                    .filter(|p| after.get(p.refname.as_str()) != p.old.as_ref())
                    .map(|p| p.refname.to_string())
                    .collect();
                if moved.is_empty() {
                    err
                } else {
                    DeployError::PartialPushDivergence {
                        remote: endpoint.name.clone(),
                        detail: format!(
                            "{} changed on the remote before the push failed ({})",
                            moved.join(", "),
                            err
                        ),
                    }
                }
            }
            Err(e) => DeployError::PartialPushDivergence {
                remote: endpoint.name.clone(),
                detail: format!("push failed ({}) and the remote could not be re-read ({})", err, e),
            },
        }
    }

    /// Refs named by a step, or the HEAD branch when none are named.
    fn resolve_refs(&self, refs: &[RefName]) -> Result<Vec<RefName>, DeployError> {
        if !refs.is_empty() {
            return Ok(refs.to_vec());
        }
        match self.handle.head_branch()? {
            Some(head) => Ok(vec![head]),
            None => Err(PlanError::Invalid(
                "HEAD is not on a branch; name the refs to push with --ref".to_string(),
            )
            .into()),
        }
    }

    fn local_refs(&self) -> Result<BTreeMap<RefName, RefEntry>, DeployError> {
        Ok(self
            .handle
            .list_refs()?
            .into_iter()
            .map(|e| (e.name.clone(), e))
            .collect())
    }
}

fn local_entry<'r>(
    local: &'r BTreeMap<RefName, RefEntry>,
    name: &RefName,
) -> Result<&'r RefEntry, DeployError> {
    local.get(name).ok_or_else(|| {
        GitError::RefNotFound {
            refname: name.to_string(),
        }
        .into()
    })
}

/// A verify failure after refs reached a remote may mean the remote holds
/// something other than what was intended.
fn divergence_after_push(step: &PlanStep, report: &DeployReport, err: DeployError) -> DeployError {
    if step.kind() != StepKind::Verify || matches!(err, DeployError::PartialPushDivergence { .. }) {
        return err;
    }
    match report.pushes.last() {
        Some(push) => DeployError::PartialPushDivergence {
            remote: push.remote.clone(),
            detail: format!("verification failed after a successful push: {}", err),
        },
        None => err,
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let temp = path.with_extension("scour-tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&temp, path)
}
