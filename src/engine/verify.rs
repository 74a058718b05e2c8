//! engine::verify
//!
//! Read-only checks run after a step.
//!
//! The probe only calls read methods of [`RepositoryHandle`]: revision
//! and tree enumeration, ref and remote listing, and `fetch`, which lists
//! remote refs without writing local ones.
//!
//! Remote checks retry transient failures ([`GitError::is_transient`])
//! with exponential backoff. Cancellation is never retried.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::core::config::Config;
use crate::core::types::{Oid, RefName};
use crate::git::{CancelFlag, Credential, GitError, NetworkBudget, RepositoryHandle};
use crate::purge::{ContentCache, PathMatcher, PurgeError, PurgeMode, PurgeSpec, RevisionFate, RewriteResult};
use crate::remotes::{ChangeRecord, RemoteEndpoint};

/// Cap on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Retry schedule for remote reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first
    pub retries: u32,
    /// Delay before the first retry; doubles each time
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retries: config.fetch_retries(),
            backoff: config.backoff(),
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

/// Where a predicate still matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub revision: Oid,
    pub path: String,
}

/// Post-operation checks.
#[derive(Debug, Clone)]
pub struct VerificationProbe {
    retry: RetryPolicy,
    timeout: Duration,
    cancel: CancelFlag,
}

impl VerificationProbe {
    pub fn new(retry: RetryPolicy, timeout: Duration, cancel: CancelFlag) -> Self {
        Self {
            retry,
            timeout,
            cancel,
        }
    }

    /// First reachable revision and path matching `matcher`, if any.
    ///
    /// Every reachable revision's full tree is scanned, not just HEAD.
    pub fn find_present(
        &self,
        matcher: &PathMatcher,
        handle: &dyn RepositoryHandle,
    ) -> Result<Option<Finding>, PurgeError> {
        self.scan(matcher, handle, true)
    }

    /// First entry that a completed purge should have dropped: a match for
    /// [`PurgeMode::RemovePath`], a non-match for [`PurgeMode::KeepOnly`].
    pub fn find_violation(
        &self,
        spec: &PurgeSpec,
        handle: &dyn RepositoryHandle,
    ) -> Result<Option<Finding>, PurgeError> {
        let matcher = spec.matcher()?;
        self.scan(&matcher, handle, spec.mode == PurgeMode::RemovePath)
    }

    fn scan(
        &self,
        matcher: &PathMatcher,
        handle: &dyn RepositoryHandle,
        report_matches: bool,
    ) -> Result<Option<Finding>, PurgeError> {
        let mut content = ContentCache::new();
        let mut seen_trees = HashSet::new();

        for rev in handle.list_revisions()? {
            if !seen_trees.insert(rev.tree.clone()) {
                continue;
            }
            for entry in handle.tree_entries(&rev.tree)? {
                let hit = content.matches(matcher, &entry, |blob| {
                    handle.read_blob(blob).map_err(PurgeError::from)
                })?;
                if hit == report_matches {
                    return Ok(Some(Finding {
                        revision: rev.id,
                        path: entry.path,
                    }));
                }
            }
        }
        Ok(None)
    }

    /// True if no reachable revision contains a match.
    pub fn confirm_absent(
        &self,
        matcher: &PathMatcher,
        handle: &dyn RepositoryHandle,
    ) -> Result<bool, PurgeError> {
        Ok(self.find_present(matcher, handle)?.is_none())
    }

    /// List a remote's refs, retrying transient failures.
    pub fn list_remote(
        &self,
        handle: &dyn RepositoryHandle,
        url: &str,
        credential: Option<&Credential>,
    ) -> Result<BTreeMap<String, Oid>, GitError> {
        self.list_remote_with(handle, url, credential, self.cancel.clone())
    }

    /// Like [`list_remote`](Self::list_remote), ignoring the shared cancel
    /// flag. Used to inspect a remote after a push was cancelled.
    pub fn list_remote_uncancellable(
        &self,
        handle: &dyn RepositoryHandle,
        url: &str,
        credential: Option<&Credential>,
    ) -> Result<BTreeMap<String, Oid>, GitError> {
        self.list_remote_with(handle, url, credential, CancelFlag::new())
    }

    fn list_remote_with(
        &self,
        handle: &dyn RepositoryHandle,
        url: &str,
        credential: Option<&Credential>,
        cancel: CancelFlag,
    ) -> Result<BTreeMap<String, Oid>, GitError> {
        let budget = NetworkBudget::new(self.timeout, cancel);
        let mut attempt = 0;
        loop {
            match handle.fetch(url, credential, &budget) {
                Ok(refs) => return Ok(refs),
                Err(e) if e.is_transient() && attempt < self.retry.retries => {
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "remote listing failed; retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// True if the remote's `refname` points at `expected_tip`.
    pub fn confirm_remote_matches(
        &self,
        handle: &dyn RepositoryHandle,
        endpoint: &RemoteEndpoint,
        credential: Option<&Credential>,
        refname: &RefName,
        expected_tip: &Oid,
    ) -> Result<bool, GitError> {
        let refs = self.list_remote(handle, &endpoint.url, credential)?;
        let actual = refs.get(refname.as_str());
        tracing::debug!(
            remote = %endpoint.name,
            %refname,
            expected = %expected_tip.short(7),
            actual = actual.map(|o| o.short(7)).unwrap_or("<none>"),
            "compared remote tip"
        );
        Ok(actual == Some(expected_tip))
    }

    /// True if git config holds the change's new URL.
    pub fn confirm_remote_url(
        &self,
        handle: &dyn RepositoryHandle,
        change: &ChangeRecord,
    ) -> Result<bool, GitError> {
        Ok(handle.get_remote(&change.name)?.as_deref() == Some(change.new_url.as_str()))
    }

    /// Check a purge result against the repository.
    ///
    /// Unchanged revisions still exist under their ids; rewritten ones exist
    /// under their new ids and honor the purge mode.
    pub fn confirm_rewrite(
        &self,
        handle: &dyn RepositoryHandle,
        result: &RewriteResult,
        spec: &PurgeSpec,
    ) -> Result<bool, PurgeError> {
        let matcher = spec.matcher()?;
        let mut content = ContentCache::new();

        for (old, fate) in &result.mapping {
            let id = match fate {
                RevisionFate::Removed => continue,
                RevisionFate::Unchanged => old,
                RevisionFate::Rewritten(new) => new,
            };
            let Some(rev) = handle.find_revision(id)? else {
                tracing::warn!(revision = %id, "revision missing after purge");
                return Ok(false);
            };
            if matches!(fate, RevisionFate::Unchanged) {
                continue;
            }
            for entry in handle.tree_entries(&rev.tree)? {
                let hit = content.matches(&matcher, &entry, |blob| {
                    handle.read_blob(blob).map_err(PurgeError::from)
                })?;
                let violates = match spec.mode {
                    PurgeMode::RemovePath => hit,
                    PurgeMode::KeepOnly => !hit,
                };
                if violates {
                    tracing::warn!(revision = %id, path = %entry.path, "rewritten tree violates purge");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}
