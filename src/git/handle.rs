//! git::handle
//!
//! The capability boundary between scour and the version-control engine.
//!
//! Everything that reads or mutates repository state goes through
//! [`RepositoryHandle`]. Trees cross the boundary flattened: a tree is a
//! list of `/`-separated file paths with their mode and blob id, so path
//! predicates never need to walk nested tree objects.
//!
//! # Network Operations
//!
//! `fetch` and `push` are the only calls that may block on I/O for an
//! unbounded time. Each takes a [`NetworkBudget`]; implementations must
//! abort with [`GitError::Timeout`] once the deadline passes and with
//! [`GitError::Cancelled`] once the cancel flag is raised.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::GitError;
use crate::core::types::{Oid, RefName};

/// Author or committer stamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch
    pub time: i64,
    /// Timezone offset in minutes
    pub offset_minutes: i32,
}

impl Signature {
    pub fn new(name: impl Into<String>, email: impl Into<String>, time: i64) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            time,
            offset_minutes: 0,
        }
    }
}

/// Metadata carried unchanged through a rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionMeta {
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

/// One commit in the history graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: Oid,
    pub parents: Vec<Oid>,
    pub meta: RevisionMeta,
    pub tree: Oid,
}

/// One file in a flattened tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TreeEntry {
    /// `/`-separated path relative to the tree root
    pub path: String,
    /// Git file mode (0o100644, 0o100755, 0o120000, 0o160000)
    pub mode: u32,
    pub blob: Oid,
}

impl TreeEntry {
    /// Regular, non-executable file mode.
    pub const MODE_FILE: u32 = 0o100644;
}

/// A local branch or tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    pub name: RefName,
    /// The direct target (an annotated tag object for annotated tags)
    pub target: Oid,
    /// The commit the ref ultimately points at
    pub commit: Oid,
}

/// Summary of working tree status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorktreeStatus {
    /// Number of staged changes
    pub staged: usize,
    /// Number of unstaged changes to tracked files
    pub unstaged: usize,
    /// Number of untracked files
    pub untracked: usize,
    /// Whether there are unresolved conflicts
    pub has_conflicts: bool,
}

impl WorktreeStatus {
    /// No staged changes, no unstaged changes, no conflicts.
    ///
    /// Untracked files do not make a tree dirty.
    pub fn is_clean(&self) -> bool {
        self.staged == 0 && self.unstaged == 0 && !self.has_conflicts
    }

    /// Short human description of what is dirty.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if self.staged > 0 {
            parts.push(format!("{} staged", self.staged));
        }
        if self.unstaged > 0 {
            parts.push(format!("{} unstaged", self.unstaged));
        }
        if self.has_conflicts {
            parts.push("unresolved conflicts".to_string());
        }
        if parts.is_empty() {
            "clean".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Shared cancellation flag.
///
/// Clones observe the same flag, so a signal handler can hold one clone
/// while the network callback polls another.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Time and cancellation budget for one network operation.
#[derive(Debug, Clone)]
pub struct NetworkBudget {
    pub timeout: Duration,
    pub cancel: CancelFlag,
}

impl NetworkBudget {
    pub fn new(timeout: Duration, cancel: CancelFlag) -> Self {
        Self { timeout, cancel }
    }

    /// Start the clock for one operation.
    pub fn start(&self, operation: &'static str) -> BudgetClock {
        BudgetClock {
            operation,
            deadline: Instant::now() + self.timeout,
            timeout: self.timeout,
            cancel: self.cancel.clone(),
        }
    }
}

/// A running [`NetworkBudget`].
#[derive(Debug, Clone)]
pub struct BudgetClock {
    operation: &'static str,
    deadline: Instant,
    timeout: Duration,
    cancel: CancelFlag,
}

impl BudgetClock {
    /// Err once cancelled or past the deadline. Cancellation wins.
    pub fn check(&self) -> Result<(), GitError> {
        if self.cancel.is_cancelled() {
            return Err(GitError::Cancelled {
                operation: self.operation.to_string(),
            });
        }
        if Instant::now() >= self.deadline {
            return Err(GitError::Timeout {
                operation: self.operation.to_string(),
                secs: self.timeout.as_secs(),
            });
        }
        Ok(())
    }

    /// Whether [`check`](Self::check) would fail.
    pub fn exhausted(&self) -> bool {
        self.check().is_err()
    }
}

/// Authentication material resolved at push time.
///
/// `Debug` and `Display` never print the token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    username: String,
    token: String,
}

impl Credential {
    /// Username sent with bare tokens; hosts that accept tokens as
    /// passwords ignore it.
    pub const TOKEN_USERNAME: &'static str = "x-access-token";

    pub fn token(token: impl Into<String>) -> Self {
        Self {
            username: Self::TOKEN_USERNAME.to_string(),
            token: token.into(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The secret itself. Callers must not log or persist it.
    pub fn expose(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:[REDACTED]", self.username)
    }
}

/// Per-ref result reported by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefPushStatus {
    pub refname: String,
    /// Rejection reason, None if accepted
    pub rejected: Option<String>,
}

/// Result of a push that completed at the transport level.
///
/// A push can complete and still have refs rejected by the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    pub statuses: Vec<RefPushStatus>,
}

impl PushOutcome {
    pub fn all_accepted(&self) -> bool {
        self.statuses.iter().all(|s| s.rejected.is_none())
    }

    pub fn rejected(&self) -> impl Iterator<Item = &RefPushStatus> {
        self.statuses.iter().filter(|s| s.rejected.is_some())
    }
}

/// Capability wrapper over a version-control repository.
///
/// Implemented by [`Git`](super::Git) for real repositories and by
/// [`MemoryRepository`](super::memory::MemoryRepository) for tests.
pub trait RepositoryHandle {
    /// Per-worktree git directory.
    fn git_dir(&self) -> PathBuf;

    /// Shared git directory.
    fn common_dir(&self) -> PathBuf;

    /// Working directory, None for bare repositories.
    fn work_dir(&self) -> Option<PathBuf>;

    // -- history --------------------------------------------------------

    /// Every revision reachable from local branches and tags, ancestors
    /// before descendants.
    fn list_revisions(&self) -> Result<Vec<Revision>, GitError>;

    /// Look up one revision. Ok(None) if it does not exist.
    fn find_revision(&self, id: &Oid) -> Result<Option<Revision>, GitError>;

    /// Flattened tree of a revision.
    fn read_tree(&self, revision: &Oid) -> Result<Vec<TreeEntry>, GitError> {
        let rev = self
            .find_revision(revision)?
            .ok_or_else(|| GitError::ObjectNotFound {
                oid: revision.to_string(),
            })?;
        self.tree_entries(&rev.tree)
    }

    /// Flattened tree by tree id, sorted by path.
    fn tree_entries(&self, tree: &Oid) -> Result<Vec<TreeEntry>, GitError>;

    fn read_blob(&self, blob: &Oid) -> Result<Vec<u8>, GitError>;

    /// Write a tree from flattened entries and return its id.
    fn write_tree(&self, entries: &[TreeEntry]) -> Result<Oid, GitError>;

    /// Write a revision object. Refs are not touched.
    fn write_revision(
        &self,
        tree: &Oid,
        parents: &[Oid],
        meta: &RevisionMeta,
    ) -> Result<Oid, GitError>;

    /// Whether `ancestor` is reachable from `descendant` (or equal).
    /// False if either object is missing locally.
    fn is_ancestor(&self, ancestor: &Oid, descendant: &Oid) -> Result<bool, GitError>;

    // -- refs -----------------------------------------------------------

    /// Local branches (`refs/heads/`) and tags (`refs/tags/`).
    fn list_refs(&self) -> Result<Vec<RefEntry>, GitError>;

    /// CAS update: `expected_old` None means the ref must not exist.
    fn update_ref(
        &self,
        refname: &RefName,
        new: &Oid,
        expected_old: Option<&Oid>,
        message: &str,
    ) -> Result<(), GitError>;

    /// CAS delete.
    fn delete_ref(&self, refname: &RefName, expected_old: &Oid) -> Result<(), GitError>;

    // -- working state --------------------------------------------------

    fn worktree_status(&self) -> Result<WorktreeStatus, GitError>;

    /// Branch HEAD points at, None when detached or unborn.
    fn head_branch(&self) -> Result<Option<RefName>, GitError>;

    /// Reset the index (not the working tree) to a revision's tree.
    fn reset_index_to(&self, revision: &Oid) -> Result<(), GitError>;

    // -- remotes --------------------------------------------------------

    /// Configured URL of a remote. Ok(None) if not configured.
    fn get_remote(&self, name: &str) -> Result<Option<String>, GitError>;

    /// Create or update a remote's URL.
    fn set_remote(&self, name: &str, url: &str) -> Result<(), GitError>;

    /// All configured remotes as (name, url).
    fn list_remotes(&self) -> Result<Vec<(String, String)>, GitError>;

    /// List the remote's refs. Read-only: no local ref is written.
    fn fetch(
        &self,
        url: &str,
        credential: Option<&Credential>,
        budget: &NetworkBudget,
    ) -> Result<BTreeMap<String, Oid>, GitError>;

    /// Push refspecs to `url`. Never retried by the implementation.
    fn push(
        &self,
        url: &str,
        refspecs: &[String],
        force: bool,
        credential: Option<&Credential>,
        budget: &NetworkBudget,
    ) -> Result<PushOutcome, GitError>;
}
