//! git::memory
//!
//! In-memory repository for deterministic testing.
//!
//! # Design
//!
//! [`MemoryRepository`] implements [`RepositoryHandle`] over plain maps.
//! Object ids are SHA-256 digests of the object's content, so the same
//! content-addressing rules hold as in Git: rewriting an ancestor changes
//! every descendant id, and writing an unchanged revision reproduces its
//! id.
//!
//! Remotes are modelled as ref tables keyed by URL. Objects are shared
//! with the local store, so a push only copies ref tips.
//!
//! Failure scenarios are configured with [`FailOn`], and every mutating
//! call is recorded as an [`Operation`] for later assertions.
//!
//! # Example
//!
//! ```
//! use scour::git::memory::MemoryRepository;
//! use scour::git::RepositoryHandle;
//!
//! let dir = tempfile::TempDir::new().unwrap();
//! let repo = MemoryRepository::new(dir.path());
//! repo.commit("main", "add readme", &[("README.md", Some("hello"))]).unwrap();
//! assert_eq!(repo.list_revisions().unwrap().len(), 1);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sha2::{Digest, Sha256};

use super::handle::{
    Credential, NetworkBudget, PushOutcome, RefEntry, RefPushStatus, RepositoryHandle, Revision,
    RevisionMeta, Signature, TreeEntry, WorktreeStatus,
};
use super::GitError;
use crate::core::types::{Oid, RefName};

/// Which operation should misbehave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOn {
    /// push fails with a network error before anything reaches the remote
    PushBeforeTransfer,
    /// push updates the first refspec on the remote, then times out
    PushAfterPartialTransfer,
    /// push completes but the remote rejects every ref
    PushRejected,
    /// the next `n` fetches fail with a network error
    FetchTransient(u32),
    /// every fetch fails with a network error
    Fetch,
    /// update_ref fails for the named ref
    UpdateRef(String),
    /// set_remote fails
    SetRemote,
    /// reset_index_to fails
    ResetIndex,
    /// the ref disappears just before the `nth` list_refs call (1-based)
    /// returns, as if another process deleted it
    RefDeletedOnList { refname: String, nth: usize },
}

/// Recorded mutating or network operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    WriteRevision { id: Oid },
    UpdateRef { refname: String, new: Oid },
    DeleteRef { refname: String },
    ResetIndex { revision: Oid },
    SetRemote { name: String, url: String },
    Fetch { url: String },
    Push {
        url: String,
        refspecs: Vec<String>,
        force: bool,
        authenticated: bool,
    },
}

impl Operation {
    /// Whether this operation changes local or remote state.
    pub fn is_write(&self) -> bool {
        !matches!(self, Operation::Fetch { .. })
    }
}

#[derive(Debug, Default)]
struct Inner {
    blobs: HashMap<Oid, Vec<u8>>,
    trees: HashMap<Oid, Vec<TreeEntry>>,
    revisions: HashMap<Oid, Revision>,
    refs: BTreeMap<RefName, Oid>,
    head: Option<RefName>,
    index_tree: Option<Oid>,
    status: WorktreeStatus,
    remotes: BTreeMap<String, String>,
    remote_refs: BTreeMap<String, BTreeMap<String, Oid>>,
    clock: i64,
    list_refs_calls: usize,
    fail_on: Vec<FailOn>,
    operations: Vec<Operation>,
}

/// In-memory repository.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping; clones share state.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    root: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

fn digest(kind: &str, content: &[u8]) -> Result<Oid, GitError> {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(content);
    Ok(Oid::from_bytes(&hasher.finalize())?)
}

fn tree_digest(entries: &[TreeEntry]) -> Result<Oid, GitError> {
    let mut content = Vec::new();
    for entry in entries {
        content.extend_from_slice(format!("{:o} {}\0{}\n", entry.mode, entry.path, entry.blob).as_bytes());
    }
    digest("tree", &content)
}

fn revision_digest(tree: &Oid, parents: &[Oid], meta: &RevisionMeta) -> Result<Oid, GitError> {
    let mut content = format!("tree {}\n", tree);
    for parent in parents {
        content.push_str(&format!("parent {}\n", parent));
    }
    let meta = serde_json::to_string(meta).map_err(|e| GitError::Internal {
        message: e.to_string(),
    })?;
    content.push_str(&meta);
    digest("revision", content.as_bytes())
}

impl MemoryRepository {
    /// Create an empty repository whose git dir is `<root>/.git`.
    ///
    /// Nothing is written under `root` until scour itself stores state
    /// (lock, audit log, registry) there.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            inner: Arc::new(Mutex::new(Inner {
                head: RefName::for_branch("main").ok(),
                ..Default::default()
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configure a failure scenario. Scenarios accumulate.
    pub fn fail_on(self, fail_on: FailOn) -> Self {
        self.lock().fail_on.push(fail_on);
        self
    }

    pub fn clear_fail_on(&self) {
        self.lock().fail_on.clear();
    }

    /// All recorded operations, oldest first.
    pub fn operations(&self) -> Vec<Operation> {
        self.lock().operations.clone()
    }

    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    /// Pretend the working tree has these changes.
    pub fn set_status(&self, status: WorktreeStatus) {
        self.lock().status = status;
    }

    /// Point HEAD at a branch.
    pub fn set_head(&self, branch: &str) -> Result<(), GitError> {
        self.lock().head = Some(RefName::for_branch(branch)?);
        Ok(())
    }

    /// Current target of a ref.
    pub fn ref_target(&self, refname: &str) -> Option<Oid> {
        let name = RefName::new(refname).ok()?;
        self.lock().refs.get(&name).cloned()
    }

    /// Tree currently loaded in the index.
    pub fn index_tree(&self) -> Option<Oid> {
        self.lock().index_tree.clone()
    }

    /// Ref table of a simulated remote.
    pub fn remote_refs(&self, url: &str) -> BTreeMap<String, Oid> {
        self.lock().remote_refs.get(url).cloned().unwrap_or_default()
    }

    /// Seed a simulated remote.
    pub fn set_remote_refs(&self, url: &str, refs: BTreeMap<String, Oid>) {
        self.lock().remote_refs.insert(url.to_string(), refs);
    }

    /// Commit `changes` on top of `branch` (creating it if needed).
    ///
    /// Each change is `(path, Some(content))` to write a file or
    /// `(path, None)` to delete it.
    pub fn commit(
        &self,
        branch: &str,
        message: &str,
        changes: &[(&str, Option<&str>)],
    ) -> Result<Oid, GitError> {
        let refname = RefName::for_branch(branch)?;
        let mut inner = self.lock();

        let parent = inner.refs.get(&refname).cloned();
        let mut files: BTreeMap<String, TreeEntry> = match &parent {
            Some(p) => {
                let tree = &inner.revisions[p].tree;
                inner.trees[tree]
                    .iter()
                    .map(|e| (e.path.clone(), e.clone()))
                    .collect()
            }
            None => BTreeMap::new(),
        };

        for (path, content) in changes {
            match content {
                Some(text) => {
                    let blob = digest("blob", text.as_bytes())?;
                    inner.blobs.insert(blob.clone(), text.as_bytes().to_vec());
                    files.insert(
                        path.to_string(),
                        TreeEntry {
                            path: path.to_string(),
                            mode: TreeEntry::MODE_FILE,
                            blob,
                        },
                    );
                }
                None => {
                    files.remove(*path);
                }
            }
        }

        let entries: Vec<TreeEntry> = files.into_values().collect();
        let tree = tree_digest(&entries)?;
        inner.trees.insert(tree.clone(), entries);

        inner.clock += 60;
        let sig = Signature::new("Test User", "test@example.com", 1_700_000_000 + inner.clock);
        let meta = RevisionMeta {
            author: sig.clone(),
            committer: sig,
            message: format!("{}\n", message),
        };
        let parents: Vec<Oid> = parent.into_iter().collect();
        let id = revision_digest(&tree, &parents, &meta)?;
        inner.revisions.insert(
            id.clone(),
            Revision {
                id: id.clone(),
                parents,
                meta,
                tree: tree.clone(),
            },
        );
        inner.refs.insert(refname.clone(), id.clone());
        if inner.head.as_ref() == Some(&refname) {
            inner.index_tree = Some(tree);
        }
        Ok(id)
    }

    /// Create a lightweight tag.
    pub fn tag(&self, name: &str, target: &Oid) -> Result<(), GitError> {
        let refname = RefName::new(format!("refs/tags/{}", name))?;
        self.lock().refs.insert(refname, target.clone());
        Ok(())
    }

    fn take_fetch_failure(inner: &mut Inner) -> bool {
        for fail in inner.fail_on.iter_mut() {
            match fail {
                FailOn::Fetch => return true,
                FailOn::FetchTransient(n) if *n > 0 => {
                    *n -= 1;
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    fn parse_refspec(spec: &str) -> (bool, &str, &str) {
        let (force, spec) = match spec.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        match spec.split_once(':') {
            Some((src, dst)) => (force, src, dst),
            None => (force, spec, spec),
        }
    }

    fn ancestor_of(inner: &Inner, ancestor: &Oid, descendant: &Oid) -> bool {
        let mut stack = vec![descendant.clone()];
        let mut seen = BTreeSet::new();
        while let Some(id) = stack.pop() {
            if &id == ancestor {
                return true;
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(rev) = inner.revisions.get(&id) {
                stack.extend(rev.parents.iter().cloned());
            }
        }
        false
    }
}

impl RepositoryHandle for MemoryRepository {
    fn git_dir(&self) -> PathBuf {
        self.root.join(".git")
    }

    fn common_dir(&self) -> PathBuf {
        self.root.join(".git")
    }

    fn work_dir(&self) -> Option<PathBuf> {
        Some(self.root.clone())
    }

    fn list_revisions(&self) -> Result<Vec<Revision>, GitError> {
        let inner = self.lock();

        // Iterative post-order DFS from every ref tip yields parents first.
        let mut order = Vec::new();
        let mut done = BTreeSet::new();
        for tip in inner.refs.values() {
            let mut stack = vec![(tip.clone(), false)];
            while let Some((id, expanded)) = stack.pop() {
                if done.contains(&id) {
                    continue;
                }
                if expanded {
                    done.insert(id.clone());
                    order.push(id);
                    continue;
                }
                let rev = inner
                    .revisions
                    .get(&id)
                    .ok_or_else(|| GitError::ObjectNotFound { oid: id.to_string() })?;
                stack.push((id.clone(), true));
                for parent in rev.parents.iter().rev() {
                    if !done.contains(parent) {
                        stack.push((parent.clone(), false));
                    }
                }
            }
        }

        Ok(order
            .into_iter()
            .map(|id| inner.revisions[&id].clone())
            .collect())
    }

    fn find_revision(&self, id: &Oid) -> Result<Option<Revision>, GitError> {
        Ok(self.lock().revisions.get(id).cloned())
    }

    fn tree_entries(&self, tree: &Oid) -> Result<Vec<TreeEntry>, GitError> {
        self.lock()
            .trees
            .get(tree)
            .cloned()
            .ok_or_else(|| GitError::ObjectNotFound {
                oid: tree.to_string(),
            })
    }

    fn read_blob(&self, blob: &Oid) -> Result<Vec<u8>, GitError> {
        self.lock()
            .blobs
            .get(blob)
            .cloned()
            .ok_or_else(|| GitError::ObjectNotFound {
                oid: blob.to_string(),
            })
    }

    fn write_tree(&self, entries: &[TreeEntry]) -> Result<Oid, GitError> {
        let mut sorted = entries.to_vec();
        sorted.sort();
        let id = tree_digest(&sorted)?;
        self.lock().trees.insert(id.clone(), sorted);
        Ok(id)
    }

    fn write_revision(
        &self,
        tree: &Oid,
        parents: &[Oid],
        meta: &RevisionMeta,
    ) -> Result<Oid, GitError> {
        let id = revision_digest(tree, parents, meta)?;
        let mut inner = self.lock();
        if !inner.trees.contains_key(tree) {
            return Err(GitError::ObjectNotFound {
                oid: tree.to_string(),
            });
        }
        inner.revisions.insert(
            id.clone(),
            Revision {
                id: id.clone(),
                parents: parents.to_vec(),
                meta: meta.clone(),
                tree: tree.clone(),
            },
        );
        inner.operations.push(Operation::WriteRevision { id: id.clone() });
        Ok(id)
    }

    fn is_ancestor(&self, ancestor: &Oid, descendant: &Oid) -> Result<bool, GitError> {
        let inner = self.lock();
        if !inner.revisions.contains_key(ancestor) || !inner.revisions.contains_key(descendant) {
            return Ok(false);
        }
        Ok(Self::ancestor_of(&inner, ancestor, descendant))
    }

    fn list_refs(&self) -> Result<Vec<RefEntry>, GitError> {
        let mut inner = self.lock();
        inner.list_refs_calls += 1;
        let call = inner.list_refs_calls;

        let doomed: Vec<String> = inner
            .fail_on
            .iter()
            .filter_map(|f| match f {
                FailOn::RefDeletedOnList { refname, nth } if *nth == call => Some(refname.clone()),
                _ => None,
            })
            .collect();
        for refname in doomed {
            let name = RefName::new(refname)?;
            inner.refs.remove(&name);
        }

        Ok(inner
            .refs
            .iter()
            .map(|(name, oid)| RefEntry {
                name: name.clone(),
                target: oid.clone(),
                commit: oid.clone(),
            })
            .collect())
    }

    fn update_ref(
        &self,
        refname: &RefName,
        new: &Oid,
        expected_old: Option<&Oid>,
        _message: &str,
    ) -> Result<(), GitError> {
        let mut inner = self.lock();
        if inner
            .fail_on
            .contains(&FailOn::UpdateRef(refname.to_string()))
        {
            return Err(GitError::AccessError {
                message: format!("injected failure updating {}", refname),
            });
        }

        let current = inner.refs.get(refname);
        if current != expected_old {
            return Err(GitError::CasFailed {
                refname: refname.to_string(),
                expected: expected_old.map_or("<none>".to_string(), Oid::to_string),
                actual: current.map_or("<none>".to_string(), Oid::to_string),
            });
        }
        if !inner.revisions.contains_key(new) {
            return Err(GitError::ObjectNotFound {
                oid: new.to_string(),
            });
        }

        inner.refs.insert(refname.clone(), new.clone());
        inner.operations.push(Operation::UpdateRef {
            refname: refname.to_string(),
            new: new.clone(),
        });
        Ok(())
    }

    fn delete_ref(&self, refname: &RefName, expected_old: &Oid) -> Result<(), GitError> {
        let mut inner = self.lock();
        match inner.refs.get(refname) {
            None => {
                return Err(GitError::RefNotFound {
                    refname: refname.to_string(),
                })
            }
            Some(actual) if actual != expected_old => {
                return Err(GitError::CasFailed {
                    refname: refname.to_string(),
                    expected: expected_old.to_string(),
                    actual: actual.to_string(),
                })
            }
            _ => {}
        }
        inner.refs.remove(refname);
        inner.operations.push(Operation::DeleteRef {
            refname: refname.to_string(),
        });
        Ok(())
    }

    fn worktree_status(&self) -> Result<WorktreeStatus, GitError> {
        Ok(self.lock().status.clone())
    }

    fn head_branch(&self) -> Result<Option<RefName>, GitError> {
        Ok(self.lock().head.clone())
    }

    fn reset_index_to(&self, revision: &Oid) -> Result<(), GitError> {
        let mut inner = self.lock();
        if inner.fail_on.contains(&FailOn::ResetIndex) {
            return Err(GitError::AccessError {
                message: "injected failure writing the index".to_string(),
            });
        }
        let tree = inner
            .revisions
            .get(revision)
            .map(|r| r.tree.clone())
            .ok_or_else(|| GitError::ObjectNotFound {
                oid: revision.to_string(),
            })?;
        inner.index_tree = Some(tree);
        inner.operations.push(Operation::ResetIndex {
            revision: revision.clone(),
        });
        Ok(())
    }

    fn get_remote(&self, name: &str) -> Result<Option<String>, GitError> {
        Ok(self.lock().remotes.get(name).cloned())
    }

    fn set_remote(&self, name: &str, url: &str) -> Result<(), GitError> {
        let mut inner = self.lock();
        if inner.fail_on.contains(&FailOn::SetRemote) {
            return Err(GitError::AccessError {
                message: "injected failure writing remote config".to_string(),
            });
        }
        inner.remotes.insert(name.to_string(), url.to_string());
        inner.operations.push(Operation::SetRemote {
            name: name.to_string(),
            url: url.to_string(),
        });
        Ok(())
    }

    fn list_remotes(&self) -> Result<Vec<(String, String)>, GitError> {
        Ok(self
            .lock()
            .remotes
            .iter()
            .map(|(n, u)| (n.clone(), u.clone()))
            .collect())
    }

    fn fetch(
        &self,
        url: &str,
        _credential: Option<&Credential>,
        budget: &NetworkBudget,
    ) -> Result<BTreeMap<String, Oid>, GitError> {
        budget.start("fetch").check()?;
        let mut inner = self.lock();
        inner.operations.push(Operation::Fetch {
            url: url.to_string(),
        });
        if Self::take_fetch_failure(&mut inner) {
            return Err(GitError::Network {
                operation: "fetch".to_string(),
                message: "injected connection reset".to_string(),
            });
        }
        Ok(inner.remote_refs.get(url).cloned().unwrap_or_default())
    }

    fn push(
        &self,
        url: &str,
        refspecs: &[String],
        force: bool,
        credential: Option<&Credential>,
        budget: &NetworkBudget,
    ) -> Result<PushOutcome, GitError> {
        let clock = budget.start("push");
        clock.check()?;

        let mut inner = self.lock();
        inner.operations.push(Operation::Push {
            url: url.to_string(),
            refspecs: refspecs.to_vec(),
            force,
            authenticated: credential.is_some(),
        });

        if inner.fail_on.contains(&FailOn::PushBeforeTransfer) {
            return Err(GitError::Network {
                operation: "push".to_string(),
                message: "injected connection refused".to_string(),
            });
        }
        let partial = inner.fail_on.contains(&FailOn::PushAfterPartialTransfer);
        let reject_all = inner.fail_on.contains(&FailOn::PushRejected);

        let mut outcome = PushOutcome::default();
        for (i, spec) in refspecs.iter().enumerate() {
            if partial && i == 1 {
                return Err(GitError::Timeout {
                    operation: "push".to_string(),
                    secs: budget.timeout.as_secs(),
                });
            }

            let (spec_force, src, dst) = Self::parse_refspec(spec);
            if reject_all {
                outcome.statuses.push(RefPushStatus {
                    refname: dst.to_string(),
                    rejected: Some("injected rejection".to_string()),
                });
                continue;
            }

            let local = RefName::new(src)
                .ok()
                .and_then(|name| inner.refs.get(&name).cloned())
                .ok_or_else(|| GitError::RefNotFound {
                    refname: src.to_string(),
                })?;
            let remote_tip = inner
                .remote_refs
                .get(url)
                .and_then(|refs| refs.get(dst))
                .cloned();

            let fast_forward = remote_tip
                .as_ref()
                .map_or(true, |tip| Self::ancestor_of(&inner, tip, &local));
            if !fast_forward && !(force || spec_force) {
                outcome.statuses.push(RefPushStatus {
                    refname: dst.to_string(),
                    rejected: Some("non-fast-forward".to_string()),
                });
                continue;
            }

            inner
                .remote_refs
                .entry(url.to_string())
                .or_default()
                .insert(dst.to_string(), local);
            outcome.statuses.push(RefPushStatus {
                refname: dst.to_string(),
                rejected: None,
            });
        }

        if partial {
            // A single refspec still counts as transferred before the stall
            return Err(GitError::Timeout {
                operation: "push".to_string(),
                secs: budget.timeout.as_secs(),
            });
        }
        Ok(outcome)
    }
}
