//! git::interface
//!
//! [`RepositoryHandle`] implementation over `git2`.
//!
//! This is the only file in the crate that imports `git2` (besides the
//! error conversion in [`super::error`]). All repository reads and writes
//! made on behalf of a real repository flow through [`Git`].
//!
//! # Network Budget Enforcement
//!
//! libgit2 has no per-call timeout, so the deadline and the cancel flag
//! are polled from every callback the transport invokes: credentials,
//! transfer progress, sideband progress and push negotiation. Returning
//! false (or an error) from those callbacks makes libgit2 abort the
//! operation, which is then reported as [`GitError::Timeout`] or
//! [`GitError::Cancelled`].
//!
//! # Example
//!
//! ```ignore
//! use scour::git::{Git, RepositoryHandle};
//! use std::path::Path;
//!
//! let git = Git::open(Path::new("."))?;
//! for rev in git.list_revisions()? {
//!     println!("{}", rev.id.short(7));
//! }
//! ```

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::handle::{
    BudgetClock, Credential, NetworkBudget, PushOutcome, RefEntry, RefPushStatus,
    RepositoryHandle, Revision, RevisionMeta, Signature, TreeEntry, WorktreeStatus,
};
use super::GitError;
use crate::core::types::{Oid, RefName};

/// Credential callback invocations allowed before giving up.
///
/// libgit2 re-invokes the callback after every rejected attempt; a wrong
/// token would otherwise loop until the deadline.
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

/// A real repository, opened through libgit2.
pub struct Git {
    repo: git2::Repository,
}

impl std::fmt::Debug for Git {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Git")
            .field("path", &self.repo.path())
            .finish()
    }
}

impl Git {
    /// Open the repository containing `path`.
    ///
    /// Uses discovery, so `path` can be any directory within the work tree.
    ///
    /// # Errors
    ///
    /// - [`GitError::NotARepo`] if no repository is found
    /// - [`GitError::BareRepo`] if the repository has no working directory
    pub fn open(path: &Path) -> Result<Self, GitError> {
        let repo = git2::Repository::discover(path).map_err(|_| GitError::NotARepo {
            path: path.to_path_buf(),
        })?;

        if repo.is_bare() {
            return Err(GitError::BareRepo);
        }

        Ok(Self { repo })
    }

    fn to_git2(oid: &Oid) -> Result<git2::Oid, GitError> {
        git2::Oid::from_str(oid.as_str()).map_err(|e| GitError::from_git2(e, oid.as_str()))
    }

    fn from_git2_oid(oid: git2::Oid) -> Result<Oid, GitError> {
        Oid::new(oid.to_string()).map_err(GitError::from)
    }

    fn signature_of(sig: &git2::Signature<'_>) -> Signature {
        Signature {
            name: String::from_utf8_lossy(sig.name_bytes()).into_owned(),
            email: String::from_utf8_lossy(sig.email_bytes()).into_owned(),
            time: sig.when().seconds(),
            offset_minutes: sig.when().offset_minutes(),
        }
    }

    fn to_git2_signature(sig: &Signature) -> Result<git2::Signature<'static>, GitError> {
        let when = git2::Time::new(sig.time, sig.offset_minutes);
        git2::Signature::new(&sig.name, &sig.email, &when)
            .map_err(|e| GitError::from_git2(e, "signature"))
    }

    fn revision_of(commit: &git2::Commit<'_>) -> Result<Revision, GitError> {
        let parents = commit
            .parent_ids()
            .map(Self::from_git2_oid)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Revision {
            id: Self::from_git2_oid(commit.id())?,
            parents,
            meta: RevisionMeta {
                author: Self::signature_of(&commit.author()),
                committer: Self::signature_of(&commit.committer()),
                message: String::from_utf8_lossy(commit.message_raw_bytes()).into_owned(),
            },
            tree: Self::from_git2_oid(commit.tree_id())?,
        })
    }

    /// Raw target of a ref without validation, None if missing.
    fn try_resolve_ref_raw(&self, refname: &str) -> Result<Option<String>, GitError> {
        match self.repo.find_reference(refname) {
            Ok(reference) => {
                let resolved = reference.resolve().unwrap_or(reference);
                let oid = resolved.target().ok_or_else(|| GitError::Internal {
                    message: format!("ref {} has no target", refname),
                })?;
                Ok(Some(oid.to_string()))
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GitError::from_git2(e, refname)),
        }
    }

    /// Remote callbacks that enforce `clock` and supply `credential`.
    fn callbacks<'a>(
        clock: &'a BudgetClock,
        credential: Option<&'a Credential>,
    ) -> git2::RemoteCallbacks<'a> {
        let mut callbacks = git2::RemoteCallbacks::new();
        let mut attempts = 0usize;

        callbacks.credentials(move |_url, username_from_url, allowed| {
            clock
                .check()
                .map_err(|e| git2::Error::from_str(&e.to_string()))?;
            attempts += 1;
            if attempts > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::from_str("authentication failed"));
            }
            match credential {
                Some(cred) if allowed.contains(git2::CredentialType::USER_PASS_PLAINTEXT) => {
                    git2::Cred::userpass_plaintext(cred.username(), cred.expose())
                }
                _ if allowed.contains(git2::CredentialType::SSH_KEY) => {
                    git2::Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"))
                }
                _ => git2::Cred::default(),
            }
        });
        callbacks.transfer_progress(move |_| !clock.exhausted());
        callbacks.sideband_progress(move |_| !clock.exhausted());
        callbacks.push_negotiation(move |_| {
            clock
                .check()
                .map_err(|e| git2::Error::from_str(&e.to_string()))
        });
        callbacks
    }

    /// Classify a transport error, preferring the budget's verdict.
    fn network_error(clock: &BudgetClock, operation: &str, err: git2::Error) -> GitError {
        if let Err(budget_err) = clock.check() {
            return budget_err;
        }
        GitError::Network {
            operation: operation.to_string(),
            message: err.message().to_string(),
        }
    }
}

/// Nested tree under construction from flattened entries.
#[derive(Default)]
struct TreeNode {
    files: BTreeMap<String, (u32, git2::Oid)>,
    dirs: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    fn insert(&mut self, path: &str, mode: u32, oid: git2::Oid) {
        match path.split_once('/') {
            Some((dir, rest)) => self
                .dirs
                .entry(dir.to_string())
                .or_default()
                .insert(rest, mode, oid),
            None => {
                self.files.insert(path.to_string(), (mode, oid));
            }
        }
    }

    fn write(&self, repo: &git2::Repository) -> Result<git2::Oid, GitError> {
        let mut builder = repo
            .treebuilder(None)
            .map_err(|e| GitError::from_git2(e, "treebuilder"))?;
        for (name, (mode, oid)) in &self.files {
            builder
                .insert(name, *oid, *mode as i32)
                .map_err(|e| GitError::from_git2(e, name))?;
        }
        for (name, node) in &self.dirs {
            let oid = node.write(repo)?;
            builder
                .insert(name, oid, 0o040000)
                .map_err(|e| GitError::from_git2(e, name))?;
        }
        builder
            .write()
            .map_err(|e| GitError::from_git2(e, "write tree"))
    }
}

impl RepositoryHandle for Git {
    fn git_dir(&self) -> PathBuf {
        self.repo.path().to_path_buf()
    }

    fn common_dir(&self) -> PathBuf {
        self.repo.commondir().to_path_buf()
    }

    fn work_dir(&self) -> Option<PathBuf> {
        self.repo.workdir().map(Path::to_path_buf)
    }

    fn list_revisions(&self) -> Result<Vec<Revision>, GitError> {
        let mut walk = self
            .repo
            .revwalk()
            .map_err(|e| GitError::from_git2(e, "revwalk"))?;
        walk.set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::REVERSE)
            .map_err(|e| GitError::from_git2(e, "revwalk"))?;
        walk.push_glob("refs/heads/*")
            .map_err(|e| GitError::from_git2(e, "refs/heads"))?;
        walk.push_glob("refs/tags/*")
            .map_err(|e| GitError::from_git2(e, "refs/tags"))?;

        let mut revisions = Vec::new();
        for oid in walk {
            let oid = oid.map_err(|e| GitError::from_git2(e, "revwalk"))?;
            let commit = self
                .repo
                .find_commit(oid)
                .map_err(|e| GitError::from_git2(e, &oid.to_string()))?;
            revisions.push(Self::revision_of(&commit)?);
        }

        tracing::debug!(count = revisions.len(), "listed revisions");
        Ok(revisions)
    }

    fn find_revision(&self, id: &Oid) -> Result<Option<Revision>, GitError> {
        let oid = Self::to_git2(id)?;
        match self.repo.find_commit(oid) {
            Ok(commit) => Ok(Some(Self::revision_of(&commit)?)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(GitError::from_git2(e, id.as_str())),
        }
    }

    fn tree_entries(&self, tree: &Oid) -> Result<Vec<TreeEntry>, GitError> {
        let tree = self
            .repo
            .find_tree(Self::to_git2(tree)?)
            .map_err(|e| GitError::from_git2(e, tree.as_str()))?;

        let mut entries = Vec::new();
        let mut failure = None;
        tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
            if entry.kind() == Some(git2::ObjectType::Tree) {
                return git2::TreeWalkResult::Ok;
            }
            let name = String::from_utf8_lossy(entry.name_bytes());
            match Self::from_git2_oid(entry.id()) {
                Ok(blob) => {
                    entries.push(TreeEntry {
                        path: format!("{}{}", root, name),
                        mode: entry.filemode() as u32,
                        blob,
                    });
                    git2::TreeWalkResult::Ok
                }
                Err(e) => {
                    failure = Some(e);
                    git2::TreeWalkResult::Abort
                }
            }
        })
        .map_err(|e| GitError::from_git2(e, "tree walk"))?;

        if let Some(e) = failure {
            return Err(e);
        }
        entries.sort();
        Ok(entries)
    }

    fn read_blob(&self, blob: &Oid) -> Result<Vec<u8>, GitError> {
        let found = self
            .repo
            .find_blob(Self::to_git2(blob)?)
            .map_err(|e| GitError::from_git2(e, blob.as_str()))?;
        Ok(found.content().to_vec())
    }

    fn write_tree(&self, entries: &[TreeEntry]) -> Result<Oid, GitError> {
        let mut root = TreeNode::default();
        for entry in entries {
            root.insert(&entry.path, entry.mode, Self::to_git2(&entry.blob)?);
        }
        Self::from_git2_oid(root.write(&self.repo)?)
    }

    fn write_revision(
        &self,
        tree: &Oid,
        parents: &[Oid],
        meta: &RevisionMeta,
    ) -> Result<Oid, GitError> {
        let tree = self
            .repo
            .find_tree(Self::to_git2(tree)?)
            .map_err(|e| GitError::from_git2(e, tree.as_str()))?;
        let parents = parents
            .iter()
            .map(|p| {
                self.repo
                    .find_commit(Self::to_git2(p)?)
                    .map_err(|e| GitError::from_git2(e, p.as_str()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();

        let author = Self::to_git2_signature(&meta.author)?;
        let committer = Self::to_git2_signature(&meta.committer)?;
        let oid = self
            .repo
            .commit(None, &author, &committer, &meta.message, &tree, &parent_refs)
            .map_err(|e| GitError::from_git2(e, "commit"))?;
        Self::from_git2_oid(oid)
    }

    fn is_ancestor(&self, ancestor: &Oid, descendant: &Oid) -> Result<bool, GitError> {
        if ancestor == descendant {
            return Ok(true);
        }

        let ancestor_oid = Self::to_git2(ancestor)?;
        let descendant_oid = Self::to_git2(descendant)?;
        if self.repo.find_commit(ancestor_oid).is_err()
            || self.repo.find_commit(descendant_oid).is_err()
        {
            return Ok(false);
        }

        match self.repo.graph_descendant_of(descendant_oid, ancestor_oid) {
            Ok(result) => Ok(result),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(false),
            Err(e) => Err(GitError::from_git2(e, "ancestry")),
        }
    }

    fn list_refs(&self) -> Result<Vec<RefEntry>, GitError> {
        let refs = self
            .repo
            .references()
            .map_err(|e| GitError::from_git2(e, "references"))?;

        let mut entries = Vec::new();
        for reference in refs {
            let reference = reference.map_err(|e| GitError::from_git2(e, "references"))?;
            let name = match reference.name().ok() {
                Some(n) if n.starts_with("refs/heads/") || n.starts_with("refs/tags/") => n,
                _ => continue,
            };
            let Ok(ref_name) = RefName::new(name) else {
                continue;
            };
            let Some(target) = reference.target() else {
                continue;
            };
            // Tags of trees or blobs are not part of the history graph
            let Ok(commit) = reference.peel_to_commit() else {
                tracing::debug!(refname = name, "skipping ref that does not point at a commit");
                continue;
            };

            entries.push(RefEntry {
                name: ref_name,
                target: Self::from_git2_oid(target)?,
                commit: Self::from_git2_oid(commit.id())?,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn update_ref(
        &self,
        refname: &RefName,
        new: &Oid,
        expected_old: Option<&Oid>,
        message: &str,
    ) -> Result<(), GitError> {
        let current = self.try_resolve_ref_raw(refname.as_str())?;

        match (expected_old, current.as_ref()) {
            (Some(expected), Some(actual)) if expected.as_str() != actual => {
                return Err(GitError::CasFailed {
                    refname: refname.to_string(),
                    expected: expected.to_string(),
                    actual: actual.clone(),
                });
            }
            (Some(expected), None) => {
                return Err(GitError::CasFailed {
                    refname: refname.to_string(),
                    expected: expected.to_string(),
                    actual: "<none>".to_string(),
                });
            }
            (None, Some(actual)) => {
                return Err(GitError::CasFailed {
                    refname: refname.to_string(),
                    expected: "<none>".to_string(),
                    actual: actual.clone(),
                });
            }
            _ => {}
        }

        self.repo
            .reference(refname.as_str(), Self::to_git2(new)?, true, message)
            .map_err(|e| GitError::from_git2(e, refname.as_str()))?;
        Ok(())
    }

    fn delete_ref(&self, refname: &RefName, expected_old: &Oid) -> Result<(), GitError> {
        match self.try_resolve_ref_raw(refname.as_str())? {
            None => {
                return Err(GitError::RefNotFound {
                    refname: refname.to_string(),
                });
            }
            Some(actual) if actual != expected_old.as_str() => {
                return Err(GitError::CasFailed {
                    refname: refname.to_string(),
                    expected: expected_old.to_string(),
                    actual,
                });
            }
            _ => {}
        }

        let mut reference = self
            .repo
            .find_reference(refname.as_str())
            .map_err(|e| GitError::from_git2(e, refname.as_str()))?;
        reference
            .delete()
            .map_err(|e| GitError::from_git2(e, refname.as_str()))
    }

    fn worktree_status(&self) -> Result<WorktreeStatus, GitError> {
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true)
            .include_ignored(false)
            .exclude_submodules(true);

        let statuses = self
            .repo
            .statuses(Some(&mut opts))
            .map_err(|e| GitError::from_git2(e, "status"))?;

        let mut result = WorktreeStatus::default();
        for entry in statuses.iter() {
            let status = entry.status();

            if status.is_conflicted() {
                result.has_conflicts = true;
            }
            if status.is_index_new()
                || status.is_index_modified()
                || status.is_index_deleted()
                || status.is_index_renamed()
                || status.is_index_typechange()
            {
                result.staged += 1;
            }
            if status.is_wt_modified()
                || status.is_wt_deleted()
                || status.is_wt_renamed()
                || status.is_wt_typechange()
            {
                result.unstaged += 1;
            }
            if status.is_wt_new() {
                result.untracked += 1;
            }
        }

        Ok(result)
    }

    fn head_branch(&self) -> Result<Option<RefName>, GitError> {
        let head = match self.repo.find_reference("HEAD") {
            Ok(h) => h,
            Err(e) => return Err(GitError::from_git2(e, "HEAD")),
        };

        match head.symbolic_target().ok().flatten() {
            Some(target) if target.starts_with("refs/heads/") => Ok(Some(RefName::new(target)?)),
            _ => Ok(None),
        }
    }

    fn reset_index_to(&self, revision: &Oid) -> Result<(), GitError> {
        let commit = self
            .repo
            .find_commit(Self::to_git2(revision)?)
            .map_err(|e| GitError::from_git2(e, revision.as_str()))?;
        let tree = commit
            .tree()
            .map_err(|e| GitError::from_git2(e, revision.as_str()))?;

        let mut index = self
            .repo
            .index()
            .map_err(|e| GitError::from_git2(e, "index"))?;
        index
            .read_tree(&tree)
            .map_err(|e| GitError::from_git2(e, "index"))?;
        index.write().map_err(|e| GitError::from_git2(e, "index"))?;

        tracing::debug!(revision = %revision.short(7), "index reset");
        Ok(())
    }

    fn get_remote(&self, name: &str) -> Result<Option<String>, GitError> {
        match self.repo.find_remote(name) {
            Ok(remote) => Ok(remote.url().ok().map(String::from)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) if e.code() == git2::ErrorCode::InvalidSpec => Ok(None),
            Err(e) => Err(GitError::from_git2(e, name)),
        }
    }

    fn set_remote(&self, name: &str, url: &str) -> Result<(), GitError> {
        if self.get_remote(name)?.is_some() {
            self.repo
                .remote_set_url(name, url)
                .map_err(|e| GitError::from_git2(e, name))?;
        } else {
            self.repo
                .remote(name, url)
                .map_err(|e| GitError::from_git2(e, name))?;
        }
        Ok(())
    }

    fn list_remotes(&self) -> Result<Vec<(String, String)>, GitError> {
        let names = self
            .repo
            .remotes()
            .map_err(|e| GitError::from_git2(e, "remotes"))?;

        let mut remotes = Vec::new();
        for name in names.iter().flatten().flatten() {
            if let Some(url) = self.get_remote(name)? {
                remotes.push((name.to_string(), url));
            }
        }
        Ok(remotes)
    }

    fn fetch(
        &self,
        url: &str,
        credential: Option<&Credential>,
        budget: &NetworkBudget,
    ) -> Result<BTreeMap<String, Oid>, GitError> {
        let clock = budget.start("fetch");
        clock.check()?;

        let mut remote = self
            .repo
            .remote_anonymous(url)
            .map_err(|e| GitError::from_git2(e, "remote"))?;
        let connection = remote
            .connect_auth(
                git2::Direction::Fetch,
                Some(Self::callbacks(&clock, credential)),
                None,
            )
            .map_err(|e| Self::network_error(&clock, "fetch", e))?;
        let heads = connection
            .list()
            .map_err(|e| Self::network_error(&clock, "fetch", e))?;

        let mut tips = BTreeMap::new();
        for head in heads {
            let name = head.name();
            if name == "HEAD" || name.ends_with("^{}") {
                continue;
            }
            tips.insert(name.to_string(), Self::from_git2_oid(head.oid())?);
        }

        tracing::debug!(refs = tips.len(), "listed remote refs");
        Ok(tips)
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

        let specs: Vec<String> = refspecs
            .iter()
            .map(|spec| match (force, spec.starts_with('+')) {
                (true, false) => format!("+{}", spec),
                _ => spec.clone(),
            })
            .collect();

        let mut remote = self
            .repo
            .remote_anonymous(url)
            .map_err(|e| GitError::from_git2(e, "remote"))?;

        let statuses = RefCell::new(Vec::new());
        let mut callbacks = Self::callbacks(&clock, credential);
        callbacks.push_update_reference(|refname, status| {
            statuses.borrow_mut().push(RefPushStatus {
                refname: refname.to_string(),
                rejected: status.map(String::from),
            });
            Ok(())
        });
        let mut opts = git2::PushOptions::new();
        opts.remote_callbacks(callbacks);

        let result = remote.push(&specs, Some(&mut opts));
        drop(opts);
        result.map_err(|e| Self::network_error(&clock, "push", e))?;

        let outcome = PushOutcome {
            statuses: statuses.into_inner(),
        };
        tracing::debug!(
            refs = outcome.statuses.len(),
            rejected = outcome.rejected().count(),
            "push completed"
        );
        Ok(outcome)
    }
}
