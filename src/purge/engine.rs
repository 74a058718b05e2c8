//! purge::engine
//!
//! The history rewrite.
//!
//! # Algorithm
//!
//! 1. Refuse a dirty working tree, then claim the purge marker
//! 2. Snapshot local branches and tags
//! 3. Scan every reachable tree for a match; with none, stop before
//!    writing anything
//! 4. Walk every reachable revision ancestors-first, rewriting trees and
//!    mapping parents through the rewrite
//! 5. Re-read refs; any drift since the snapshot is a conflict
//! 6. Move refs with CAS, undoing already-moved refs if one fails
//! 7. Reset the index to the rewritten HEAD, moving refs back if that fails
//!
//! Trees are cached by id, so a tree shared by many revisions is
//! filtered once.
//!
//! # Rollback Data
//!
//! No backup refs are written: they would keep the purged objects
//! reachable. The old ref targets live only in [`RewriteResult::ref_updates`],
//! which [`HistoryPurgeEngine::restore`] consumes.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;

use super::matcher::{ContentCache, PathMatcher};
use super::{PurgeError, PurgeMode, PurgeSpec};
use crate::core::paths::ScourPaths;
use crate::core::types::{Oid, RefName, UtcTimestamp};
use crate::git::{RefEntry, RepositoryHandle, Revision, TreeEntry};

/// What happened to one original revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionFate {
    /// Same tree, same parents, same id
    Unchanged,
    /// Written again under a new id
    Rewritten(Oid),
    /// Dropped because it became empty
    Removed,
}

/// One ref moved by a purge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefChange {
    pub refname: RefName,
    pub old: Oid,
    /// None if the ref was deleted
    pub new: Option<Oid>,
}

/// Result of one purge run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteResult {
    /// Every original revision, by original id
    pub mapping: BTreeMap<Oid, RevisionFate>,
    /// Distinct blob ids dropped from at least one tree
    pub objects_purged: usize,
    pub revisions_rewritten: usize,
    pub revisions_removed: usize,
    pub ref_updates: Vec<RefChange>,
    /// Branch HEAD pointed at when the purge ran
    pub head: Option<RefName>,
}

impl RewriteResult {
    /// Nothing matched, nothing was rewritten.
    pub fn is_noop(&self) -> bool {
        self.objects_purged == 0 && self.ref_updates.is_empty()
    }

    /// New id of an original revision, if it survived.
    pub fn new_id<'a>(&'a self, old: &'a Oid) -> Option<&'a Oid> {
        match self.mapping.get(old)? {
            RevisionFate::Unchanged => Some(old),
            RevisionFate::Rewritten(new) => Some(new),
            RevisionFate::Removed => None,
        }
    }

    /// One-line description for logs and the audit record.
    pub fn summary(&self) -> String {
        format!(
            "{} objects purged, {} revisions rewritten, {} removed, {} refs moved",
            self.objects_purged,
            self.revisions_rewritten,
            self.revisions_removed,
            self.ref_updates.len()
        )
    }
}

#[derive(Serialize)]
struct MarkerContents {
    pid: u32,
    started_at: UtcTimestamp,
}

/// Exclusive purge marker, removed on drop.
struct PurgeMarker {
    path: PathBuf,
}

impl PurgeMarker {
    fn claim(paths: &ScourPaths) -> Result<Self, PurgeError> {
        let path = paths.repo_purge_marker_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(PurgeError::RewriteConflict {
                    message: format!(
                        "another purge is running or was interrupted; if no scour process is active, remove {}",
                        path.display()
                    ),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let contents = MarkerContents {
            pid: std::process::id(),
            started_at: UtcTimestamp::now(),
        };
        let json = serde_json::to_string(&contents).map_err(std::io::Error::other)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;

        Ok(Self { path })
    }
}

impl Drop for PurgeMarker {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove purge marker");
        }
    }
}

/// Rewrites history through a [`RepositoryHandle`].
pub struct HistoryPurgeEngine<'a> {
    handle: &'a dyn RepositoryHandle,
    paths: ScourPaths,
}

/// Per-run rewrite state.
struct Rewrite<'m> {
    matcher: &'m PathMatcher,
    mode: PurgeMode,
    content: ContentCache,
    /// original tree -> (filtered tree, dropped blobs)
    trees: HashMap<Oid, (Oid, Vec<Oid>)>,
    purged: BTreeSet<Oid>,
}

impl<'a> HistoryPurgeEngine<'a> {
    pub fn new(handle: &'a dyn RepositoryHandle, paths: ScourPaths) -> Self {
        Self { handle, paths }
    }

    /// Run a purge.
    ///
    /// A predicate that matches nothing yields a no-op result
    /// ([`RewriteResult::is_noop`]) and moves no refs.
    ///
    /// # Errors
    ///
    /// - [`PurgeError::DirtyWorkingState`] before anything is read
    /// - [`PurgeError::RewriteConflict`] if a marker exists or refs moved
    ///   during the rewrite; no ref is left moved
    /// - [`PurgeError::InvalidPredicate`] for malformed patterns
    pub fn purge(&self, spec: &PurgeSpec) -> Result<RewriteResult, PurgeError> {
        let status = self.handle.worktree_status()?;
        if !status.is_clean() {
            return Err(PurgeError::DirtyWorkingState {
                details: status.describe(),
            });
        }

        let matcher = spec.matcher()?;
        let _marker = PurgeMarker::claim(&self.paths)?;

        let snapshot = self.handle.list_refs()?;
        let revisions = self.handle.list_revisions()?;
        tracing::info!(
            revisions = revisions.len(),
            refs = snapshot.len(),
            mode = %spec.mode,
            predicate = %spec.predicate,
            "purging history"
        );

        let mut rewrite = Rewrite {
            matcher: &matcher,
            mode: spec.mode,
            content: ContentCache::new(),
            trees: HashMap::new(),
            purged: BTreeSet::new(),
        };

        let head = self.handle.head_branch()?;
        if !self.matches_anywhere(&mut rewrite, &revisions)? {
            tracing::warn!(predicate = %spec.predicate, "predicate matched nothing; history left untouched");
            return Ok(RewriteResult {
                mapping: revisions
                    .iter()
                    .map(|r| (r.id.clone(), RevisionFate::Unchanged))
                    .collect(),
                head,
                ..Default::default()
            });
        }

        let mut result = RewriteResult {
            head,
            ..Default::default()
        };
        // original id -> ids that stand in for it among the new parents
        let mut stand_ins: HashMap<Oid, Vec<Oid>> = HashMap::new();
        // surviving (new or unchanged) id -> its tree
        let mut tree_of: HashMap<Oid, Oid> = HashMap::new();

        for rev in &revisions {
            let new_tree = self.filter_tree(&mut rewrite, &rev.tree)?;

            let mut new_parents: Vec<Oid> = Vec::new();
            for parent in &rev.parents {
                for stand_in in stand_ins.get(parent).map(Vec::as_slice).unwrap_or(&[]) {
                    if !new_parents.contains(stand_in) {
                        new_parents.push(stand_in.clone());
                    }
                }
            }

            if new_tree == rev.tree && new_parents == rev.parents {
                result.mapping.insert(rev.id.clone(), RevisionFate::Unchanged);
                stand_ins.insert(rev.id.clone(), vec![rev.id.clone()]);
                tree_of.insert(rev.id.clone(), rev.tree.clone());
                continue;
            }

            let empty = match new_parents.as_slice() {
                [] => self.handle.tree_entries(&new_tree)?.is_empty(),
                [only] => tree_of.get(only) == Some(&new_tree),
                _ => false,
            };
            if spec.prune_empty && empty && rev.parents.len() <= 1 {
                result.mapping.insert(rev.id.clone(), RevisionFate::Removed);
                result.revisions_removed += 1;
                stand_ins.insert(rev.id.clone(), new_parents);
                continue;
            }

            let new_id = self
                .handle
                .write_revision(&new_tree, &new_parents, &rev.meta)?;
            tracing::debug!(old = %rev.id.short(7), new = %new_id.short(7), "rewrote revision");
            result
                .mapping
                .insert(rev.id.clone(), RevisionFate::Rewritten(new_id.clone()));
            result.revisions_rewritten += 1;
            stand_ins.insert(rev.id.clone(), vec![new_id.clone()]);
            tree_of.insert(new_id, new_tree);
        }

        result.objects_purged = rewrite.purged.len();

        let current = self.handle.list_refs()?;
        if current != snapshot {
            return Err(PurgeError::RewriteConflict {
                message: "refs changed while history was being rewritten; no refs were moved"
                    .to_string(),
            });
        }

        result.ref_updates = self.move_refs(&snapshot, &result, &stand_ins)?;

        if let Err(e) = self.reset_head_index(&result) {
            tracing::warn!(error = %e, "index reset failed; restoring moved refs");
            if let Err(restore_err) = self.restore_refs(&result.ref_updates) {
                tracing::warn!(error = %restore_err, "could not restore every ref");
            }
            return Err(e);
        }

        tracing::info!(summary = %result.summary(), "purge complete");
        Ok(result)
    }

    /// Whether any entry of any reachable tree matches. Read-only.
    fn matches_anywhere(
        &self,
        rewrite: &mut Rewrite<'_>,
        revisions: &[Revision],
    ) -> Result<bool, PurgeError> {
        let mut seen: HashSet<&Oid> = HashSet::new();
        for rev in revisions {
            if !seen.insert(&rev.tree) {
                continue;
            }
            for entry in self.handle.tree_entries(&rev.tree)? {
                let handle = self.handle;
                let matched = rewrite.content.matches(rewrite.matcher, &entry, |blob| {
                    handle.read_blob(blob).map_err(PurgeError::from)
                })?;
                if matched {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Point the index at HEAD's new target if the purge moved HEAD's branch.
    fn reset_head_index(&self, result: &RewriteResult) -> Result<(), PurgeError> {
        let Some(head) = &result.head else {
            return Ok(());
        };
        if let Some(change) = result.ref_updates.iter().find(|c| &c.refname == head) {
            match &change.new {
                Some(new) => self.handle.reset_index_to(new)?,
                None => tracing::warn!(branch = %head, "HEAD branch was deleted by the purge"),
            }
        }
        Ok(())
    }

    /// Filter one tree, memoized by tree id.
    fn filter_tree(&self, rewrite: &mut Rewrite<'_>, tree: &Oid) -> Result<Oid, PurgeError> {
        if let Some((new_tree, dropped)) = rewrite.trees.get(tree) {
            rewrite.purged.extend(dropped.iter().cloned());
            return Ok(new_tree.clone());
        }

        let entries = self.handle.tree_entries(tree)?;
        let mut kept: Vec<TreeEntry> = Vec::with_capacity(entries.len());
        let mut dropped = Vec::new();
        for entry in entries {
            let handle = self.handle;
            let matched = rewrite.content.matches(rewrite.matcher, &entry, |blob| {
                handle.read_blob(blob).map_err(PurgeError::from)
            })?;

            let keep = match rewrite.mode {
                PurgeMode::RemovePath => !matched,
                PurgeMode::KeepOnly => matched,
            };
            if keep {
                kept.push(entry);
            } else {
                dropped.push(entry.blob);
            }
        }

        let new_tree = if dropped.is_empty() {
            tree.clone()
        } else {
            self.handle.write_tree(&kept)?
        };
        rewrite.purged.extend(dropped.iter().cloned());
        rewrite
            .trees
            .insert(tree.clone(), (new_tree.clone(), dropped));
        Ok(new_tree)
    }

    /// Move every snapshot ref to its rewritten target.
    ///
    /// On failure the refs already moved are put back before returning.
    fn move_refs(
        &self,
        snapshot: &[RefEntry],
        result: &RewriteResult,
        stand_ins: &HashMap<Oid, Vec<Oid>>,
    ) -> Result<Vec<RefChange>, PurgeError> {
        let mut applied: Vec<RefChange> = Vec::new();

        for entry in snapshot {
            let target = match result.mapping.get(&entry.commit) {
                None | Some(RevisionFate::Unchanged) => continue,
                Some(RevisionFate::Rewritten(new)) => Some(new.clone()),
                Some(RevisionFate::Removed) => stand_ins
                    .get(&entry.commit)
                    .and_then(|ids| ids.first().cloned()),
            };

            if entry.target != entry.commit {
                tracing::warn!(
                    refname = %entry.name,
                    "annotated tag re-pointed as a lightweight tag"
                );
            }

            let change = RefChange {
                refname: entry.name.clone(),
                old: entry.target.clone(),
                new: target,
            };
            let outcome = match &change.new {
                Some(new) => self.handle.update_ref(
                    &change.refname,
                    new,
                    Some(&change.old),
                    "scour: purge history",
                ),
                None => self.handle.delete_ref(&change.refname, &change.old),
            };

            if let Err(e) = outcome {
                tracing::warn!(refname = %change.refname, error = %e, "ref update failed; restoring moved refs");
                if let Err(restore_err) = self.restore_refs(&applied) {
                    tracing::warn!(error = %restore_err, "could not restore every ref");
                }
                return Err(e.into());
            }
            tracing::debug!(refname = %change.refname, "ref moved");
            applied.push(change);
        }

        Ok(applied)
    }

    fn restore_refs(&self, changes: &[RefChange]) -> Result<(), PurgeError> {
        for change in changes.iter().rev() {
            self.handle.update_ref(
                &change.refname,
                &change.old,
                change.new.as_ref(),
                "scour: restore purged ref",
            )?;
        }
        Ok(())
    }

    /// Undo a purge: put every moved ref back (CAS against the rewritten
    /// target) and reset the index to the original HEAD.
    ///
    /// Rewritten objects stay in the object store, unreferenced.
    pub fn restore(&self, result: &RewriteResult) -> Result<(), PurgeError> {
        self.restore_refs(&result.ref_updates)?;

        if let Some(head) = &result.head {
            if let Some(change) = result.ref_updates.iter().find(|c| &c.refname == head) {
                self.handle.reset_index_to(&change.old)?;
            }
        }

        tracing::info!(refs = result.ref_updates.len(), "purge rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::memory::{FailOn, MemoryRepository};
    use crate::git::WorktreeStatus;
    use crate::purge::{DirectoryPolicy, PathPredicate};
    use tempfile::TempDir;

    fn setup() -> (TempDir, MemoryRepository) {
        let dir = TempDir::new().unwrap();
        let repo = MemoryRepository::new(dir.path());
        (dir, repo)
    }

    fn engine(repo: &MemoryRepository) -> HistoryPurgeEngine<'_> {
        HistoryPurgeEngine::new(repo, ScourPaths::for_handle(repo))
    }

    fn paths_at(repo: &MemoryRepository, rev: &Oid) -> Vec<String> {
        repo.read_tree(rev).unwrap().into_iter().map(|e| e.path).collect()
    }

    mod scenarios {
        use super::*;

        #[test]
        fn three_revisions_secret_added_then_removed() {
            let (_dir, repo) = setup();
            let r1 = repo.commit("main", "readme", &[("README.md", Some("hi"))]).unwrap();
            let r2 = repo
                .commit("main", "oops", &[("config/secret.env", Some("TOKEN=1"))])
                .unwrap();
            let r3 = repo
                .commit("main", "remove secret", &[("config/secret.env", None)])
                .unwrap();
            let r3_tree = repo.find_revision(&r3).unwrap().unwrap().tree;

            let result = engine(&repo)
                .purge(&PurgeSpec::remove_paths(["config/secret.env"]))
                .unwrap();

            assert_eq!(result.mapping[&r1], RevisionFate::Unchanged);
            let RevisionFate::Rewritten(new2) = &result.mapping[&r2] else {
                panic!("revision 2 should be rewritten");
            };
            let RevisionFate::Rewritten(new3) = &result.mapping[&r3] else {
                panic!("revision 3 should be rewritten");
            };
            assert!(!paths_at(&repo, new2).contains(&"config/secret.env".to_string()));
            assert_eq!(repo.find_revision(new3).unwrap().unwrap().tree, r3_tree);
            assert_eq!(repo.ref_target("refs/heads/main").as_ref(), Some(new3));
            assert_eq!(result.objects_purged, 1);
            assert_eq!(result.revisions_rewritten, 2);
        }

        #[test]
        fn second_run_is_a_noop() {
            let (_dir, repo) = setup();
            repo.commit("main", "a", &[("secret", Some("x")), ("keep", Some("y"))])
                .unwrap();
            let spec = PurgeSpec::remove_paths(["secret"]);

            let first = engine(&repo).purge(&spec).unwrap();
            assert_eq!(first.objects_purged, 1);

            let second = engine(&repo).purge(&spec).unwrap();
            assert!(second.is_noop());
            assert_eq!(second.objects_purged, 0);
        }

        #[test]
        fn unmatched_predicate_moves_nothing() {
            let (_dir, repo) = setup();
            let tip = repo.commit("main", "a", &[("a", Some("1"))]).unwrap();
            repo.clear_operations();

            let result = engine(&repo)
                .purge(&PurgeSpec::remove_paths(["does/not/exist"]))
                .unwrap();
            assert!(result.is_noop());
            assert_eq!(repo.ref_target("refs/heads/main"), Some(tip));
            assert!(repo.operations().is_empty());
        }

        #[test]
        fn keep_only_with_no_match_is_a_noop() {
            let (_dir, repo) = setup();
            repo.commit("main", "a", &[("a", Some("1"))]).unwrap();
            let spec = PurgeSpec {
                mode: PurgeMode::KeepOnly,
                ..PurgeSpec::remove_paths(["missing"])
            };
            repo.clear_operations();
            assert!(engine(&repo).purge(&spec).unwrap().is_noop());
            assert!(repo.operations().is_empty());
        }

        #[test]
        fn keep_only_retains_directory() {
            let (_dir, repo) = setup();
            repo.commit(
                "main",
                "a",
                &[("src/lib.rs", Some("fn x")), ("notes.txt", Some("n"))],
            )
            .unwrap();
            let spec = PurgeSpec {
                mode: PurgeMode::KeepOnly,
                ..PurgeSpec::remove_paths(["src"])
            };
            let result = engine(&repo).purge(&spec).unwrap();
            let tip = repo.ref_target("refs/heads/main").unwrap();
            assert_eq!(paths_at(&repo, &tip), vec!["src/lib.rs"]);
            assert_eq!(result.objects_purged, 1);
        }
    }

    mod refusals {
        use super::*;

        #[test]
        fn dirty_tree_refused_before_any_read() {
            let (_dir, repo) = setup();
            repo.commit("main", "a", &[("secret", Some("x"))]).unwrap();
            repo.set_status(WorktreeStatus {
                unstaged: 1,
                ..Default::default()
            });
            repo.clear_operations();

            let err = engine(&repo)
                .purge(&PurgeSpec::remove_paths(["secret"]))
                .unwrap_err();
            assert!(matches!(err, PurgeError::DirtyWorkingState { .. }));
            assert!(repo.operations().is_empty());
            assert!(!ScourPaths::for_handle(&repo).repo_purge_marker_path().exists());
        }

        #[test]
        fn existing_marker_is_a_conflict() {
            let (_dir, repo) = setup();
            repo.commit("main", "a", &[("secret", Some("x"))]).unwrap();
            let paths = ScourPaths::for_handle(&repo);
            fs::create_dir_all(paths.repo_scour_dir()).unwrap();
            fs::write(paths.repo_purge_marker_path(), "{}").unwrap();

            let err = engine(&repo)
                .purge(&PurgeSpec::remove_paths(["secret"]))
                .unwrap_err();
            assert!(matches!(err, PurgeError::RewriteConflict { .. }));
            // The foreign marker is left alone
            assert!(paths.repo_purge_marker_path().exists());
        }

        #[test]
        fn refs_moving_mid_rewrite_is_a_conflict() {
            let (_dir, repo) = setup();
            let main = repo.commit("main", "a", &[("secret", Some("x"))]).unwrap();
            repo.commit("side", "b", &[("other", Some("y"))]).unwrap();
            let repo = repo.fail_on(FailOn::RefDeletedOnList {
                refname: "refs/heads/side".into(),
                nth: 2,
            });

            let err = engine(&repo)
                .purge(&PurgeSpec::remove_paths(["secret"]))
                .unwrap_err();
            assert!(matches!(err, PurgeError::RewriteConflict { .. }));
            assert!(repo.ref_target("refs/heads/side").is_none());
            assert_eq!(repo.ref_target("refs/heads/main"), Some(main));
            assert!(!ScourPaths::for_handle(&repo).repo_purge_marker_path().exists());
        }

        #[test]
        fn failed_ref_update_restores_moved_refs() {
            let (_dir, repo) = setup();
            repo.commit("main", "a", &[("secret", Some("x"))]).unwrap();
            let tagged = repo.commit("main", "b", &[("b", Some("y"))]).unwrap();
            repo.tag("v1", &tagged).unwrap();
            let repo = repo.fail_on(FailOn::UpdateRef("refs/tags/v1".into()));

            assert!(engine(&repo)
                .purge(&PurgeSpec::remove_paths(["secret"]))
                .is_err());
            assert_eq!(repo.ref_target("refs/heads/main"), Some(tagged.clone()));
            assert_eq!(repo.ref_target("refs/tags/v1"), Some(tagged));
        }

        #[test]
        fn failed_index_reset_restores_moved_refs() {
            let (_dir, repo) = setup();
            repo.commit("main", "a", &[("secret", Some("x"))]).unwrap();
            let tip = repo.commit("main", "b", &[("b", Some("y"))]).unwrap();
            let repo = repo.fail_on(FailOn::ResetIndex);

            assert!(engine(&repo)
                .purge(&PurgeSpec::remove_paths(["secret"]))
                .is_err());
            assert_eq!(repo.ref_target("refs/heads/main"), Some(tip));
            assert!(!ScourPaths::for_handle(&repo).repo_purge_marker_path().exists());
        }
    }

    mod pruning {
        use super::*;

        #[test]
        fn prune_empty_drops_revisions_that_only_touched_the_path() {
            let (_dir, repo) = setup();
            let r1 = repo.commit("main", "a", &[("a", Some("1"))]).unwrap();
            let r2 = repo.commit("main", "oops", &[("secret", Some("x"))]).unwrap();
            let r3 = repo.commit("main", "c", &[("c", Some("3"))]).unwrap();

            let spec = PurgeSpec {
                prune_empty: true,
                ..PurgeSpec::remove_paths(["secret"])
            };
            let result = engine(&repo).purge(&spec).unwrap();

            assert_eq!(result.mapping[&r2], RevisionFate::Removed);
            let new3 = result.new_id(&r3).unwrap().clone();
            assert_eq!(repo.find_revision(&new3).unwrap().unwrap().parents, vec![r1]);
            assert_eq!(result.revisions_removed, 1);
        }

        #[test]
        fn branch_on_removed_root_is_deleted() {
            let (_dir, repo) = setup();
            repo.commit("main", "a", &[("a", Some("1"))]).unwrap();
            repo.commit("leak", "only secret", &[("secret", Some("x"))]).unwrap();

            let spec = PurgeSpec {
                prune_empty: true,
                ..PurgeSpec::remove_paths(["secret"])
            };
            let result = engine(&repo).purge(&spec).unwrap();
            assert!(repo.ref_target("refs/heads/leak").is_none());
            assert!(result
                .ref_updates
                .iter()
                .any(|c| c.refname.as_str() == "refs/heads/leak" && c.new.is_none()));
        }
    }

    #[test]
    fn restore_puts_refs_and_index_back() {
        let (_dir, repo) = setup();
        repo.commit("main", "a", &[("secret", Some("x"))]).unwrap();
        let tip = repo.commit("main", "b", &[("b", Some("y"))]).unwrap();
        let original_tree = repo.find_revision(&tip).unwrap().unwrap().tree;

        let engine = engine(&repo);
        let result = engine.purge(&PurgeSpec::remove_paths(["secret"])).unwrap();
        assert_ne!(repo.index_tree(), Some(original_tree.clone()));

        engine.restore(&result).unwrap();
        assert_eq!(repo.ref_target("refs/heads/main"), Some(tip));
        assert_eq!(repo.index_tree(), Some(original_tree));
    }

    #[test]
    fn content_predicate_purges_matching_blobs_anywhere() {
        let (_dir, repo) = setup();
        repo.commit(
            "main",
            "a",
            &[("notes.md", Some("token ghp_ABCDEFGH")), ("ok.md", Some("fine"))],
        )
        .unwrap();
        let spec = PurgeSpec {
            predicate: PathPredicate::Content("ghp_[A-Z]{8}".into()),
            mode: PurgeMode::RemovePath,
            directory_policy: DirectoryPolicy::Prefix,
            prune_empty: false,
        };
        engine(&repo).purge(&spec).unwrap();
        let tip = repo.ref_target("refs/heads/main").unwrap();
        assert_eq!(paths_at(&repo, &tip), vec!["ok.md"]);
    }
}
