//! Property-based tests for path matching and purge invariants.
//!
//! Purges run against the in-memory repository so that many histories can
//! be generated cheaply.

use std::collections::BTreeSet;

use proptest::prelude::*;
use tempfile::TempDir;

use scour::core::paths::ScourPaths;
use scour::core::types::Oid;
use scour::git::memory::MemoryRepository;
use scour::git::RepositoryHandle;
use scour::purge::{
    normalize_path, DirectoryPolicy, HistoryPurgeEngine, PathMatcher, PathPredicate, PurgeSpec,
    RevisionFate,
};
use scour::remotes::registry::url_embeds_credentials;

/// One path component: lowercase letters and digits.
fn component() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,8}"
}

/// A relative path of one to four components.
fn rel_path() -> impl Strategy<Value = String> {
    prop::collection::vec(component(), 1..5).prop_map(|parts| parts.join("/"))
}

/// A history: each commit writes a few files.
fn history() -> impl Strategy<Value = Vec<Vec<String>>> {
    prop::collection::vec(prop::collection::vec(rel_path(), 1..4), 1..6)
}

/// Apply `commits` on main. A path that would collide with an existing
/// file or directory is skipped.
///
/// Returns each revision with the files its tree holds.
fn build(repo: &MemoryRepository, commits: &[Vec<String>]) -> Vec<(Oid, BTreeSet<String>)> {
    let mut revisions = Vec::new();
    let mut files: BTreeSet<String> = BTreeSet::new();
    for (i, paths) in commits.iter().enumerate() {
        let mut changes = Vec::new();
        for path in paths {
            let clashes = files.iter().any(|f| {
                f != path
                    && (f.starts_with(&format!("{}/", path)) || path.starts_with(&format!("{}/", f)))
            });
            if !clashes && !changes.iter().any(|(p, _): &(String, String)| p == path) {
                files.insert(path.clone());
                changes.push((path.clone(), format!("{} v{}", path, i)));
            }
        }
        let changes: Vec<(&str, Option<&str>)> = changes
            .iter()
            .map(|(p, c)| (p.as_str(), Some(c.as_str())))
            .collect();
        let id = repo.commit("main", &format!("commit {}", i), &changes).unwrap();
        revisions.push((id, files.clone()));
    }
    revisions
}

fn all_paths(repo: &MemoryRepository) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for rev in repo.list_revisions().unwrap() {
        for entry in repo.tree_entries(&rev.tree).unwrap() {
            out.insert(entry.path);
        }
    }
    out
}

proptest! {
    #[test]
    fn normalize_is_idempotent(path in rel_path()) {
        let once = normalize_path(&format!("./{}/", path)).unwrap();
        prop_assert_eq!(&once, &path);
        prop_assert_eq!(normalize_path(&once).unwrap(), once);
    }

    #[test]
    fn prefix_policy_matches_descendants_only(dir in rel_path(), rest in rel_path()) {
        let matcher =
            PathMatcher::compile(&PathPredicate::Exact(dir.clone()), DirectoryPolicy::Prefix).unwrap();
        let child = format!("{}/{}", dir, rest);
        let sibling = format!("{}x/{}", dir, rest);
        prop_assert!(matcher.matches_path(&dir));
        prop_assert!(matcher.matches_path(&child));
        prop_assert!(!matcher.matches_path(&sibling));

        let files_only =
            PathMatcher::compile(&PathPredicate::Exact(dir.clone()), DirectoryPolicy::FilesOnly)
                .unwrap();
        prop_assert!(!files_only.matches_path(&child));
    }

    #[test]
    fn http_userinfo_always_rejected(user in "[a-z]{1,8}", host in "[a-z]{1,8}") {
        let url = format!("https://{}@{}.example.com/r.git", user, host);
        prop_assert!(url_embeds_credentials(&url));
        let clean = format!("https://{}.example.com/r.git", host);
        prop_assert!(!url_embeds_credentials(&clean));
    }

    #[test]
    fn purge_removes_and_converges(commits in history(), pick in any::<prop::sample::Index>()) {
        let dir = TempDir::new().unwrap();
        let repo = MemoryRepository::new(dir.path());
        let revisions = build(&repo, &commits);

        let before = all_paths(&repo);
        let target = pick.get(&before.iter().cloned().collect::<Vec<_>>()).clone();
        let spec = PurgeSpec::remove_paths([target.clone()]);
        let paths = ScourPaths::for_handle(&repo);

        let result = HistoryPurgeEngine::new(&repo, paths.clone()).purge(&spec).unwrap();
        // history is linear, so a revision without the file never had it
        for (id, files) in &revisions {
            if !files.contains(&target) {
                prop_assert_eq!(&result.mapping[id], &RevisionFate::Unchanged);
            }
        }
        let after = all_paths(&repo);
        prop_assert!(!after.contains(&target));
        let others: BTreeSet<String> = before.into_iter().filter(|p| *p != target).collect();
        prop_assert_eq!(after, others);

        let tip = repo.ref_target("refs/heads/main");
        let again = HistoryPurgeEngine::new(&repo, paths).purge(&spec).unwrap();
        prop_assert!(again.is_noop());
        prop_assert_eq!(repo.ref_target("refs/heads/main"), tip);
    }
}
