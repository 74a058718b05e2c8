//! Integration tests for history purge against real git repositories.
//!
//! Fixtures are built with the git CLI; scour itself only goes through
//! libgit2.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

use scour::cli::{self, commands};
use scour::cli::args::MatchArgs;
use scour::core::ops::audit::{AuditLog, Outcome};
use scour::core::paths::ScourPaths;
use scour::engine::Context;
use scour::git::{Git, RepositoryHandle};
use scour::purge::{HistoryPurgeEngine, PurgeSpec};

// =============================================================================
// Test Fixtures
// =============================================================================

struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// README, then a secret, then the secret deleted, on main.
    fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        run_git(dir.path(), &["init", "-b", "main"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["config", "user.name", "Test User"]);

        let repo = Self { dir };
        repo.commit("README.md", "# Test Repo\n", "Initial commit");
        repo.commit("config/secret.env", "TOKEN=hunter2\n", "Add config");
        run_git(repo.path(), &["rm", "-q", "config/secret.env"]);
        run_git(repo.path(), &["commit", "-q", "-m", "Remove config"]);
        repo
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn git(&self) -> Git {
        Git::open(self.path()).expect("failed to open test repo")
    }

    fn paths(&self) -> ScourPaths {
        ScourPaths::for_handle(&self.git())
    }

    fn context(&self) -> Context {
        Context {
            cwd: Some(self.path().to_path_buf()),
            debug: false,
            quiet: true,
        }
    }

    fn commit(&self, file: &str, content: &str, message: &str) {
        let path = self.path().join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        run_git(self.path(), &["add", file]);
        run_git(self.path(), &["commit", "-q", "-m", message]);
    }

    fn rev_parse(&self, rev: &str) -> String {
        git_stdout(self.path(), &["rev-parse", rev])
    }

    /// Revisions on any ref that touch `path`.
    fn history_of(&self, path: &str) -> String {
        git_stdout(self.path(), &["log", "--all", "--format=%H", "--", path])
    }
}

fn run_git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git command failed");
    if !output.status.success() {
        panic!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }
}

fn git_stdout(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git command failed");
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn match_paths(paths: &[&str]) -> MatchArgs {
    MatchArgs {
        paths: paths.iter().map(|p| p.to_string()).collect(),
        ..Default::default()
    }
}

// =============================================================================
// Engine against libgit2
// =============================================================================

mod engine {
    use super::*;

    #[test]
    fn removes_path_from_all_history() {
        let repo = TestRepo::new();
        run_git(repo.path(), &["tag", "v1"]);
        assert!(!repo.history_of("config/secret.env").is_empty());
        let root = git_stdout(repo.path(), &["rev-list", "--max-parents=0", "main"]);

        let git = repo.git();
        let result = HistoryPurgeEngine::new(&git, repo.paths())
            .purge(&PurgeSpec::remove_paths(["config/secret.env"]))
            .unwrap();

        assert_eq!(result.revisions_rewritten, 2);
        assert!(repo.history_of("config/secret.env").is_empty());
        assert_eq!(repo.rev_parse("v1"), repo.rev_parse("main"));
        assert_eq!(
            git_stdout(repo.path(), &["log", "--format=%s", "main"]),
            "Remove config\nAdd config\nInitial commit"
        );
        // The first revision never held the secret and keeps its id
        assert_eq!(
            git_stdout(repo.path(), &["rev-list", "--max-parents=0", "main"]),
            root
        );
    }

    #[test]
    fn second_run_changes_nothing() {
        let repo = TestRepo::new();
        let git = repo.git();
        let spec = PurgeSpec::remove_paths(["config/secret.env"]);
        HistoryPurgeEngine::new(&git, repo.paths()).purge(&spec).unwrap();
        let tip = repo.rev_parse("main");

        let again = HistoryPurgeEngine::new(&git, repo.paths()).purge(&spec).unwrap();
        assert!(again.is_noop());
        assert_eq!(repo.rev_parse("main"), tip);
    }

    #[test]
    fn file_in_head_stays_on_disk_untracked() {
        let repo = TestRepo::new();
        repo.commit("keys/id.pem", "-----BEGIN-----\n", "Add key");

        let git = repo.git();
        HistoryPurgeEngine::new(&git, repo.paths())
            .purge(&PurgeSpec::remove_paths(["keys"]))
            .unwrap();

        assert!(repo.history_of("keys/id.pem").is_empty());
        assert!(repo.path().join("keys/id.pem").exists());
        let status = git_stdout(repo.path(), &["status", "--porcelain"]);
        assert_eq!(status, "?? keys/");
    }

    #[test]
    fn restore_puts_refs_back() {
        let repo = TestRepo::new();
        let before = repo.rev_parse("main");
        let git = repo.git();
        let engine = HistoryPurgeEngine::new(&git, repo.paths());

        let result = engine
            .purge(&PurgeSpec::remove_paths(["config/secret.env"]))
            .unwrap();
        assert_ne!(repo.rev_parse("main"), before);

        engine.restore(&result).unwrap();
        assert_eq!(repo.rev_parse("main"), before);
        assert_eq!(git_stdout(repo.path(), &["status", "--porcelain"]), "");
    }

    #[test]
    fn worktree_status_sees_staged_changes() {
        let repo = TestRepo::new();
        std::fs::write(repo.path().join("README.md"), "changed\n").unwrap();
        run_git(repo.path(), &["add", "README.md"]);
        assert!(!repo.git().worktree_status().unwrap().is_clean());
    }
}

// =============================================================================
// purge command
// =============================================================================

mod command {
    use super::*;

    #[test]
    fn purge_updates_ignore_file_and_audits() {
        let repo = TestRepo::new();
        commands::purge(
            &repo.context(),
            &match_paths(&["config/secret.env"]),
            false,
            false,
            false,
        )
        .unwrap();

        assert!(repo.history_of("config/secret.env").is_empty());
        let ignore = std::fs::read_to_string(repo.path().join(".gitignore")).unwrap();
        assert_eq!(ignore, "/config/secret.env\n");

        let records = AuditLog::new(&repo.paths()).read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command, "purge");
        assert_eq!(records[0].outcome, Outcome::Committed);
    }

    #[test]
    fn no_ignore_leaves_ignore_file_alone() {
        let repo = TestRepo::new();
        commands::purge(
            &repo.context(),
            &match_paths(&["config/secret.env"]),
            false,
            false,
            true,
        )
        .unwrap();
        assert!(!repo.path().join(".gitignore").exists());
    }

    #[test]
    fn dirty_tree_is_refused() {
        let repo = TestRepo::new();
        let before = repo.rev_parse("main");
        std::fs::write(repo.path().join("README.md"), "edited\n").unwrap();

        let err = commands::purge(
            &repo.context(),
            &match_paths(&["config/secret.env"]),
            false,
            false,
            false,
        )
        .unwrap_err();
        assert_eq!(cli::exit_code(&err), 1);
        assert_eq!(repo.rev_parse("main"), before);
        assert!(!repo.path().join(".gitignore").exists());
    }

    #[test]
    fn glob_and_prune_empty() {
        let repo = TestRepo::new();
        repo.commit("certs/a.pem", "a\n", "Add cert");
        run_git(repo.path(), &["rm", "-q", "certs/a.pem"]);
        run_git(repo.path(), &["commit", "-q", "-m", "Drop cert"]);

        let args = MatchArgs {
            globs: vec!["*.pem".to_string()],
            ..Default::default()
        };
        commands::purge(&repo.context(), &args, false, true, true).unwrap();

        let subjects = git_stdout(repo.path(), &["log", "--format=%s", "main"]);
        assert!(!subjects.contains("cert"));
        assert!(subjects.contains("Initial commit"));
    }

    #[test]
    fn keep_only_drops_everything_else() {
        let repo = TestRepo::new();
        repo.commit("docs/guide.md", "guide\n", "Add docs");
        commands::purge(&repo.context(), &match_paths(&["docs"]), true, false, false).unwrap();

        let files = git_stdout(repo.path(), &["ls-tree", "-r", "--name-only", "main"]);
        assert_eq!(files, "docs/guide.md");
        assert!(!repo.path().join(".gitignore").exists());
    }

    #[test]
    fn unmatched_path_succeeds_without_rewrite() {
        let repo = TestRepo::new();
        let before = repo.rev_parse("main");
        commands::purge(&repo.context(), &match_paths(&["nowhere.txt"]), false, false, true)
            .unwrap();
        assert_eq!(repo.rev_parse("main"), before);
    }
}
