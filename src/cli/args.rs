//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! - `--cwd <path>`: Run as if in that directory
//! - `--debug`: Enable debug logging
//! - `--quiet` / `-q`: Minimal output

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::remotes::{AuthBinding, RemoteRole};

/// scour - purge files from git history and deploy to several remotes safely
#[derive(Parser, Debug)]
#[command(name = "scour")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Run as if scour was started in this directory
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// What to match in history.
#[derive(Args, Debug, Clone, Default)]
pub struct MatchArgs {
    /// Exact path, relative to the repository root (repeatable)
    #[arg(long = "path", value_name = "PATH")]
    pub paths: Vec<String>,

    /// Glob pattern (repeatable)
    #[arg(long = "glob", value_name = "GLOB")]
    pub globs: Vec<String>,

    /// Regex matched against file contents
    #[arg(long, value_name = "REGEX")]
    pub content: Option<String>,

    /// Match file paths only; a directory path does not match its contents
    #[arg(long)]
    pub files_only: bool,
}

impl MatchArgs {
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.globs.is_empty() && self.content.is_none()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Remove files from every revision of local history
    #[command(
        name = "purge",
        long_about = "Remove files from every revision of local history.\n\n\
            Every branch and tag is rewritten so that matching paths never \
            appeared. The working tree must be clean. Matching paths are added \
            to the ignore file afterwards, and the result is verified by scanning \
            all reachable history.",
        after_help = "\
EXAMPLES:
    # Remove a committed secret
    scour purge --path config/secret.env

    # Remove every .pem file and drop revisions left empty
    scour purge --glob '*.pem' --prune-empty

    # Keep only the docs directory
    scour purge --path docs --keep-only"
    )]
    Purge {
        #[command(flatten)]
        matcher: MatchArgs,

        /// Keep only matching paths instead of removing them
        #[arg(long)]
        keep_only: bool,

        /// Drop non-merge revisions whose tree no longer changes
        #[arg(long)]
        prune_empty: bool,

        /// Do not add matched paths to the ignore file
        #[arg(long)]
        no_ignore: bool,
    },

    /// Push to a deployment target, optionally purging first
    #[command(
        name = "deploy",
        long_about = "Push refs to a registered remote.\n\n\
            The remote's tips are listed first. A ref the remote has diverged \
            from is only overwritten with --force, which is also required when \
            --purge rewrites history before the push. Any failure before the \
            remote changes rolls back every local step.",
        after_help = "\
EXAMPLES:
    # Push the current branch to the mirror
    scour deploy --target mirror

    # Purge a file, then force the rewritten history to the mirror
    scour deploy --target mirror --purge config/secret.env --force

    # Move the mirror to a new URL and push main and a tag there
    scour deploy --target mirror --url https://git.example.com/app.git \\
        --ref main --ref refs/tags/v1.0

EXIT CODES:
    0  success
    1  refused; nothing changed
    2  failed; local changes were rolled back
    3  the remote may hold part of the push"
    )]
    Deploy {
        /// Remote to push to; defaults to `default_target` in config.toml
        #[arg(long)]
        target: Option<String>,

        /// Allow non-fast-forward updates on the target
        #[arg(long)]
        force: bool,

        /// Branch or full ref to push (repeatable); defaults to the current branch
        #[arg(long = "ref", value_name = "REF")]
        refs: Vec<String>,

        /// Point the target at this URL before pushing
        #[arg(long)]
        url: Option<String>,

        /// Purge this path from history before pushing (repeatable)
        #[arg(long = "purge", value_name = "PATH")]
        purge: Vec<String>,
    },

    /// Point a remote back at a URL
    #[command(name = "revert-origin")]
    RevertOrigin {
        /// URL to restore
        #[arg(long)]
        url: String,

        /// Remote to change; defaults to the primary remote
        #[arg(long)]
        remote: Option<String>,
    },

    /// Check that nothing in history matches (read-only)
    #[command(
        name = "verify",
        after_help = "\
Exits 0 when no reachable revision contains a match and 1 otherwise."
    )]
    Verify {
        #[command(flatten)]
        matcher: MatchArgs,
    },

    /// Manage registered remotes
    #[command(name = "remote")]
    Remote {
        #[command(subcommand)]
        action: RemoteAction,
    },

    /// Show recent operations
    #[command(name = "audit")]
    Audit {
        /// Number of records to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Generate shell completion scripts
    #[command(name = "completion")]
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Remote registry subcommands.
#[derive(Subcommand, Debug)]
pub enum RemoteAction {
    /// Register a remote
    #[command(
        after_help = "\
AUTH BINDINGS:
    none             no credential
    env:VAR          token read from $VAR at push time
    secret:KEY       token read from the secret store

EXAMPLES:
    scour remote add mirror https://git.example.com/app.git --auth env:MIRROR_TOKEN"
    )]
    Add {
        name: String,
        url: String,

        /// primary, secondary or deployment-target
        #[arg(long, default_value = "deployment-target")]
        role: RemoteRole,

        /// Where the push credential comes from
        #[arg(long, default_value = "none")]
        auth: AuthBinding,

        /// Take the primary role from its current holder
        #[arg(long)]
        takeover: bool,
    },

    /// List registered remotes
    List,

    /// Forget a remote
    Remove { name: String },
}

/// Shell types for completion.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn deploy_flags() {
        let cli = Cli::try_parse_from([
            "scour", "deploy", "--target", "mirror", "--force", "--ref", "main", "--ref", "dev",
            "--purge", "a.env",
        ])
        .unwrap();
        match cli.command {
            Command::Deploy {
                target,
                force,
                refs,
                purge,
                url,
            } => {
                assert_eq!(target.as_deref(), Some("mirror"));
                assert!(force);
                assert_eq!(refs, vec!["main", "dev"]);
                assert_eq!(purge, vec!["a.env"]);
                assert!(url.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn remote_add_parses_role_and_auth() {
        let cli = Cli::try_parse_from([
            "scour", "remote", "add", "mirror", "https://h/r.git", "--role", "secondary", "--auth",
            "env:TOKEN",
        ])
        .unwrap();
        match cli.command {
            Command::Remote {
                action: RemoteAction::Add { role, auth, .. },
            } => {
                assert_eq!(role, RemoteRole::Secondary);
                assert_eq!(auth, AuthBinding::Env { var: "TOKEN".into() });
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["scour", "audit", "--quiet", "--cwd", "/tmp"]).unwrap();
        assert!(cli.quiet);
        assert_eq!(cli.cwd, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn bad_auth_binding_rejected() {
        assert!(
            Cli::try_parse_from(["scour", "remote", "add", "m", "u", "--auth", "keychain"]).is_err()
        );
    }
}
