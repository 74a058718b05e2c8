//! cli
//!
//! Command-line interface layer for scour.
//!
//! The CLI parses arguments, builds a [`DeploymentPlan`](crate::engine::DeploymentPlan)
//! and hands it to the engine. It never changes the repository itself.
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | success |
//! | 1 | refused; nothing changed |
//! | 2 | fatal; local changes were rolled back |
//! | 3 | a remote may hold part of a push |

pub mod args;
pub mod commands;

pub use args::{Cli, Shell};

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::engine::{self, DeployError, ErrorClass};
use crate::purge::PurgeError;
use crate::remotes::RegistryError;
use crate::ui::output;

/// A command declined to act and changed nothing.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct Refused(pub String);

/// Run the CLI application and return the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse_args();
    init_logging(cli.debug);

    let ctx = engine::Context {
        cwd: cli.cwd.clone(),
        debug: cli.debug,
        quiet: cli.quiet,
    };

    match commands::dispatch(cli.command, &ctx) {
        Ok(()) => 0,
        Err(err) => {
            report(&err);
            exit_code(&err)
        }
    }
}

/// Logs go to stderr. `RUST_LOG` overrides the default filter.
fn init_logging(debug: bool) {
    let default = if debug { "scour=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}

fn report(err: &anyhow::Error) {
    match find::<DeployError>(err) {
        Some(deploy) => eprintln!("{}", output::format_failure(deploy)),
        None => output::error(format!("{:#}", err)),
    }
}

/// Map an error chain onto the exit code table.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = find::<DeployError>(err) {
        return e.exit_code();
    }
    if find::<Refused>(err).is_some() {
        return ErrorClass::Policy.exit_code();
    }
    if let Some(e) = find::<RegistryError>(err) {
        return engine::registry_error_class(e).exit_code();
    }
    if let Some(PurgeError::InvalidPredicate { .. }) = find::<PurgeError>(err) {
        return ErrorClass::Policy.exit_code();
    }
    ErrorClass::Fatal.exit_code()
}

fn find<E: std::error::Error + Send + Sync + 'static>(err: &anyhow::Error) -> Option<&E> {
    err.chain().find_map(|cause| cause.downcast_ref::<E>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context as _;

    #[test]
    fn exit_codes_follow_error_class() {
        let err = anyhow::Error::new(DeployError::OperationInProgress);
        assert_eq!(exit_code(&err), 1);

        let err = anyhow::Error::new(Refused("no target".into()));
        assert_eq!(exit_code(&err), 1);

        let err = anyhow::Error::new(RegistryError::UnknownRemote {
            name: "mirror".into(),
        });
        assert_eq!(exit_code(&err), 1);

        let err = anyhow::anyhow!("cannot open repository");
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn context_does_not_hide_class() {
        let err: anyhow::Result<()> = Err(DeployError::PartialPushDivergence {
            remote: "mirror".into(),
            detail: "timeout".into(),
        })
        .context("deploy failed");
        assert_eq!(exit_code(&err.unwrap_err()), 3);
    }
}
