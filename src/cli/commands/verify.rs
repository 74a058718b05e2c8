//! verify command - Check that nothing in history matches

use anyhow::Result;

use super::{build_spec, verbosity, Session};
use crate::cli::args::MatchArgs;
use crate::cli::Refused;
use crate::engine::{Context, DeployError, RetryPolicy, VerificationProbe};
use crate::git::CancelFlag;
use crate::purge::PurgeMode;
use crate::ui::output;

/// Scan all reachable history. Read-only; takes no lock.
pub fn verify(ctx: &Context, matcher: &MatchArgs) -> Result<()> {
    let session = Session::open(ctx)?;
    let spec = build_spec(&session.config, matcher, PurgeMode::RemovePath, false)?;
    let compiled = spec.matcher().map_err(DeployError::from)?;

    let probe = VerificationProbe::new(
        RetryPolicy::from_config(&session.config),
        session.config.network_timeout(),
        CancelFlag::new(),
    );

    match probe
        .find_present(&compiled, &session.git)
        .map_err(DeployError::from)?
    {
        Some(found) => Err(Refused(format!(
            "{} is still in history: {} in revision {}",
            spec.predicate,
            found.path,
            found.revision.short(12)
        ))
        .into()),
        None => {
            output::print(
                format!("{} is absent from all reachable history", spec.predicate),
                verbosity(ctx),
            );
            Ok(())
        }
    }
}
