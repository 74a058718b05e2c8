//! purge command - Remove files from every revision of local history

use anyhow::Result;

use super::{build_spec, run_plan, verbosity, Session};
use crate::cli::args::MatchArgs;
use crate::engine::{Context, DeployError, DeploymentPlanBuilder};
use crate::purge::PurgeMode;
use crate::ui::output;

/// Purge, update the ignore file, then verify nothing matches.
///
/// The ignore update is skipped for keep-only purges, for `--no-ignore`,
/// and when the predicate has no ignore-file form (content patterns).
pub fn purge(
    ctx: &Context,
    matcher: &MatchArgs,
    keep_only: bool,
    prune_empty: bool,
    no_ignore: bool,
) -> Result<()> {
    let session = Session::open(ctx)?;
    let mode = if keep_only {
        PurgeMode::KeepOnly
    } else {
        PurgeMode::RemovePath
    };
    let spec = build_spec(&session.config, matcher, mode, prune_empty)?;
    drop(session);

    let mut builder = DeploymentPlanBuilder::new("purge").purge(spec.clone());
    let patterns = spec.ignore_patterns();
    if !keep_only && !no_ignore && !patterns.is_empty() {
        builder = builder.update_ignore(patterns);
    }
    let plan = builder
        .verify_absent(spec)
        .build()
        .map_err(DeployError::from)?;

    let report = run_plan(ctx, plan)?;
    let verbosity = verbosity(ctx);
    if let Some(rewrite) = &report.rewrite {
        output::print(rewrite.summary(), verbosity);
        if !rewrite.is_noop() {
            output::print(
                "local history rewritten; remotes still hold the old history until you deploy with --force",
                verbosity,
            );
        }
    }
    output::print(output::format_report(&report), verbosity);
    Ok(())
}
