//! deploy command - Push to a deployment target, optionally purging first

use anyhow::Result;

use super::{build_spec, run_plan, verbosity, Session};
use crate::cli::args::MatchArgs;
use crate::cli::Refused;
use crate::core::types::RefName;
use crate::engine::{Context, DeployError, DeploymentPlanBuilder};
use crate::purge::PurgeMode;
use crate::ui::output;

/// Build and run a deploy plan.
///
/// Steps, in order: purge and ignore update (with `--purge`), retarget
/// (with `--url`), push, then verification of everything that changed.
pub fn deploy(
    ctx: &Context,
    target: Option<&str>,
    force: bool,
    refs: &[String],
    url: Option<&str>,
    purge_paths: &[String],
) -> Result<()> {
    let session = Session::open(ctx)?;
    let target = match target.or(session.config.default_target()) {
        Some(t) => t.to_string(),
        None => {
            return Err(Refused(
                "no deployment target; pass --target or set default_target in config.toml".into(),
            )
            .into())
        }
    };
    session
        .registry()
        .map_err(DeployError::from)?
        .resolve(&target)
        .map_err(DeployError::from)?;

    let refs = refs
        .iter()
        .map(|r| parse_ref(r))
        .collect::<Result<Vec<_>, _>>()?;

    let spec = if purge_paths.is_empty() {
        None
    } else {
        let args = MatchArgs {
            paths: purge_paths.to_vec(),
            ..Default::default()
        };
        Some(build_spec(
            &session.config,
            &args,
            PurgeMode::RemovePath,
            false,
        )?)
    };
    drop(session);

    let mut builder = DeploymentPlanBuilder::new("deploy");
    if let Some(spec) = &spec {
        builder = builder
            .purge(spec.clone())
            .update_ignore(spec.ignore_patterns());
    }
    if let Some(url) = url {
        builder = builder.retarget(&target, url);
    }
    builder = builder.push(&target, refs.clone());
    if let Some(spec) = spec {
        builder = builder.verify_absent(spec);
    }
    builder = builder.verify_remote(&target, refs);
    if let Some(url) = url {
        builder = builder.verify_url(&target, url);
    }
    let plan = builder
        .allow_history_rewrite(force)
        .build()
        .map_err(DeployError::from)?;

    let report = run_plan(ctx, plan)?;
    let verbosity = verbosity(ctx);
    for push in &report.pushes {
        let old = push
            .old
            .as_ref()
            .map(|o| o.short(7).to_string())
            .unwrap_or_else(|| "(new)".to_string());
        output::print(
            format!(
                "{} {}: {} -> {}{}",
                push.remote,
                push.refname,
                old,
                push.new.short(7),
                if push.forced { " (forced)" } else { "" }
            ),
            verbosity,
        );
    }
    output::print(output::format_report(&report), verbosity);
    Ok(())
}

/// `main` means `refs/heads/main`; anything starting with `refs/` is taken
/// as written.
fn parse_ref(raw: &str) -> Result<RefName, Refused> {
    let parsed = if raw.starts_with("refs/") {
        RefName::new(raw)
    } else {
        RefName::for_branch(raw)
    };
    parsed.map_err(|e| Refused(format!("invalid ref '{}': {}", raw, e)))
}
