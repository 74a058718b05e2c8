//! revert-origin command - Point a remote back at a URL

use anyhow::Result;

use super::{run_plan, verbosity, Session};
use crate::engine::{Context, DeployError, DeploymentPlanBuilder};
use crate::ui::output;

/// Retarget `remote` (default: the primary remote) and verify the change.
pub fn revert_origin(ctx: &Context, url: &str, remote: Option<&str>) -> Result<()> {
    let session = Session::open(ctx)?;
    let registry = session.registry().map_err(DeployError::from)?;
    let remote = match remote {
        Some(name) => name.to_string(),
        None => registry
            .primary()
            .map(|e| e.name.clone())
            .unwrap_or_else(|| "origin".to_string()),
    };
    drop(session);

    let plan = DeploymentPlanBuilder::new("revert-origin")
        .retarget(&remote, url)
        .verify_url(&remote, url)
        .build()
        .map_err(DeployError::from)?;

    let report = run_plan(ctx, plan)?;
    let verbosity = verbosity(ctx);
    for change in &report.retargets {
        output::print(
            format!("{}: {} -> {}", change.name, change.old_url, change.new_url),
            verbosity,
        );
    }
    Ok(())
}
