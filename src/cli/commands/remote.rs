//! remote command - Manage registered remotes

use anyhow::Result;

use super::{verbosity, Session};
use crate::core::ops::lock::RepoLock;
use crate::engine::{Context, DeployError};
use crate::remotes::{AuthBinding, RemoteRole};
use crate::ui::output;

/// Register a remote. Holds the repository lock while the registry is
/// rewritten.
pub fn remote_add(
    ctx: &Context,
    name: &str,
    url: &str,
    role: RemoteRole,
    auth: AuthBinding,
    takeover: bool,
) -> Result<()> {
    let session = Session::open(ctx)?;
    let _lock = RepoLock::acquire(&session.paths).map_err(DeployError::from)?;

    let mut registry = session.registry()?;
    registry.register(name, url, auth, role, takeover)?;
    registry.save(&session.paths)?;

    output::print(format!("registered {} ({}) at {}", name, role, url), verbosity(ctx));
    Ok(())
}

pub fn remote_list(ctx: &Context) -> Result<()> {
    let session = Session::open(ctx)?;
    let registry = session.registry()?;

    let rows: Vec<String> = registry
        .endpoints()
        .map(|e| {
            format!(
                "{:<16} {:<18} {:<20} {}",
                e.name,
                e.role.to_string(),
                e.auth.to_string(),
                e.url
            )
        })
        .collect();
    if rows.is_empty() {
        output::print("no remotes registered", verbosity(ctx));
    } else {
        println!("{}", rows.join("\n"));
    }
    Ok(())
}

/// Forget a remote. Git's own remote config is left alone, so a remote
/// still present there is adopted again on the next load.
pub fn remote_remove(ctx: &Context, name: &str) -> Result<()> {
    let session = Session::open(ctx)?;
    let _lock = RepoLock::acquire(&session.paths).map_err(DeployError::from)?;

    let mut registry = session.registry()?;
    let removed = registry.remove(name)?;
    registry.save(&session.paths)?;

    output::print(format!("removed {} ({})", removed.name, removed.url), verbosity(ctx));
    Ok(())
}
