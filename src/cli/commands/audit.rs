//! audit command - Show recent operations

use anyhow::{Context as _, Result};

use super::{verbosity, Session};
use crate::core::ops::audit::AuditLog;
use crate::engine::Context;
use crate::ui::output;

/// Print the newest `limit` audit records, oldest first.
pub fn audit(ctx: &Context, limit: usize) -> Result<()> {
    let session = Session::open(ctx)?;
    let log = AuditLog::new(&session.paths);
    let records = log
        .recent(limit)
        .with_context(|| format!("failed to read {}", log.path().display()))?;

    if records.is_empty() {
        output::print("no operations recorded", verbosity(ctx));
        return Ok(());
    }
    for record in &records {
        println!("{}", output::format_audit(record));
    }
    Ok(())
}
