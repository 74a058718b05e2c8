//! ui::output
//!
//! Output formatting and display.
//!
//! Results go to stdout and respect `--quiet`. Warnings and errors go to
//! stderr; errors and failure reports are printed even when quiet.

use std::fmt::Display;

use crate::core::ops::audit::AuditRecord;
use crate::engine::{DeployError, DeployReport, RollbackStatus};

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Debug,
}

impl Verbosity {
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        }
    }
}

/// Print a message (respects quiet mode).
pub fn print(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        println!("{}", message);
    }
}

/// Print an error message (always shown).
pub fn error(message: impl Display) {
    eprintln!("error: {}", message);
}

/// Print a warning message (respects quiet mode).
pub fn warn(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        eprintln!("warning: {}", message);
    }
}

/// Lines describing a successful run.
pub fn format_report(report: &DeployReport) -> String {
    let mut lines: Vec<String> = report
        .steps
        .iter()
        .map(|s| format!("  {}: {}", s.step, s.detail))
        .collect();
    lines.push(format!("operation {} committed", report.op_id));
    lines.join("\n")
}

/// Lines describing a failed run: the error, the failed step and every
/// rollback action with its outcome.
pub fn format_failure(err: &DeployError) -> String {
    let mut lines = vec![format!("error: {}", err.root())];

    match err {
        DeployError::Aborted { step, rollback, .. } => {
            lines.push(format!("failed step: {}", step));
            if rollback.entries.is_empty() {
                lines.push("rollback: none attempted".to_string());
            } else {
                lines.push(format!("rollback: {}", rollback.summary()));
                for entry in &rollback.entries {
                    let marker = match entry.status {
                        RollbackStatus::Succeeded => "ok",
                        RollbackStatus::Skipped => "--",
                        RollbackStatus::Failed(_) => "!!",
                    };
                    lines.push(format!("  [{}] {}: {}", marker, entry.step, entry.status));
                }
            }
        }
        _ => {
            lines.push("failed step: none (refused before any step ran)".to_string());
            lines.push("rollback: none needed".to_string());
        }
    }

    if matches!(err.root(), DeployError::PartialPushDivergence { .. }) {
        lines.push(
            "the remote may hold part of the push; compare it with the local refs before retrying"
                .to_string(),
        );
    }
    lines.join("\n")
}

/// One line per audit record.
pub fn format_audit(record: &AuditRecord) -> String {
    let mut line = format!(
        "{}  {}  {:<12} {}",
        record.started_at,
        short_op_id(record.op_id.as_str()),
        record.outcome.to_string(),
        record.command
    );
    if let Some(error) = &record.error {
        line.push_str(&format!("\n    {}", error));
    }
    for rollback in &record.rollbacks {
        line.push_str(&format!("\n    rollback {}: {}", rollback.step, rollback.detail));
    }
    line
}

fn short_op_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
