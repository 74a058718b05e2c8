//! core::ops::audit
//!
//! Append-only operation audit log.
//!
//! # Storage
//!
//! `<common_dir>/scour/audit.jsonl`, one JSON record per line, one record
//! per deployment plan run. Each append is fsync'd before returning.
//!
//! # Invariants
//!
//! - Records are only ever appended, never rewritten
//! - Records never contain secret material: remote URLs are stored with
//!   any userinfo stripped and credentials are never part of a record
//! - A run that failed still produces a record
//!
//! # Example
//!
//! ```ignore
//! use scour::core::ops::audit::{AuditLog, AuditRecord, Outcome};
//!
//! let mut record = AuditRecord::new("deploy");
//! record.step_succeeded("push", "pushed refs/heads/main to mirror");
//! record.finish(Outcome::Committed);
//! AuditLog::new(&paths).append(&record)?;
//! ```

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::paths::ScourPaths;
use crate::core::types::UtcTimestamp;

/// Errors from audit log operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// I/O error reading or writing the log.
    #[error("audit log i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("audit log json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Unique identifier for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpId(String);

impl OpId {
    /// Generate a new unique operation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OpId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Final outcome of a plan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every step succeeded.
    Committed,
    /// Refused by policy or conflict before mutation.
    Refused,
    /// A step failed and compensating actions were run.
    RolledBack,
    /// Remote state diverged from expectation; manual intervention required.
    Diverged,
    /// Run did not finish (record written on an unexpected early exit).
    Incomplete,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Committed => "committed",
            Outcome::Refused => "refused",
            Outcome::RolledBack => "rolled back",
            Outcome::Diverged => "diverged",
            Outcome::Incomplete => "incomplete",
        };
        f.write_str(s)
    }
}

/// Status of a single recorded step or rollback action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// One executed plan step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step kind (purge, ignore-update, retarget, push, verify).
    pub step: String,
    pub status: EntryStatus,
    /// Human-readable detail; never contains credentials.
    pub detail: String,
    pub at: UtcTimestamp,
}

/// One attempted rollback action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRecord {
    /// Step whose rollback ran.
    pub step: String,
    pub status: EntryStatus,
    pub detail: String,
    pub at: UtcTimestamp,
}

/// One audit log record, describing one plan run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub op_id: OpId,
    /// CLI command that started the run.
    pub command: String,
    pub started_at: UtcTimestamp,
    pub finished_at: Option<UtcTimestamp>,
    pub steps: Vec<StepRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rollbacks: Vec<RollbackRecord>,
    pub outcome: Outcome,
    /// Error that ended the run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Start a record for a new run.
    pub fn new(command: impl Into<String>) -> Self {
        Self::with_op_id(OpId::new(), command)
    }

    /// Start a record for a run that already has an id.
    pub fn with_op_id(op_id: OpId, command: impl Into<String>) -> Self {
        Self {
            op_id,
            command: command.into(),
            started_at: UtcTimestamp::now(),
            finished_at: None,
            steps: vec![],
            rollbacks: vec![],
            outcome: Outcome::Incomplete,
            error: None,
        }
    }

    pub fn step_succeeded(&mut self, step: impl Into<String>, detail: impl Into<String>) {
        self.push_step(step, EntryStatus::Succeeded, detail);
    }

    pub fn step_failed(&mut self, step: impl Into<String>, detail: impl Into<String>) {
        self.push_step(step, EntryStatus::Failed, detail);
    }

    fn push_step(&mut self, step: impl Into<String>, status: EntryStatus, detail: impl Into<String>) {
        self.steps.push(StepRecord {
            step: step.into(),
            status,
            detail: detail.into(),
            at: UtcTimestamp::now(),
        });
    }

    /// Record an attempted rollback action.
    pub fn rollback(&mut self, step: impl Into<String>, status: EntryStatus, detail: impl Into<String>) {
        self.rollbacks.push(RollbackRecord {
            step: step.into(),
            status,
            detail: detail.into(),
            at: UtcTimestamp::now(),
        });
    }

    /// Mark the run finished.
    pub fn finish(&mut self, outcome: Outcome) {
        self.outcome = outcome;
        self.finished_at = Some(UtcTimestamp::now());
    }

    /// Mark the run finished with the error that ended it.
    pub fn finish_with_error(&mut self, outcome: Outcome, error: impl std::fmt::Display) {
        self.error = Some(error.to_string());
        self.finish(outcome);
    }
}

/// Handle to a repository's audit log file.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Audit log for the repository described by `paths`.
    pub fn new(paths: &ScourPaths) -> Self {
        Self {
            path: paths.repo_audit_log_path(),
        }
    }

    /// Path to the log file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append a record and fsync.
    pub fn append(&self, record: &AuditRecord) -> Result<(), AuditError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.sync_all()?;

        tracing::debug!(op_id = %record.op_id, outcome = %record.outcome, "audit record appended");
        Ok(())
    }

    /// Read all records, oldest first.
    ///
    /// A torn final line (crash mid-append) is skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<AuditRecord>, AuditError> {
        if !self.path.exists() {
            return Ok(vec![]);
        }

        let file = fs::File::open(&self.path)?;
        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(error = %e, "skipping unreadable audit record"),
            }
        }
        Ok(records)
    }

    /// Most recent `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError> {
        let mut records = self.read_all()?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}
