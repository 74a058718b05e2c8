//! core::ops
//!
//! Operation locking and auditing.
//!
//! # Modules
//!
//! - [`lock`] - Exclusive repository lock
//! - [`audit`] - Append-only audit log of plan runs
//!
//! # Architecture
//!
//! Every plan run:
//! 1. Acquires the exclusive repo lock
//! 2. Runs its steps, recording each one
//! 3. Appends exactly one audit record, whatever the outcome
//! 4. Releases the lock on drop

pub mod audit;
pub mod lock;

pub use audit::{AuditError, AuditLog, AuditRecord, EntryStatus, OpId, Outcome};
pub use lock::{LockError, RepoLock};
