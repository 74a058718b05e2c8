//! git
//!
//! Single interface for all version-control operations.
//!
//! # Architecture
//!
//! This module is the **only doorway** to the repository. Purge, registry,
//! orchestrator and probe code all talk to a `&dyn RepositoryHandle`; no
//! other module imports `git2`.
//!
//! - [`Git`] - libgit2-backed handle for real repositories
//! - [`memory::MemoryRepository`] - deterministic in-memory handle with
//!   fault injection, used by tests
//!
//! # Invariants
//!
//! - All ref updates use CAS (compare-and-swap) semantics
//! - `fetch` only lists remote refs; it never writes local refs
//! - Credentials reach the transport through callbacks, never through URLs
//!
//! # Example
//!
//! ```ignore
//! use scour::git::{Git, RepositoryHandle};
//! use std::path::Path;
//!
//! let git = Git::open(Path::new("."))?;
//! let refs = git.list_refs()?;
//! ```

mod error;
mod handle;
mod interface;
pub mod memory;

pub use error::GitError;
pub use handle::{
    BudgetClock, CancelFlag, Credential, NetworkBudget, PushOutcome, RefEntry, RefPushStatus,
    RepositoryHandle, Revision, RevisionMeta, Signature, TreeEntry, WorktreeStatus,
};
pub use interface::Git;
