//! scour - purge files from git history and deploy to several remotes safely
//!
//! scour rewrites local history so that matched paths never appeared, then
//! pushes the result to registered remotes as one all-or-nothing operation.
//! Every step records how to undo itself; a failure before a remote changes
//! rolls the repository back to where it started.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface (parses args, builds plans)
//! - [`engine`] - Plan, run, verify and roll back deployments
//! - [`purge`] - Path matching and the history rewrite
//! - [`remotes`] - Remote registry and credential resolution
//! - [`core`] - Domain types, paths, config, lock and audit log
//! - [`git`] - Single interface for all Git operations
//! - [`secrets`] - Secret storage for push tokens
//! - [`ui`] - Output formatting
//!
//! # Guarantees
//!
//! 1. One operation per repository at a time
//! 2. History is never rewritten under a dirty working tree
//! 3. A non-fast-forward push needs explicit consent
//! 4. A push that may have landed partly is reported, never rolled back

pub mod cli;
pub mod core;
pub mod engine;
pub mod git;
pub mod purge;
pub mod remotes;
pub mod secrets;
pub mod ui;
