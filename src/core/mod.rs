//! core
//!
//! Core domain types, storage routing, configuration and operation
//! bookkeeping.
//!
//! # Modules
//!
//! - [`types`] - Strong types: Oid, RefName, UtcTimestamp
//! - [`paths`] - Centralized path routing for scour storage
//! - [`config`] - Configuration schema and loading
//! - [`ops`] - Repository lock and audit log

pub mod config;
pub mod ops;
pub mod paths;
pub mod types;
