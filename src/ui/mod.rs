//! ui
//!
//! User-facing output. All command output goes through [`output`] so that
//! `--quiet` and failure reports behave the same everywhere.

pub mod output;
