//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`Oid`] - Object identifier (SHA-1 or SHA-256 hex)
//! - [`RefName`] - Validated Git reference name
//! - [`UtcTimestamp`] - RFC3339 timestamp
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented.
//!
//! # Examples
//!
//! ```
//! use scour::core::types::{Oid, RefName};
//!
//! let oid = Oid::new("abc123def4567890abc123def4567890abc12345").unwrap();
//! let refname = RefName::for_branch("main").unwrap();
//! assert_eq!(refname.as_str(), "refs/heads/main");
//!
//! assert!(RefName::new("refs/heads/bad..name").is_err());
//! assert!(Oid::new("not-a-sha").is_err());
//! # let _ = oid;
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid object id: {0}")]
    InvalidOid(String),

    #[error("invalid ref name: {0}")]
    InvalidRefName(String),
}

/// An object identifier.
///
/// 40 hex characters for SHA-1 repositories, 64 for SHA-256 (and for the
/// in-memory engine, which hashes with SHA-256). Normalized to lowercase.
///
/// # Example
///
/// ```
/// use scour::core::types::Oid;
///
/// let oid = Oid::new("ABC123DEF4567890ABC123DEF4567890ABC12345").unwrap();
/// assert_eq!(oid.as_str(), "abc123def4567890abc123def4567890abc12345");
/// assert_eq!(oid.short(7), "abc123d");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Oid(String);

impl Oid {
    /// Create a new validated object id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidOid` if the string is not a 40 or 64
    /// character hex string.
    pub fn new(oid: impl Into<String>) -> Result<Self, TypeError> {
        let oid = oid.into().to_ascii_lowercase();
        if oid.len() != 40 && oid.len() != 64 {
            return Err(TypeError::InvalidOid(format!(
                "expected 40 or 64 hex characters, got {}",
                oid.len()
            )));
        }
        if !oid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TypeError::InvalidOid(
                "object id must be hexadecimal".into(),
            ));
        }
        Ok(Self(oid))
    }

    /// Build an id from raw digest bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypeError> {
        Self::new(hex::encode(bytes))
    }

    /// Get an abbreviated form of the id.
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(self.0.len())]
    }

    /// Get the object id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Oid {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Oid> for String {
    fn from(oid: Oid) -> Self {
        oid.0
    }
}

impl AsRef<str> for Oid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated Git reference name (`refs/...`).
///
/// # Example
///
/// ```
/// use scour::core::types::RefName;
///
/// let refname = RefName::new("refs/tags/v1.0").unwrap();
/// assert!(refname.is_tag_ref());
/// assert_eq!(refname.strip_prefix("refs/tags/"), Some("v1.0"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefName(String);

impl RefName {
    /// Create a new validated ref name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidRefName` if the name violates Git's
    /// refname rules or is outside `refs/`.
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Ref name for a local branch (`refs/heads/<branch>`).
    ///
    /// Accepts either a short branch name or an already qualified
    /// `refs/heads/...` name.
    pub fn for_branch(branch: &str) -> Result<Self, TypeError> {
        if branch.starts_with("refs/") {
            return Self::new(branch);
        }
        Self::new(format!("refs/heads/{}", branch))
    }

    /// Strip a prefix from the ref name and return the remainder.
    pub fn strip_prefix(&self, prefix: &str) -> Option<&str> {
        self.0.strip_prefix(prefix)
    }

    /// Check if this ref is a branch ref.
    pub fn is_branch_ref(&self) -> bool {
        self.0.starts_with("refs/heads/")
    }

    /// Check if this ref is a tag ref.
    pub fn is_tag_ref(&self) -> bool {
        self.0.starts_with("refs/tags/")
    }

    fn validate(name: &str) -> Result<(), TypeError> {
        let fail = |msg: &str| Err(TypeError::InvalidRefName(format!("{}: {}", msg, name)));

        if !name.starts_with("refs/") {
            return fail("ref name must start with 'refs/'");
        }
        if name.ends_with('/') || name.ends_with(".lock") {
            return fail("ref name cannot end with '/' or '.lock'");
        }
        if name.contains("..") || name.contains("@{") || name.contains("//") {
            return fail("ref name cannot contain '..', '@{' or '//'");
        }
        const INVALID_CHARS: [char; 8] = [' ', '~', '^', ':', '\\', '?', '*', '['];
        if name
            .chars()
            .any(|c| INVALID_CHARS.contains(&c) || c.is_ascii_control())
        {
            return fail("ref name contains a forbidden character");
        }
        if name
            .split('/')
            .any(|component| component.starts_with('.') || component.is_empty())
        {
            return fail("ref name has an empty or hidden component");
        }
        Ok(())
    }

    /// Get the ref name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RefName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RefName> for String {
    fn from(name: RefName) -> Self {
        name.0
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RefName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A UTC timestamp, serialized as RFC3339.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtcTimestamp(chrono::DateTime<chrono::Utc>);

impl UtcTimestamp {
    /// The current time.
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }
}

impl std::fmt::Display for UtcTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
