//! secrets::traits
//!
//! Secret storage trait definition.

use thiserror::Error;

/// Errors from secret storage operations.
///
/// Messages name keys and paths, never values.
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("failed to read secret: {0}")]
    ReadError(String),

    #[error("failed to write secret: {0}")]
    WriteError(String),

    #[error("secret provider not available: {0}")]
    ProviderNotAvailable(String),
}

/// Key-value storage for secrets.
///
/// Keys are namespaced strings like `mirror.token`. Implementations must
/// be thread-safe and must never log or print secret values.
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` if the key does not exist.
    fn get(&self, key: &str) -> Result<Option<String>, SecretError>;

    /// Overwrites any existing value.
    fn set(&self, key: &str, value: &str) -> Result<(), SecretError>;

    /// Idempotent: deleting a missing key succeeds.
    fn delete(&self, key: &str) -> Result<(), SecretError>;

    /// Stored key names, sorted. Never values.
    fn keys(&self) -> Result<Vec<String>, SecretError>;

    fn exists(&self, key: &str) -> Result<bool, SecretError> {
        Ok(self.get(key)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_names_key_only() {
        let err = SecretError::NotFound("mirror.token".into());
        assert_eq!(err.to_string(), "secret not found: mirror.token");
    }
}
