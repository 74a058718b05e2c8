//! secrets
//!
//! Secret storage for tokens referenced by remote auth bindings.
//!
//! The remote registry never stores a token. An endpoint bound with
//! `auth = { kind = "secret", key = "mirror.token" }` names a key here, and the value is
//! read at push time by the credential resolver.
//!
//! # Security
//!
//! - Secrets are never logged or included in error messages
//! - The file store uses 0600 permissions on Unix
//! - All writes are atomic (temp file + rename)
//!
//! # Example
//!
//! ```ignore
//! use scour::secrets::create_store;
//!
//! let store = create_store("file")?;
//! if let Some(token) = store.get("mirror.token")? {
//!     // hand to the transport, never print
//! }
//! ```

mod file_store;
mod traits;

pub use file_store::FileSecretStore;
pub use traits::{SecretError, SecretStore};

/// The default secret store provider name.
pub const DEFAULT_PROVIDER: &str = "file";

/// Create a secret store for a configured provider name.
///
/// # Errors
///
/// - Unknown provider name
/// - Home directory cannot be determined
pub fn create_store(provider: &str) -> Result<Box<dyn SecretStore>, SecretError> {
    match provider {
        "file" => Ok(Box::new(FileSecretStore::new()?)),
        other => Err(SecretError::ProviderNotAvailable(format!(
            "unknown secret provider: '{}' (valid: file)",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_rejected() {
        match create_store("keychain") {
            Err(SecretError::ProviderNotAvailable(msg)) => assert!(msg.contains("keychain")),
            Err(e) => panic!("unexpected error type: {:?}", e),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn default_provider_is_creatable() {
        assert!(create_store(DEFAULT_PROVIDER).is_ok());
    }
}
