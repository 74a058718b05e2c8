//! remotes
//!
//! Named remote endpoints and the credentials that go with them.
//!
//! # Modules
//!
//! - [`registry`] - endpoints, roles, persistence in `remotes.toml`
//! - [`credentials`] - lazy token resolution with an invalidatable cache
//!
//! # Invariants
//!
//! - At most one endpoint holds [`RemoteRole::Primary`]
//! - Endpoints carry an [`AuthBinding`], a reference to a credential;
//!   tokens are never stored in the registry or embedded in URLs

pub mod credentials;
pub mod registry;

pub use credentials::CredentialResolver;
pub use registry::{
    AuthBinding, ChangeRecord, RegistryError, RemoteEndpoint, RemoteRegistry, RemoteRole,
};
