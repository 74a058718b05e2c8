//! remotes::credentials
//!
//! Push-time credential resolution.
//!
//! # Design
//!
//! An [`AuthBinding`] names where a token lives. The resolver reads it
//! only when a network call needs it and caches the result, keyed by
//! binding, until [`CredentialResolver::invalidate`] is called (token
//! rotation, or a push rejected for auth).
//!
//! Values never leave this module except as [`Credential`], whose `Debug`
//! and `Display` are redacted.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::registry::{AuthBinding, RegistryError};
use crate::git::Credential;
use crate::secrets::SecretStore;

type EnvSource = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves and caches credentials for auth bindings.
pub struct CredentialResolver {
    store: Option<Box<dyn SecretStore>>,
    env: EnvSource,
    cache: RwLock<HashMap<AuthBinding, Credential>>,
}

impl std::fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self
            .cache
            .read()
            .map(|c| c.len())
            .unwrap_or_else(|e| e.into_inner().len());
        f.debug_struct("CredentialResolver")
            .field("has_store", &self.store.is_some())
            .field("cached", &cached)
            .finish()
    }
}

impl CredentialResolver {
    /// Resolver reading the process environment and, if given, a secret store.
    pub fn new(store: Option<Box<dyn SecretStore>>) -> Self {
        Self {
            store,
            env: Box::new(|var| std::env::var(var).ok()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the environment lookup.
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Box::new(env);
        self
    }

    /// Credential for a binding. `AuthBinding::None` yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::CredentialUnavailable`] if the variable is unset or
    /// empty, the key is missing, or no secret store is configured.
    pub fn resolve(&self, binding: &AuthBinding) -> Result<Option<Credential>, RegistryError> {
        if binding.is_none() {
            return Ok(None);
        }

        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cred) = cache.get(binding) {
                return Ok(Some(cred.clone()));
            }
        }

        let token = self.lookup(binding)?;
        let cred = Credential::token(token);
        tracing::debug!(%binding, "credential resolved");

        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(binding.clone(), cred.clone());
        Ok(Some(cred))
    }

    fn lookup(&self, binding: &AuthBinding) -> Result<String, RegistryError> {
        let unavailable = || RegistryError::CredentialUnavailable {
            binding: binding.to_string(),
        };

        let value = match binding {
            AuthBinding::None => None,
            AuthBinding::Env { var } => (self.env)(var),
            AuthBinding::Secret { key } => {
                let store = self.store.as_ref().ok_or_else(unavailable)?;
                store.get(key).map_err(|e| {
                    tracing::warn!(%binding, error = %e, "secret store lookup failed");
                    unavailable()
                })?
            }
        };

        value.filter(|v| !v.trim().is_empty()).ok_or_else(unavailable)
    }

    /// Drop every cached credential.
    pub fn invalidate(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Drop the cached credential for one binding.
    pub fn invalidate_binding(&self, binding: &AuthBinding) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(binding);
    }
}
