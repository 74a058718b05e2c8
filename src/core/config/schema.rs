//! core::config::schema
//!
//! Configuration schema types.
//!
//! # Global Config
//!
//! Located at (in order of precedence):
//! 1. `$SCOUR_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/scour/config.toml`
//! 3. `~/.scour/config.toml`
//!
//! # Repo Config
//!
//! Located at `<common_dir>/scour/config.toml`. Repo values override
//! global values key by key.

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::purge::DirectoryPolicy;

/// Global configuration (user scope).
///
/// # Example
///
/// ```toml
/// [network]
/// timeout_secs = 60
/// fetch_retries = 3
/// backoff_ms = 250
///
/// [secrets]
/// provider = "file"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalConfig {
    /// Network limits for fetch and push
    pub network: Option<NetworkConfig>,

    /// Purge defaults
    pub purge: Option<PurgeConfig>,

    /// Secret storage settings
    pub secrets: Option<SecretsConfig>,
}

impl GlobalConfig {
    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(network) = &self.network {
            network.validate()?;
        }
        if let Some(purge) = &self.purge {
            purge.validate()?;
        }
        if let Some(secrets) = &self.secrets {
            secrets.validate()?;
        }
        Ok(())
    }
}

/// Repository configuration.
///
/// # Example
///
/// ```toml
/// default_target = "mirror"
///
/// [purge]
/// directory_policy = "files-only"
/// prune_empty = true
/// ignore_file = ".gitignore"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RepoConfig {
    /// Remote to deploy to when `--target` is omitted
    pub default_target: Option<String>,

    /// Network overrides for this repository
    pub network: Option<NetworkConfig>,

    /// Purge overrides for this repository
    pub purge: Option<PurgeConfig>,
}

impl RepoConfig {
    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(target) = &self.default_target {
            if target.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "default_target cannot be empty".to_string(),
                ));
            }
        }
        if let Some(network) = &self.network {
            network.validate()?;
        }
        if let Some(purge) = &self.purge {
            purge.validate()?;
        }
        Ok(())
    }
}

/// Network limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Per-remote timeout for a single fetch or push
    pub timeout_secs: Option<u64>,

    /// Retries for read-only probes (never applied to pushes)
    pub fetch_retries: Option<u32>,

    /// Initial backoff between probe retries, doubled per attempt
    pub backoff_ms: Option<u64>,
}

impl NetworkConfig {
    /// Upper bound on probe retries.
    pub const MAX_FETCH_RETRIES: u32 = 10;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue(
                "network.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(retries) = self.fetch_retries {
            if retries > Self::MAX_FETCH_RETRIES {
                return Err(ConfigError::InvalidValue(format!(
                    "network.fetch_retries must be at most {}",
                    Self::MAX_FETCH_RETRIES
                )));
            }
        }
        Ok(())
    }
}

/// Purge defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PurgeConfig {
    /// How exact paths and globs treat directories
    pub directory_policy: Option<DirectoryPolicy>,

    /// Drop revisions that become empty after the rewrite
    pub prune_empty: Option<bool>,

    /// Ignore file updated after a purge (relative to the work dir)
    pub ignore_file: Option<String>,
}

impl PurgeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(file) = &self.ignore_file {
            if file.is_empty() || file.starts_with('/') || file.split('/').any(|c| c == "..") {
                return Err(ConfigError::InvalidValue(format!(
                    "purge.ignore_file must be a relative path inside the work tree: '{}'",
                    file
                )));
            }
        }
        Ok(())
    }
}

/// Secrets configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SecretsConfig {
    /// Provider to use
    pub provider: Option<String>,
}

impl SecretsConfig {
    /// Valid secret providers.
    pub const VALID_PROVIDERS: &'static [&'static str] = &["file"];

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(provider) = &self.provider {
            if !Self::VALID_PROVIDERS.contains(&provider.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "invalid secrets provider '{}', must be one of: {}",
                    provider,
                    Self::VALID_PROVIDERS.join(", ")
                )));
            }
        }
        Ok(())
    }
}
