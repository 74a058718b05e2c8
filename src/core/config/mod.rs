//! core::config
//!
//! Configuration schema and loading.
//!
//! # Precedence
//!
//! Values are resolved in this order (later overrides earlier):
//! 1. Default values
//! 2. Global config file
//! 3. Repo config file
//! 4. CLI flags (not handled here)
//!
//! # Global Config Locations
//!
//! Searched in order:
//! 1. `$SCOUR_CONFIG` if set
//! 2. `$XDG_CONFIG_HOME/scour/config.toml`
//! 3. `~/.scour/config.toml`
//!
//! # Repo Config Location
//!
//! `<common_dir>/scour/config.toml`
//!
//! # Example
//!
//! ```no_run
//! use scour::core::config::Config;
//! use scour::core::paths::ScourPaths;
//! use std::path::PathBuf;
//!
//! let paths = ScourPaths::new(PathBuf::from("/repo/.git"), PathBuf::from("/repo/.git"));
//! let config = Config::load(Some(&paths)).unwrap();
//! println!("timeout: {:?}", config.network_timeout());
//! ```

pub mod schema;

pub use schema::{GlobalConfig, NetworkConfig, PurgeConfig, RepoConfig, SecretsConfig};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::core::paths::ScourPaths;
use crate::purge::DirectoryPolicy;

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Merged configuration from all sources.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub global: GlobalConfig,
    pub repo: Option<RepoConfig>,
}

impl Config {
    const DEFAULT_TIMEOUT_SECS: u64 = 120;
    const DEFAULT_FETCH_RETRIES: u32 = 3;
    const DEFAULT_BACKOFF_MS: u64 = 250;
    const DEFAULT_IGNORE_FILE: &'static str = ".gitignore";

    /// Load configuration from default locations.
    ///
    /// Missing files are not an error; defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed or
    /// fails validation.
    pub fn load(paths: Option<&ScourPaths>) -> Result<Self, ConfigError> {
        let global = match Self::global_config_path() {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading global config");
                read_toml::<GlobalConfig>(&path)?
            }
            None => GlobalConfig::default(),
        };

        let repo = match paths.map(|p| p.repo_config_path()) {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "loading repo config");
                Some(read_toml::<RepoConfig>(&path)?)
            }
            _ => None,
        };

        global.validate()?;
        if let Some(r) = &repo {
            r.validate()?;
        }

        Ok(Config { global, repo })
    }

    /// First existing global config file, if any.
    fn global_config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SCOUR_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        if let Ok(xdg_home) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_home).join("scour/config.toml");
            if path.exists() {
                return Some(path);
            }
        }

        dirs::home_dir()
            .map(|home| home.join(".scour/config.toml"))
            .filter(|path| path.exists())
    }

    fn repo_network(&self) -> Option<&NetworkConfig> {
        self.repo.as_ref().and_then(|r| r.network.as_ref())
    }

    fn repo_purge(&self) -> Option<&PurgeConfig> {
        self.repo.as_ref().and_then(|r| r.purge.as_ref())
    }

    /// Per-remote network timeout. Defaults to 120 seconds.
    pub fn network_timeout(&self) -> Duration {
        let secs = self
            .repo_network()
            .and_then(|n| n.timeout_secs)
            .or_else(|| self.global.network.as_ref().and_then(|n| n.timeout_secs))
            .unwrap_or(Self::DEFAULT_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    /// Retries for read-only probes. Defaults to 3.
    pub fn fetch_retries(&self) -> u32 {
        self.repo_network()
            .and_then(|n| n.fetch_retries)
            .or_else(|| self.global.network.as_ref().and_then(|n| n.fetch_retries))
            .unwrap_or(Self::DEFAULT_FETCH_RETRIES)
    }

    /// Initial probe backoff. Defaults to 250ms.
    pub fn backoff(&self) -> Duration {
        let ms = self
            .repo_network()
            .and_then(|n| n.backoff_ms)
            .or_else(|| self.global.network.as_ref().and_then(|n| n.backoff_ms))
            .unwrap_or(Self::DEFAULT_BACKOFF_MS);
        Duration::from_millis(ms)
    }

    /// Directory matching policy. Defaults to [`DirectoryPolicy::Prefix`].
    pub fn directory_policy(&self) -> DirectoryPolicy {
        self.repo_purge()
            .and_then(|p| p.directory_policy)
            .or_else(|| self.global.purge.as_ref().and_then(|p| p.directory_policy))
            .unwrap_or_default()
    }

    /// Whether purge drops revisions that become empty. Defaults to false.
    pub fn prune_empty(&self) -> bool {
        self.repo_purge()
            .and_then(|p| p.prune_empty)
            .or_else(|| self.global.purge.as_ref().and_then(|p| p.prune_empty))
            .unwrap_or(false)
    }

    /// Ignore file to update after a purge. Defaults to `.gitignore`.
    pub fn ignore_file(&self) -> &str {
        self.repo_purge()
            .and_then(|p| p.ignore_file.as_deref())
            .or_else(|| {
                self.global
                    .purge
                    .as_ref()
                    .and_then(|p| p.ignore_file.as_deref())
            })
            .unwrap_or(Self::DEFAULT_IGNORE_FILE)
    }

    /// Remote used by `deploy` when no `--target` is given.
    pub fn default_target(&self) -> Option<&str> {
        self.repo.as_ref().and_then(|r| r.default_target.as_deref())
    }

    /// Secret store provider. Defaults to "file".
    pub fn secrets_provider(&self) -> &str {
        self.global
            .secrets
            .as_ref()
            .and_then(|s| s.provider.as_deref())
            .unwrap_or(crate::secrets::DEFAULT_PROVIDER)
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_without_files() {
        let config = Config::default();
        assert_eq!(config.network_timeout(), Duration::from_secs(120));
        assert_eq!(config.fetch_retries(), 3);
        assert_eq!(config.backoff(), Duration::from_millis(250));
        assert_eq!(config.directory_policy(), DirectoryPolicy::Prefix);
        assert!(!config.prune_empty());
        assert_eq!(config.ignore_file(), ".gitignore");
        assert_eq!(config.secrets_provider(), "file");
        assert!(config.default_target().is_none());
    }

    #[test]
    fn repo_overrides_global() {
        let config = Config {
            global: GlobalConfig {
                network: Some(NetworkConfig {
                    timeout_secs: Some(10),
                    fetch_retries: Some(1),
                    backoff_ms: None,
                }),
                ..Default::default()
            },
            repo: Some(RepoConfig {
                network: Some(NetworkConfig {
                    timeout_secs: Some(5),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        };
        assert_eq!(config.network_timeout(), Duration::from_secs(5));
        // Falls through to global where the repo is silent
        assert_eq!(config.fetch_retries(), 1);
    }

    #[test]
    fn loads_repo_file() {
        let dir = TempDir::new().unwrap();
        let paths = ScourPaths::new(dir.path().to_path_buf(), dir.path().to_path_buf());
        fs::create_dir_all(paths.repo_scour_dir()).unwrap();
        fs::write(
            paths.repo_config_path(),
            "default_target = \"mirror\"\n[purge]\nprune_empty = true\n",
        )
        .unwrap();

        let config = Config::load(Some(&paths)).unwrap();
        assert_eq!(config.default_target(), Some("mirror"));
        assert!(config.prune_empty());
    }

    #[test]
    fn invalid_repo_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let paths = ScourPaths::new(dir.path().to_path_buf(), dir.path().to_path_buf());
        fs::create_dir_all(paths.repo_scour_dir()).unwrap();
        fs::write(paths.repo_config_path(), "default_target = [").unwrap();

        assert!(matches!(
            Config::load(Some(&paths)),
            Err(ConfigError::ParseError { .. })
        ));
    }
}
