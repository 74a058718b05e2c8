//! secrets::file_store
//!
//! File-based secret storage at `~/.scour/secrets.toml`.
//!
//! The file is a flat TOML table of `key = "value"` pairs. It is created
//! with 0600 permissions and replaced atomically on every write. A file
//! whose permissions have been loosened is still read, with a warning.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use super::traits::{SecretError, SecretStore};

/// File-based secret storage.
#[derive(Debug)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    /// Store at the default location, `~/.scour/secrets.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, SecretError> {
        let home = dirs::home_dir()
            .ok_or_else(|| SecretError::ReadError("cannot determine home directory".into()))?;
        Ok(Self {
            path: home.join(".scour").join("secrets.toml"),
        })
    }

    /// Store at a custom path.
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_secrets(&self) -> Result<BTreeMap<String, String>, SecretError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }

        if !self.verify_permissions()? {
            tracing::warn!(
                path = %self.path.display(),
                "secrets file is readable by other users; expected mode 0600"
            );
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| SecretError::ReadError(format!("cannot read secrets file: {}", e)))?;

        // The toml error would echo the offending line, which may hold a value
        toml::from_str(&content).map_err(|_| {
            SecretError::ReadError(format!(
                "cannot parse secrets file {}",
                self.path.display()
            ))
        })
    }

    fn write_secrets(&self, secrets: &BTreeMap<String, String>) -> Result<(), SecretError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SecretError::WriteError(format!("cannot create directory: {}", e)))?;
        }

        let content = toml::to_string_pretty(secrets)
            .map_err(|e| SecretError::WriteError(format!("cannot serialize secrets: {}", e)))?;

        let temp_path = self.path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| SecretError::WriteError(format!("cannot create temp file: {}", e)))?;

            // Restrict before any secret byte lands on disk
            #[cfg(unix)]
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|e| SecretError::WriteError(format!("cannot set permissions: {}", e)))?;

            file.write_all(content.as_bytes())
                .map_err(|e| SecretError::WriteError(format!("cannot write secrets: {}", e)))?;
            file.sync_all()
                .map_err(|e| SecretError::WriteError(format!("cannot sync to disk: {}", e)))?;
        }

        fs::rename(&temp_path, &self.path)
            .map_err(|e| SecretError::WriteError(format!("cannot rename temp file: {}", e)))
    }

    /// True if the file is missing or has mode 0600.
    #[cfg(unix)]
    pub fn verify_permissions(&self) -> Result<bool, SecretError> {
        if !self.path.exists() {
            return Ok(true);
        }
        let metadata = fs::metadata(&self.path)
            .map_err(|e| SecretError::ReadError(format!("cannot read file metadata: {}", e)))?;
        Ok(metadata.permissions().mode() & 0o777 == 0o600)
    }

    #[cfg(not(unix))]
    pub fn verify_permissions(&self) -> Result<bool, SecretError> {
        Ok(true)
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, SecretError> {
        Ok(self.read_secrets()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SecretError> {
        let mut secrets = self.read_secrets()?;
        secrets.insert(key.to_string(), value.to_string());
        self.write_secrets(&secrets)
    }

    fn delete(&self, key: &str) -> Result<(), SecretError> {
        let mut secrets = self.read_secrets()?;
        if secrets.remove(key).is_some() {
            self.write_secrets(&secrets)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, SecretError> {
        Ok(self.read_secrets()?.into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, FileSecretStore) {
        let temp = TempDir::new().expect("create temp dir");
        let store = FileSecretStore::with_path(temp.path().join("nested").join("secrets.toml"));
        (temp, store)
    }

    #[test]
    fn missing_file_reads_empty() {
        let (_temp, store) = create_test_store();
        assert!(store.get("mirror.token").expect("get").is_none());
        assert!(store.keys().expect("keys").is_empty());
    }

    #[test]
    fn set_get_delete() {
        let (_temp, store) = create_test_store();

        store.set("mirror.token", "ghp_one").expect("set");
        store.set("mirror.token", "ghp_two").expect("overwrite");
        assert_eq!(
            store.get("mirror.token").expect("get").as_deref(),
            Some("ghp_two")
        );

        store.delete("mirror.token").expect("delete");
        store.delete("mirror.token").expect("delete again");
        assert!(!store.exists("mirror.token").expect("exists"));
    }

    #[test]
    fn keys_are_sorted_and_value_free() {
        let (_temp, store) = create_test_store();
        store.set("z.token", "secret-z").expect("set");
        store.set("a.token", "secret-a").expect("set");
        assert_eq!(store.keys().expect("keys"), vec!["a.token", "z.token"]);
    }

    #[cfg(unix)]
    #[test]
    fn written_with_0600() {
        let (_temp, store) = create_test_store();
        store.set("key", "value").expect("set");

        let mode = fs::metadata(store.path()).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert!(store.verify_permissions().expect("verify"));
    }

    #[test]
    fn parse_error_does_not_echo_content() {
        let (_temp, store) = create_test_store();
        fs::create_dir_all(store.path().parent().unwrap()).expect("mkdir");
        fs::write(store.path(), "token = \"ghp_leaky").expect("write bad toml");

        let err = store.get("token").unwrap_err().to_string();
        assert!(err.contains("cannot parse"));
        assert!(!err.contains("ghp_leaky"));
    }

    #[test]
    fn special_characters_survive() {
        let (_temp, store) = create_test_store();
        let special = "value with \"quotes\" and \n newlines and = equals";
        store.set("key", special).expect("set");
        assert_eq!(store.get("key").expect("get").as_deref(), Some(special));
    }
}
