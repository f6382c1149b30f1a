//! File-backed config store.
//!
//! The whole file is read and rewritten on every change. Writes go to a
//! temporary file in the same directory which is then renamed over the
//! original, so readers never observe a half-written file. Read-modify-write
//! cycles through [`ConfigStore::update`] are serialized within one process;
//! across processes the last writer wins.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{Account, BridgeConfig, non_empty};
use crate::error::ConfigError;
use crate::vault::Vault;

/// Handle to the configuration file plus the vault for its credentials.
pub struct ConfigStore {
    path: PathBuf,
    vault: Arc<Vault>,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>, vault: Arc<Vault>) -> Self {
        Self {
            path: path.into(),
            vault,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// Load and validate the file. A missing file is an error.
    pub async fn load(&self) -> Result<BridgeConfig, ConfigError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        let config = BridgeConfig::from_toml(&raw, &self.path)?;
        debug!(
            path = %self.path.display(),
            accounts = config.accounts.len(),
            rules = config.filter_rules.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Load, treating a missing file as an empty configuration.
    pub async fn load_or_default(&self) -> Result<BridgeConfig, ConfigError> {
        match self.load().await {
            Err(ConfigError::NotFound(_)) => Ok(BridgeConfig::default()),
            other => other,
        }
    }

    /// Validate and atomically replace the file.
    pub async fn save(&self, config: &BridgeConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let rendered = config.to_toml()?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, rendered.as_bytes(), Some(0o600)))
            .await
            .map_err(|e| ConfigError::Io(std::io::Error::other(e)))??;
        info!(path = %self.path.display(), "Configuration saved");
        Ok(())
    }

    /// Load, apply `change`, and save: serialized against other updates.
    ///
    /// Nothing is written when `change` returns an error.
    pub async fn update<T, E, F>(&self, change: F) -> Result<T, E>
    where
        F: FnOnce(&mut BridgeConfig) -> Result<T, E>,
        E: From<ConfigError>,
    {
        let _guard = self.write_lock.lock().await;
        let mut config = self.load_or_default().await?;
        let result = change(&mut config)?;
        self.save(&config).await?;
        Ok(result)
    }

    /// Resolve an account's plaintext password.
    ///
    /// The vault token wins over `password_env`. An undecryptable token or an
    /// unset variable yields `None`.
    pub fn password(&self, account: &Account) -> Option<SecretString> {
        if let Some(token) = non_empty(&account.encrypted_password) {
            return self.vault.decrypt_or_empty(token, &account.name);
        }
        non_empty(&account.password_env)
            .and_then(|var| std::env::var(var).ok())
            .filter(|value| !value.is_empty())
            .map(SecretString::from)
    }
}

/// Write `contents` to `path` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<(), ConfigError> {
    let write_err = |source: std::io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    tmp.write_all(contents).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(mode))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
