//! Application configuration management.
//!
//! Holds the backend base URL, request timeout, credential store backend,
//! and the last email used to log in.
//!
//! Configuration is stored at `~/.config/fitrank/config.json`. The base URL
//! resolves as: `FITRANK_API_URL` environment variable, then the config
//! file, then the URL baked in at build time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::auth::{CredentialStore, EncryptedFileStore, KeyringStore, MemoryStore, StoreError};

/// Application name used for config/cache/data directory paths
const APP_NAME: &str = "fitrank";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Encrypted credential file name (file store backend)
const CREDENTIALS_FILE: &str = "credentials.bin";

/// Runtime override for the backend base URL
pub const API_URL_ENV: &str = "FITRANK_API_URL";

/// Passphrase for the encrypted file store
pub const STORE_PASSPHRASE_ENV: &str = "FITRANK_STORE_PASSPHRASE";

/// Backend base URL, fixed at build time when `FITRANK_API_URL` is set.
pub const DEFAULT_API_BASE_URL: &str = match option_env!("FITRANK_API_URL") {
    Some(url) => url,
    None => "http://localhost:3000/api",
};

/// Where the session's credentials live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Keychain,
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub store: StoreBackend,
    #[serde(default)]
    pub last_email: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for log files.
    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn api_base_url(&self) -> String {
        self.resolve_api_base_url(std::env::var(API_URL_ENV).ok())
    }

    fn resolve_api_base_url(&self, env_override: Option<String>) -> String {
        env_override
            .filter(|url| !url.trim().is_empty())
            .or_else(|| self.api_base_url.clone().filter(|url| !url.trim().is_empty()))
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        let secs = self
            .request_timeout_secs
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    /// Open the configured credential store.
    pub fn open_store(&self) -> Result<Arc<dyn CredentialStore>, StoreError> {
        match self.store {
            StoreBackend::Keychain => Ok(Arc::new(KeyringStore::new())),
            StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreBackend::File => {
                let passphrase = std::env::var(STORE_PASSPHRASE_ENV).map_err(|_| {
                    StoreError::Crypto(format!(
                        "{} must be set to use the file credential store",
                        STORE_PASSPHRASE_ENV
                    ))
                })?;
                let data_dir = dirs::data_dir().ok_or_else(|| {
                    StoreError::Backend("Could not find data directory".to_string())
                })?;
                let path = data_dir.join(APP_NAME).join(CREDENTIALS_FILE);
                Ok(Arc::new(EncryptedFileStore::open(path, &passphrase)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_precedence() {
        let mut config = Config::default();
        assert_eq!(config.resolve_api_base_url(None), DEFAULT_API_BASE_URL);

        config.api_base_url = Some("https://school.example/api".to_string());
        assert_eq!(config.resolve_api_base_url(None), "https://school.example/api");
        assert_eq!(
            config.resolve_api_base_url(Some("https://staging.example/api".to_string())),
            "https://staging.example/api"
        );
        // Blank overrides are ignored
        assert_eq!(
            config.resolve_api_base_url(Some("  ".to_string())),
            "https://school.example/api"
        );
    }

    #[test]
    fn test_request_timeout_defaults() {
        let mut config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        config.request_timeout_secs = Some(0);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        config.request_timeout_secs = Some(25);
        assert_eq!(config.request_timeout(), Duration::from_secs(25));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fitrank").join("config.json");

        assert!(Config::load_from(&path).unwrap().last_email.is_none());

        let config = Config {
            api_base_url: Some("https://school.example/api".to_string()),
            request_timeout_secs: Some(15),
            store: StoreBackend::File,
            last_email: Some("a@b.com".to_string()),
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.store, StoreBackend::File);
        assert_eq!(loaded.last_email.as_deref(), Some("a@b.com"));
        assert_eq!(loaded.request_timeout_secs, Some(15));
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"store":"memory"}"#).unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert!(config.api_base_url.is_none());
        assert!(config.open_store().is_ok());
    }
}
