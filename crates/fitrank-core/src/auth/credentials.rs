use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use keyring::Entry;
use thiserror::Error;

/// Default keychain service name
pub const SERVICE_NAME: &str = "fitrank";

/// The fixed set of entries the session manager persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    AccessToken,
    RefreshToken,
    User,
}

impl StorageKey {
    pub const ALL: [StorageKey; 3] = [
        StorageKey::AccessToken,
        StorageKey::RefreshToken,
        StorageKey::User,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageKey::AccessToken => "access_token",
            StorageKey::RefreshToken => "refresh_token",
            StorageKey::User => "user_data",
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Credential backend error: {0}")]
    Backend(String),

    #[error("Credential file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential data is corrupt: {0}")]
    Corrupt(String),

    #[error("Credential encryption error: {0}")]
    Crypto(String),
}

/// Secure string-keyed storage for session credentials.
///
/// Each call is atomic for its key. Deleting an absent key is not an error.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: StorageKey) -> Result<Option<String>, StoreError>;
    fn set(&self, key: StorageKey, value: &str) -> Result<(), StoreError>;
    fn delete(&self, key: StorageKey) -> Result<(), StoreError>;
}

// ============================================================================
// OS keychain
// ============================================================================

/// Credentials stored in the OS keychain, one entry per [`StorageKey`].
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: StorageKey) -> Result<Entry, StoreError> {
        Entry::new(&self.service, key.as_str())
            .map_err(|e| StoreError::Backend(format!("Failed to create keyring entry: {}", e)))
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: StorageKey) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Backend(format!(
                "Failed to read {} from keychain: {}",
                key, e
            ))),
        }
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<(), StoreError> {
        self.entry(key)?.set_password(value).map_err(|e| {
            StoreError::Backend(format!("Failed to store {} in keychain: {}", key, e))
        })
    }

    fn delete(&self, key: StorageKey) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Backend(format!(
                "Failed to delete {} from keychain: {}",
                key, e
            ))),
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<StorageKey, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<StorageKey, String>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: StorageKey) -> Result<Option<String>, StoreError> {
        Ok(self.entries()?.get(&key).cloned())
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<(), StoreError> {
        self.entries()?.insert(key, value.to_string());
        Ok(())
    }

    fn delete(&self, key: StorageKey) -> Result<(), StoreError> {
        self.entries()?.remove(&key);
        Ok(())
    }
}
