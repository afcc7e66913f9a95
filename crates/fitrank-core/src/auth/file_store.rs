//! Passphrase-encrypted credential file, for devices without a usable
//! keychain.
//!
//! Layout: `MAGIC | salt (16) | nonce (12) | ciphertext`. The key is derived
//! from the passphrase with Argon2id; the plaintext is a JSON object keyed by
//! [`StorageKey::as_str`]. Every write uses a fresh nonce and replaces the
//! file by rename.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use super::credentials::{CredentialStore, StorageKey, StoreError};

const MAGIC: &[u8; 4] = b"FRC1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = MAGIC.len() + SALT_LEN + NONCE_LEN;

type Entries = BTreeMap<String, String>;

pub struct EncryptedFileStore {
    path: PathBuf,
    salt: [u8; SALT_LEN],
    cipher: ChaCha20Poly1305,
    lock: Mutex<()>,
}

impl EncryptedFileStore {
    /// Open (or prepare to create) the store at `path`.
    ///
    /// Fails if an existing file cannot be decrypted with `passphrase`.
    pub fn open(path: impl Into<PathBuf>, passphrase: &str) -> Result<Self, StoreError> {
        if passphrase.is_empty() {
            return Err(StoreError::Crypto("passphrase must not be empty".to_string()));
        }

        let path = path.into();
        let salt = match fs::read(&path) {
            Ok(bytes) => split_file(&bytes)?.0,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let mut salt = [0u8; SALT_LEN];
                OsRng.fill_bytes(&mut salt);
                salt
            }
            Err(e) => return Err(e.into()),
        };

        let store = Self {
            cipher: derive_cipher(passphrase, &salt)?,
            path,
            salt,
            lock: Mutex::new(()),
        };

        // Validates the passphrase against an existing file
        store.read_entries()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<Entries, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(e.into()),
        };

        let (_, nonce, ciphertext) = split_file(&bytes)?;
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| {
                StoreError::Crypto("wrong passphrase or tampered credential file".to_string())
            })?;

        serde_json::from_slice(&plaintext).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn write_entries(&self, entries: &Entries) -> Result<(), StoreError> {
        let plaintext =
            serde_json::to_vec(entries).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|e| StoreError::Crypto(e.to_string()))?;

        let mut contents = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        contents.extend_from_slice(MAGIC);
        contents.extend_from_slice(&self.salt);
        contents.extend_from_slice(&nonce);
        contents.extend_from_slice(&ciphertext);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents)?;
        restrict_permissions(&tmp)?;
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), entries = entries.len(), "Credential file written");
        Ok(())
    }

    fn modify(&self, f: impl FnOnce(&mut Entries) -> bool) -> Result<(), StoreError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StoreError::Backend("credential file lock poisoned".to_string()))?;
        let mut entries = self.read_entries()?;
        if f(&mut entries) {
            self.write_entries(&entries)?;
        }
        Ok(())
    }
}

impl CredentialStore for EncryptedFileStore {
    fn get(&self, key: StorageKey) -> Result<Option<String>, StoreError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| StoreError::Backend("credential file lock poisoned".to_string()))?;
        Ok(self.read_entries()?.remove(key.as_str()))
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<(), StoreError> {
        self.modify(|entries| {
            entries.insert(key.as_str().to_string(), value.to_string());
            true
        })
    }

    fn delete(&self, key: StorageKey) -> Result<(), StoreError> {
        self.modify(|entries| entries.remove(key.as_str()).is_some())
    }
}

fn derive_cipher(passphrase: &str, salt: &[u8]) -> Result<ChaCha20Poly1305, StoreError> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| StoreError::Crypto(format!("key derivation failed: {}", e)))?;
    Ok(ChaCha20Poly1305::new(Key::from_slice(&key)))
}

fn split_file(bytes: &[u8]) -> Result<([u8; SALT_LEN], [u8; NONCE_LEN], &[u8]), StoreError> {
    if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(StoreError::Corrupt("not a fitrank credential file".to_string()));
    }
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&bytes[MAGIC.len()..MAGIC.len() + SALT_LEN]);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&bytes[MAGIC.len() + SALT_LEN..HEADER_LEN]);
    Ok((salt, nonce, &bytes[HEADER_LEN..]))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}
