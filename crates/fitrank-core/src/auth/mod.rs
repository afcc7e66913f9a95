//! Authentication module for managing the user session and its credentials.
//!
//! This module provides:
//! - `SessionManager`: login, logout, session state, and authenticated
//!   requests with single-flight token refresh
//! - `CredentialStore`: secure storage for the token pair and cached user,
//!   backed by the OS keychain, an encrypted file, or memory
//! - `SessionEvent` / `SessionObserver`: the hook through which the manager
//!   reports failures and lifecycle changes
//!
//! Being "logged in" means an access token is stored. Expiry is discovered
//! when the backend answers 401.

pub mod credentials;
pub mod error;
pub mod events;
pub mod file_store;
pub mod session;

pub use credentials::{CredentialStore, KeyringStore, MemoryStore, StorageKey, StoreError};
pub use error::SessionError;
pub use events::{RefreshFailure, SessionEvent, SessionObserver, StoreOp, TracingObserver};
pub use file_store::EncryptedFileStore;
pub use session::SessionManager;
