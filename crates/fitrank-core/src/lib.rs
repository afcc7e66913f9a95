//! Client-side session core for the fitrank activity-tracking platform.
//!
//! Screens depend on a single [`SessionManager`] built at startup and shared
//! by reference. It owns the credential lifecycle and mediates every call to
//! the backend that needs a bearer token.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

#[cfg(test)]
mod test_support;

pub use api::{ApiClient, ApiError, ApiResponse, RequestOptions, Transport, TransportError};
pub use auth::{CredentialStore, SessionError, SessionEvent, SessionManager, SessionObserver};
pub use config::{Config, StoreBackend};
pub use models::{LoginData, Role, UserSnapshot};
