//! Session lifecycle events.
//!
//! The manager reports everything worth logging as a [`SessionEvent`] to an
//! injected [`SessionObserver`]. Production code uses [`TracingObserver`];
//! tests record the events and assert on them directly.

use tracing::{debug, info, warn};

use super::credentials::StorageKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Read,
    Write,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    MissingRefreshToken,
    Rejected { status: u16 },
    MissingAccessToken,
    Transport(String),
    Storage(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { user_id: Option<String> },
    LoginRejected { status: u16, message: String },
    LoginFailed { reason: String },
    LoggedOut,
    StorageFailed { key: StorageKey, op: StoreOp, reason: String },
    UserSnapshotUnreadable { reason: String },
    AccessTokenRejected { url: String },
    TokenRefreshed { rotated_refresh_token: bool },
    ConcurrentRefreshReused,
    RefreshFailed(RefreshFailure),
    SessionExpired,
    RequestFailed { url: String, reason: String },
}

pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// Forwards session events to `tracing`. Never logs token values.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::LoggedIn { user_id } => {
                info!(user_id = user_id.as_deref().unwrap_or("-"), "Logged in")
            }
            SessionEvent::LoginRejected { status, message } => {
                warn!(status, message = %message, "Login rejected")
            }
            SessionEvent::LoginFailed { reason } => warn!(reason = %reason, "Login failed"),
            SessionEvent::LoggedOut => info!("Logged out"),
            SessionEvent::StorageFailed { key, op, reason } => {
                warn!(key = %key, op = ?op, reason = %reason, "Credential storage failed")
            }
            SessionEvent::UserSnapshotUnreadable { reason } => {
                warn!(reason = %reason, "Cached user snapshot unreadable")
            }
            SessionEvent::AccessTokenRejected { url } => {
                info!(url = %url, "Access token rejected, refreshing")
            }
            SessionEvent::TokenRefreshed {
                rotated_refresh_token,
            } => info!(rotated_refresh_token, "Access token refreshed"),
            SessionEvent::ConcurrentRefreshReused => {
                debug!("Reusing access token refreshed by a concurrent request")
            }
            SessionEvent::RefreshFailed(failure) => {
                warn!(failure = ?failure, "Token refresh failed")
            }
            SessionEvent::SessionExpired => warn!("Session expired, credentials cleared"),
            SessionEvent::RequestFailed { url, reason } => {
                warn!(url = %url, reason = %reason, "Request failed")
            }
        }
    }
}
