use thiserror::Error;

use super::credentials::StoreError;
use crate::api::ApiError;

/// Message shown for any failure to reach or understand the backend.
pub const CONNECTION_ERROR_MESSAGE: &str =
    "Unable to connect to the server. Please check your connection and try again.";

/// Fallback when the backend rejects a login without saying why.
pub const LOGIN_FAILED_MESSAGE: &str = "Login failed";

#[derive(Error, Debug)]
pub enum SessionError {
    /// The backend refused the credentials.
    #[error("{0}")]
    Rejected(String),

    /// Network unreachable, timed out, or the reply was unreadable.
    #[error("{}", CONNECTION_ERROR_MESSAGE)]
    Connection,

    #[error("Not authenticated - please log in")]
    Unauthenticated,

    #[error("Session expired, please log in again")]
    SessionExpired,

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl SessionError {
    /// True when the UI has to send the user back to the login screen.
    pub fn needs_reauthentication(&self) -> bool {
        matches!(
            self,
            SessionError::Unauthenticated
                | SessionError::SessionExpired
                | SessionError::Api(ApiError::Unauthorized)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reauthentication_categories() {
        assert!(SessionError::Unauthenticated.needs_reauthentication());
        assert!(SessionError::SessionExpired.needs_reauthentication());
        assert!(SessionError::Api(ApiError::Unauthorized).needs_reauthentication());

        assert!(!SessionError::Connection.needs_reauthentication());
        assert!(!SessionError::Rejected("bad password".into()).needs_reauthentication());
        assert!(!SessionError::Api(ApiError::TooManyRequests).needs_reauthentication());
    }

    #[test]
    fn test_messages() {
        assert_eq!(SessionError::Connection.to_string(), CONNECTION_ERROR_MESSAGE);
        assert_eq!(
            SessionError::Rejected("Invalid email or password".into()).to_string(),
            "Invalid email or password"
        );
        assert_eq!(
            SessionError::SessionExpired.to_string(),
            "Session expired, please log in again"
        );
    }
}
