use reqwest::StatusCode;
use thiserror::Error;

/// What went wrong when the fitrank backend answered with a non-2xx status.
///
/// Variants carry the server's own message where it sent one
/// (`{"message": ..}` or `{"error": ..}`), otherwise a clipped copy of the body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("The server no longer accepts this session")]
    Unauthorized,

    /// 403, e.g. a student calling a teacher-only endpoint.
    #[error("Your account is not allowed to do this: {0}")]
    Forbidden(String),

    #[error("Nothing found: {0}")]
    NotFound(String),

    /// 400, 409 and 422: the request reached the backend but its content was refused.
    #[error("{message}")]
    Invalid { status: u16, message: String },

    #[error("Too many requests to fitrank, try again shortly")]
    TooManyRequests,

    #[error("fitrank is having trouble ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Unexpected response ({status}): {message}")]
    Unexpected { status: u16, message: String },
}

/// Failure to get any HTTP response at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}

/// Bytes of a raw response body kept in an error.
const BODY_EXCERPT_BYTES: usize = 300;

impl ApiError {
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let code = status.as_u16();
        match code {
            401 => ApiError::Unauthorized,
            429 => ApiError::TooManyRequests,
            403 => ApiError::Forbidden(server_message(body)),
            404 => ApiError::NotFound(server_message(body)),
            400 | 409 | 422 => ApiError::Invalid {
                status: code,
                message: server_message(body),
            },
            500..=599 => ApiError::Server {
                status: code,
                message: server_message(body),
            },
            _ => ApiError::Unexpected {
                status: code,
                message: server_message(body),
            },
        }
    }
}

/// The backend's `message`/`error` field if the body is JSON that has one,
/// else the body itself clipped to [`BODY_EXCERPT_BYTES`].
fn server_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    let field = parsed.as_ref().and_then(|value| {
        ["message", "error"]
            .iter()
            .find_map(|key| value.get(key).and_then(|v| v.as_str()))
            .filter(|msg| !msg.trim().is_empty())
    });
    match field {
        Some(msg) => msg.to_string(),
        None => excerpt(body),
    }
}

fn excerpt(body: &str) -> String {
    if body.len() <= BODY_EXCERPT_BYTES {
        return body.to_string();
    }
    let mut end = BODY_EXCERPT_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [{} bytes]", &body[..end], body.len())
}
