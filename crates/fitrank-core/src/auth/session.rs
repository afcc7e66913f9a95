//! Session lifecycle and authenticated request dispatch.
//!
//! `SessionManager` owns the credential pair and the cached user snapshot.
//! Every call that needs a bearer token goes through
//! [`SessionManager::authenticated_request`], which refreshes the access
//! token at most once per call when the backend answers 401.
//!
//! Header precedence for authenticated requests:
//! 1. `Content-Type: application/json` is set by default.
//! 2. Caller headers replace defaults with the same name.
//! 3. `Authorization` is always the manager's bearer token.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::Mutex;

use super::credentials::{CredentialStore, StorageKey, StoreError};
use super::error::{SessionError, LOGIN_FAILED_MESSAGE};
use super::events::{RefreshFailure, SessionEvent, SessionObserver, StoreOp, TracingObserver};
use crate::api::{ApiClient, ApiResponse, HttpRequest, RequestOptions, Transport};
use crate::config::Config;
use crate::models::{LoginData, UserSnapshot};

// ============================================================================
// Constants
// ============================================================================

const LOGIN_ENDPOINT: &str = "/auth/login";
const REFRESH_ENDPOINT: &str = "/auth/refresh";
const PROFILE_ENDPOINT: &str = "/auth/profile";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<UserSnapshot>,
    #[serde(default, alias = "error")]
    message: Option<String>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    access_token: Option<String>,
    /// Present when the backend rotates refresh tokens
    #[serde(default)]
    refresh_token: Option<String>,
}

// ============================================================================
// Session manager
// ============================================================================

pub struct SessionManager {
    base_url: String,
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    observer: Arc<dyn SessionObserver>,
    /// Serialises every credential write (login, refresh, logout) so that
    /// concurrent 401s share one refresh.
    credentials_lock: Mutex<()>,
    /// Bumped whenever the session is replaced or cleared (not on refresh).
    generation: AtomicU64,
}

impl SessionManager {
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
            store,
            observer: Arc::new(TracingObserver),
            credentials_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Production wiring: reqwest transport, configured store, tracing.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let transport = ApiClient::with_timeout(config.request_timeout())
            .context("Failed to build HTTP client")?;
        let store = config.open_store().context("Failed to open credential store")?;
        Ok(Self::new(config.api_base_url(), Arc::new(transport), store))
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ===== Login / logout =====

    /// Exchange email and password for a credential pair.
    ///
    /// Field validation is the caller's job. On success the token pair and
    /// user snapshot are persisted together; on any failure nothing is.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginData, SessionError> {
        let body = serde_json::to_vec(&LoginRequest { email, password })
            .map_err(|e| SessionError::InvalidRequest(e.to_string()))?;
        let request = HttpRequest {
            method: Method::POST,
            url: join_url(&self.base_url, LOGIN_ENDPOINT),
            headers: json_headers(),
            body: Some(body),
        };

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                self.emit(SessionEvent::LoginFailed {
                    reason: e.to_string(),
                });
                return Err(SessionError::Connection);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<LoginResponse>()
                .ok()
                .and_then(|body| non_empty(body.message))
                .unwrap_or_else(|| LOGIN_FAILED_MESSAGE.to_string());
            return Err(self.login_rejected(status, message));
        }

        let body: LoginResponse = match response.json() {
            Ok(body) => body,
            Err(e) => {
                self.emit(SessionEvent::LoginFailed {
                    reason: format!("unreadable login response: {}", e),
                });
                return Err(SessionError::Connection);
            }
        };

        let (access_token, refresh_token) =
            match (non_empty(body.access_token), non_empty(body.refresh_token)) {
                (Some(access), Some(refresh)) => (access, refresh),
                _ => {
                    let message =
                        non_empty(body.message).unwrap_or_else(|| LOGIN_FAILED_MESSAGE.to_string());
                    return Err(self.login_rejected(status, message));
                }
            };

        {
            let _guard = self.credentials_lock.lock().await;
            self.persist_login(&access_token, &refresh_token, body.user.as_ref())?;
        }

        self.emit(SessionEvent::LoggedIn {
            user_id: body.user.as_ref().and_then(|u| u.id.clone()),
        });
        Ok(LoginData {
            access_token,
            refresh_token,
            user: body.user,
        })
    }

    /// Remove every persisted credential. Safe to call when logged out.
    pub async fn logout(&self) {
        let _guard = self.credentials_lock.lock().await;
        self.clear_credentials();
        self.emit(SessionEvent::LoggedOut);
    }

    // ===== Session state =====

    /// True iff an access token is stored. Does not check validity.
    pub fn is_authenticated(&self) -> bool {
        matches!(self.read(StorageKey::AccessToken), Ok(Some(token)) if !token.is_empty())
    }

    /// Last cached user snapshot, if any.
    pub fn user_data(&self) -> Option<UserSnapshot> {
        let json = self.read(StorageKey::User).ok().flatten()?;
        match serde_json::from_str(&json) {
            Ok(user) => Some(user),
            Err(e) => {
                self.emit(SessionEvent::UserSnapshotUnreadable {
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    /// Alias of [`user_data`](Self::user_data); never touches the network.
    pub fn user_profile(&self) -> Option<UserSnapshot> {
        self.user_data()
    }

    /// Fetch the profile from the backend and replace the cached snapshot.
    ///
    /// If the session was logged out or replaced while the request was in
    /// flight, the result is discarded and [`SessionError::SessionExpired`]
    /// returned.
    pub async fn refresh_user_profile(&self) -> Result<UserSnapshot, SessionError> {
        let generation = self.generation.load(Ordering::SeqCst);
        let value: serde_json::Value = self.get_json(PROFILE_ENDPOINT).await?;
        // Accept both a bare user object and `{"user": {...}}`
        let wrapped = value.get("user").filter(|u| u.is_object()).cloned();
        let user: UserSnapshot = serde_json::from_value(wrapped.unwrap_or(value))
            .map_err(|e| SessionError::Decode(e.to_string()))?;

        let json = serde_json::to_string(&user).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let _guard = self.credentials_lock.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation || !self.is_authenticated() {
            return Err(SessionError::SessionExpired);
        }
        if let Err(e) = self.store.set(StorageKey::User, &json) {
            self.storage_failed(StorageKey::User, StoreOp::Write, &e);
            return Err(e.into());
        }
        Ok(user)
    }

    // ===== Authenticated requests =====

    /// Send a request with the stored bearer token.
    ///
    /// Any response other than 401 is returned as-is. On 401 the access
    /// token is refreshed once and the request retried once; the retry's
    /// response is returned whatever its status. If the refresh fails the
    /// session is cleared and [`SessionError::SessionExpired`] returned.
    pub async fn authenticated_request(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, SessionError> {
        let token = match self.read(StorageKey::AccessToken) {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => return Err(SessionError::Unauthenticated),
            Err(e) => return Err(e.into()),
        };

        let url = resolve_url(&self.base_url, endpoint)?;
        let response = self.send_with_token(&url, &options, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        self.emit(SessionEvent::AccessTokenRejected { url: url.clone() });
        match self.refresh_after_rejection(&token).await {
            Some(fresh) => self.send_with_token(&url, &options, &fresh).await,
            None => {
                self.emit(SessionEvent::SessionExpired);
                Err(SessionError::SessionExpired)
            }
        }
    }

    /// GET `endpoint` and decode a 2xx JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, SessionError> {
        self.send_json::<(), T>(Method::GET, endpoint, None).await
    }

    /// Send an optional JSON body and decode a 2xx JSON reply.
    /// Non-2xx responses become [`SessionError::Api`].
    pub async fn send_json<B, T>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<T, SessionError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut options = RequestOptions::new(method);
        if let Some(body) = body {
            options = options
                .json(body)
                .map_err(|e| SessionError::InvalidRequest(e.to_string()))?;
        }

        let response = self
            .authenticated_request(endpoint, options)
            .await?
            .error_for_status()?;
        response
            .json()
            .map_err(|e| SessionError::Decode(e.to_string()))
    }

    // ===== Token refresh =====

    /// Trade the stored refresh token for a new access token.
    ///
    /// Returns the new token, or `None` on any failure with stored state
    /// left as it was.
    pub async fn refresh_access_token(&self) -> Option<String> {
        let _guard = self.credentials_lock.lock().await;
        self.refresh_locked().await
    }

    /// Single-flight refresh after `rejected` drew a 401.
    ///
    /// If another caller already replaced `rejected` while we waited for the
    /// lock, its token is reused. A failed refresh clears the session before
    /// the lock is released.
    async fn refresh_after_rejection(&self, rejected: &str) -> Option<String> {
        let _guard = self.credentials_lock.lock().await;

        let refreshed = match self.read(StorageKey::AccessToken) {
            Ok(Some(current)) if !current.is_empty() && current != rejected => {
                self.emit(SessionEvent::ConcurrentRefreshReused);
                return Some(current);
            }
            // Another caller already expired the session
            Ok(None) => None,
            _ => self.refresh_locked().await,
        };

        if refreshed.is_none() {
            self.clear_credentials();
            self.emit(SessionEvent::LoggedOut);
        }
        refreshed
    }

    /// Caller must hold `credentials_lock`.
    async fn refresh_locked(&self) -> Option<String> {
        let refresh_token = match self.read(StorageKey::RefreshToken) {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => return self.refresh_failed(RefreshFailure::MissingRefreshToken),
            Err(e) => return self.refresh_failed(RefreshFailure::Storage(e.to_string())),
        };

        let body = match serde_json::to_vec(&RefreshRequest {
            refresh_token: &refresh_token,
        }) {
            Ok(body) => body,
            Err(e) => return self.refresh_failed(RefreshFailure::Transport(e.to_string())),
        };
        let request = HttpRequest {
            method: Method::POST,
            url: join_url(&self.base_url, REFRESH_ENDPOINT),
            headers: json_headers(),
            body: Some(body),
        };

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => return self.refresh_failed(RefreshFailure::Transport(e.to_string())),
        };
        if !response.is_success() {
            return self.refresh_failed(RefreshFailure::Rejected {
                status: response.status().as_u16(),
            });
        }

        let parsed: RefreshResponse = match response.json() {
            Ok(parsed) => parsed,
            Err(e) => {
                return self.refresh_failed(RefreshFailure::Transport(format!(
                    "unreadable refresh response: {}",
                    e
                )))
            }
        };
        let access_token = match non_empty(parsed.access_token) {
            Some(token) => token,
            None => return self.refresh_failed(RefreshFailure::MissingAccessToken),
        };

        if let Err(e) = self.store.set(StorageKey::AccessToken, &access_token) {
            self.storage_failed(StorageKey::AccessToken, StoreOp::Write, &e);
            return self.refresh_failed(RefreshFailure::Storage(e.to_string()));
        }

        let rotated = non_empty(parsed.refresh_token);
        if let Some(ref refresh_token) = rotated {
            // The new access token is already usable; a failed write here
            // only means the next refresh uses the old refresh token.
            if let Err(e) = self.store.set(StorageKey::RefreshToken, refresh_token) {
                self.storage_failed(StorageKey::RefreshToken, StoreOp::Write, &e);
            }
        }

        self.emit(SessionEvent::TokenRefreshed {
            rotated_refresh_token: rotated.is_some(),
        });
        Some(access_token)
    }

    // ===== Helpers =====

    async fn send_with_token(
        &self,
        url: &str,
        options: &RequestOptions,
        token: &str,
    ) -> Result<ApiResponse, SessionError> {
        let request = HttpRequest {
            method: options.method.clone(),
            url: url.to_string(),
            headers: merge_headers(&options.headers, token)?,
            body: options.body.clone(),
        };

        self.transport.send(request).await.map_err(|e| {
            self.emit(SessionEvent::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            });
            SessionError::Connection
        })
    }

    /// Write the new session, or roll back to an empty session.
    /// Caller must hold `credentials_lock`.
    fn persist_login(
        &self,
        access_token: &str,
        refresh_token: &str,
        user: Option<&UserSnapshot>,
    ) -> Result<(), SessionError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let user_json = user
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let writes = [
            (StorageKey::AccessToken, Some(access_token)),
            (StorageKey::RefreshToken, Some(refresh_token)),
            // A login without a user must not leave the previous user cached
            (StorageKey::User, user_json.as_deref()),
        ];

        for (key, value) in writes {
            let (op, result) = match value {
                Some(value) => (StoreOp::Write, self.store.set(key, value)),
                None => (StoreOp::Delete, self.store.delete(key)),
            };
            if let Err(e) = result {
                self.storage_failed(key, op, &e);
                self.clear_credentials();
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Delete every key, continuing past failures.
    /// Caller must hold `credentials_lock`.
    fn clear_credentials(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        for key in StorageKey::ALL {
            if let Err(e) = self.store.delete(key) {
                self.storage_failed(key, StoreOp::Delete, &e);
            }
        }
    }

    fn read(&self, key: StorageKey) -> Result<Option<String>, StoreError> {
        self.store.get(key).inspect_err(|e| {
            self.storage_failed(key, StoreOp::Read, e);
        })
    }

    fn login_rejected(&self, status: StatusCode, message: String) -> SessionError {
        self.emit(SessionEvent::LoginRejected {
            status: status.as_u16(),
            message: message.clone(),
        });
        SessionError::Rejected(message)
    }

    fn refresh_failed(&self, failure: RefreshFailure) -> Option<String> {
        self.emit(SessionEvent::RefreshFailed(failure));
        None
    }

    fn storage_failed(&self, key: StorageKey, op: StoreOp, err: &StoreError) {
        self.emit(SessionEvent::StorageFailed {
            key,
            op,
            reason: err.to_string(),
        });
    }

    fn emit(&self, event: SessionEvent) {
        self.observer.on_event(&event);
    }
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

fn merge_headers(caller: &HeaderMap, token: &str) -> Result<HeaderMap, SessionError> {
    let mut headers = json_headers();
    for name in caller.keys() {
        headers.remove(name);
    }
    for (name, value) in caller.iter() {
        headers.append(name.clone(), value.clone());
    }

    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
        SessionError::InvalidRequest("stored access token is not a valid header value".to_string())
    })?;
    bearer.set_sensitive(true);
    headers.insert(AUTHORIZATION, bearer);
    Ok(headers)
}

fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Relative endpoints are joined onto the base URL. Absolute URLs are only
/// accepted on the backend's own origin, so the bearer token never leaves it.
fn resolve_url(base_url: &str, endpoint: &str) -> Result<String, SessionError> {
    if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
        return Ok(join_url(base_url, endpoint));
    }

    let base = Url::parse(base_url)
        .map_err(|e| SessionError::InvalidRequest(format!("invalid base URL: {}", e)))?;
    let target = Url::parse(endpoint)
        .map_err(|e| SessionError::InvalidRequest(format!("invalid endpoint URL: {}", e)))?;

    let same_origin = base.scheme() == target.scheme()
        && base.host_str() == target.host_str()
        && base.port_or_known_default() == target.port_or_known_default();
    if !same_origin {
        return Err(SessionError::InvalidRequest(format!(
            "refusing to send credentials to {}",
            target.origin().ascii_serialization()
        )));
    }
    Ok(endpoint.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

// ============================================================================
// Tests
// ============================================================================
