//! Scripted collaborators for unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::StatusCode;

use crate::api::{ApiResponse, HttpRequest, Transport, TransportError};
use crate::auth::{
    CredentialStore, MemoryStore, SessionEvent, SessionManager, SessionObserver, StorageKey,
    StoreError,
};

pub const BASE_URL: &str = "https://api.fitrank.test/api";

type Responder = dyn Fn(&HttpRequest) -> Result<ApiResponse, TransportError> + Send + Sync;

/// Transport answering from a closure and recording every request.
pub struct ScriptedTransport {
    responder: Box<Responder>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(
        responder: impl Fn(&HttpRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.url == format!("{}{}", BASE_URL, path))
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<ApiResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        // Let concurrent callers interleave at every network hop
        tokio::task::yield_now().await;
        (self.responder)(&request)
    }
}

pub fn json_response(status: u16, body: serde_json::Value) -> Result<ApiResponse, TransportError> {
    Ok(ApiResponse::new(
        StatusCode::from_u16(status).unwrap(),
        HeaderMap::new(),
        serde_json::to_vec(&body).unwrap(),
    ))
}

pub fn path_of(request: &HttpRequest) -> &str {
    request.url.strip_prefix(BASE_URL).unwrap_or(&request.url)
}

pub fn bearer_of(request: &HttpRequest) -> Option<&str> {
    request
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Memory store that can be told to fail writes or deletes for given keys.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing_sets: Mutex<HashSet<StorageKey>>,
    failing_deletes: Mutex<HashSet<StorageKey>>,
}

impl FlakyStore {
    pub fn fail_set(&self, key: StorageKey) {
        self.failing_sets.lock().unwrap().insert(key);
    }

    pub fn fail_delete(&self, key: StorageKey) {
        self.failing_deletes.lock().unwrap().insert(key);
    }
}

impl CredentialStore for FlakyStore {
    fn get(&self, key: StorageKey) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<(), StoreError> {
        if self.failing_sets.lock().unwrap().contains(&key) {
            return Err(StoreError::Backend(format!("refusing to write {}", key)));
        }
        self.inner.set(key, value)
    }

    fn delete(&self, key: StorageKey) -> Result<(), StoreError> {
        if self.failing_deletes.lock().unwrap().contains(&key) {
            return Err(StoreError::Backend(format!("refusing to delete {}", key)));
        }
        self.inner.delete(key)
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_event(&self, event: &SessionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// A manager wired to the given transport and store, recording events.
pub fn manager_with(
    transport: Arc<ScriptedTransport>,
    store: Arc<dyn CredentialStore>,
) -> (SessionManager, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::default());
    let manager = SessionManager::new(BASE_URL, transport, store).with_observer(observer.clone());
    (manager, observer)
}
