//! Shared test helpers, available to all `#[cfg(test)]` modules in the crate.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use reqwest::StatusCode;
use time::OffsetDateTime;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::navigation::InMemoryNavigation;
use crate::session::SessionManager;
use crate::storage::MemoryStorage;
use crate::transport::{ApiRequest, ApiResponse, Transport};
use crate::types::TokenPair;

pub const BASE_URL: &str = "https://vocab.test";
pub const START_URL: &str = "https://vocab.test/words?page=2";
pub const EMAIL: &str = "kim@example.com";

/// `header.payload.signature` with the given JSON payload.
pub fn jwt_with_payload(payload: &str) -> String {
    format!(
        "{}.{}.c2ln",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(payload)
    )
}

/// Token for [`EMAIL`] whose `exp` is `secs` from now (negative for past).
pub fn jwt_expiring_in(secs: i64) -> String {
    let exp = OffsetDateTime::now_utc().unix_timestamp() + secs;
    jwt_with_payload(&format!(r#"{{"sub":"{EMAIL}","exp":{exp}}}"#))
}

pub fn json_response(status: StatusCode, body: serde_json::Value) -> ApiResponse {
    ApiResponse::new(status, body.to_string())
}

/// Body the refresh endpoint returns for a new pair.
pub fn refreshed(pair: &TokenPair) -> ApiResponse {
    json_response(StatusCode::OK, serde_json::to_value(pair).unwrap())
}

type Handler = dyn Fn(&ApiRequest, usize) -> Result<ApiResponse, Error> + Send + Sync;

/// Scripted [`Transport`].
///
/// The handler receives each request plus how many earlier requests went
/// to the same target. Cloning shares the call log.
#[derive(Clone)]
pub struct MockTransport {
    handler: Arc<Handler>,
    calls: Arc<Mutex<Vec<ApiRequest>>>,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new(
        handler: impl Fn(&ApiRequest, usize) -> Result<ApiResponse, Error> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
            calls: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Hold every response for `delay` so callers overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls_to(&self, target: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|r| r.target == target)
            .count()
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.calls.lock().clone()
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, Error> {
        let seen = {
            let mut calls = self.calls.lock();
            let seen = calls.iter().filter(|r| r.target == request.target).count();
            calls.push(request.clone());
            seen
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(&request, seen)
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig::new(BASE_URL.parse().unwrap())
}

/// Everything a test needs to drive one tab.
pub struct Fixture {
    pub session: SessionManager<MockTransport>,
    pub transport: MockTransport,
    pub storage: Arc<MemoryStorage>,
    pub navigation: Arc<InMemoryNavigation>,
}

pub fn fixture(transport: MockTransport) -> Fixture {
    fixture_with(test_config(), transport, Arc::new(MemoryStorage::new()), START_URL)
}

pub fn fixture_with(
    config: ClientConfig,
    transport: MockTransport,
    storage: Arc<MemoryStorage>,
    start_url: &str,
) -> Fixture {
    let navigation = Arc::new(InMemoryNavigation::new(start_url.parse().unwrap()));
    let session = SessionManager::new(
        config,
        transport.clone(),
        storage.clone(),
        navigation.clone(),
    );
    Fixture {
        session,
        transport,
        storage,
        navigation,
    }
}
