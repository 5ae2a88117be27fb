//! Remote cache tier
//!
//! The remote tier is an injected adapter: bytes for a key, or nothing.
//! The engine treats it as read-through only and never writes back. The
//! HTTP implementation routes through a circuit breaker; tests use the
//! deterministic in-memory source.

use crate::transport::{CircuitBreaker, TransportError, TransportResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// A source of remote bytes.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch the content for a key, or `None` when the remote has none.
    async fn fetch(&self, key: &str) -> TransportResult<Option<Vec<u8>>>;
}

/// Hook producing keys worth prefetching after a put.
pub trait RelatedKeys: Send + Sync {
    /// Keys related to the one just written.
    fn related(&self, key: &str) -> Vec<String>;
}

/// The default prefetch hook: no related keys.
pub struct NoRelatedKeys;

impl RelatedKeys for NoRelatedKeys {
    fn related(&self, _key: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Deterministic in-memory remote source for tests and offline use.
#[derive(Default)]
pub struct StaticRemoteSource {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl StaticRemoteSource {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish content under a key.
    pub fn insert(&self, key: &str, bytes: Vec<u8>) {
        self.entries.write().insert(key.to_string(), bytes);
    }
}

#[async_trait]
impl RemoteSource for StaticRemoteSource {
    async fn fetch(&self, key: &str) -> TransportResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }
}

/// HTTP-backed remote source. Keys append to the base URL; the circuit
/// breaker fails fast once the endpoint has shown a run of failures.
pub struct HttpRemoteSource {
    client: reqwest::Client,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
}

impl HttpRemoteSource {
    /// Source rooted at a base URL with a default client.
    pub fn new(base_url: &str, breaker: Arc<CircuitBreaker>) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            breaker,
        })
    }
}

#[async_trait]
impl RemoteSource for HttpRemoteSource {
    async fn fetch(&self, key: &str) -> TransportResult<Option<Vec<u8>>> {
        self.breaker.check()?;

        let url = format!("{}/{}", self.base_url, key);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                self.breaker.record_failure();
                return Err(if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Network(e.to_string())
                });
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            self.breaker.record_success();
            return Ok(None);
        }
        if !status.is_success() {
            self.breaker.record_failure();
            return Err(TransportError::HttpStatus(status.as_u16()));
        }

        match response.bytes().await {
            Ok(bytes) => {
                self.breaker.record_success();
                Ok(Some(bytes.to_vec()))
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(TransportError::Network(e.to_string()))
            }
        }
    }
}
