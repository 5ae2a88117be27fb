//! Transport policy: backpressure and failure containment
//!
//! The engine never talks to the network directly; remote adapters route
//! through this layer. It provides per-network-type bandwidth profiles
//! with a priority request queue, a circuit breaker for failing
//! endpoints, and the shared timeout/cancellation helper every
//! suspending operation uses.

pub mod bandwidth;
pub mod circuit;

pub use bandwidth::{BandwidthProfile, NetworkType, RequestPriority, RequestQueue};
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Transport errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The per-request deadline elapsed.
    #[error("request timed out")]
    Timeout,

    /// The operation was cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// The circuit breaker is open for this endpoint.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The remote answered with a non-success status.
    #[error("http status {0}")]
    HttpStatus(u16),

    /// The request failed before a status was received.
    #[error("network error: {0}")]
    Network(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Run a future under a deadline and a cancellation token. Timing out is
/// reported distinctly from cancellation.
pub async fn with_deadline<T, F>(
    timeout: Duration,
    token: &CancellationToken,
    future: F,
) -> TransportResult<T>
where
    F: Future<Output = TransportResult<T>>,
{
    tokio::select! {
        _ = token.cancelled() => Err(TransportError::Cancelled),
        _ = tokio::time::sleep(timeout) => Err(TransportError::Timeout),
        result = future => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_times_out() {
        let token = CancellationToken::new();
        let result = with_deadline(Duration::from_millis(10), &token, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(TransportError::Timeout));
    }

    #[tokio::test]
    async fn test_deadline_cancellation_is_distinct() {
        let token = CancellationToken::new();
        token.cancel();
        let result = with_deadline(Duration::from_secs(5), &token, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(TransportError::Cancelled));
    }

    #[tokio::test]
    async fn test_deadline_passes_through_success() {
        let token = CancellationToken::new();
        let result = with_deadline(Duration::from_secs(1), &token, async { Ok(42u32) }).await;
        assert_eq!(result, Ok(42));
    }
}
