//! Time provider abstraction for simulation and real time.
//!
//! Every blocking step in the system (connect, send, repository replace,
//! extension backoff) runs under an explicit timeout taken from a
//! [`TimeProvider`], so no operation waits indefinitely.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during time operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    /// The operation timed out.
    #[error("operation timed out")]
    Elapsed,
}

/// Provider trait for time operations.
///
/// `timeout()` races a future against a deadline.
#[async_trait]
pub trait TimeProvider: Clone + Send + Sync + 'static {
    /// Sleep for the specified duration.
    async fn sleep(&self, duration: Duration);

    /// Run a future with a timeout.
    ///
    /// Returns `Ok(result)` if the future completes within the timeout,
    /// or `Err(TimeError::Elapsed)` if it times out.
    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: std::future::Future<Output = T> + Send,
        T: Send;
}

/// Real time provider using Tokio's time facilities.
///
/// Tests running with a paused clock observe virtual time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimeProvider;

impl TokioTimeProvider {
    /// Create a new Tokio time provider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for TokioTimeProvider {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: std::future::Future<Output = T> + Send,
        T: Send,
    {
        match tokio::time::timeout(duration, future).await {
            Ok(result) => Ok(result),
            Err(_) => Err(TimeError::Elapsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_elapses() {
        let time = TokioTimeProvider::new();
        let result = time
            .timeout(Duration::from_secs(1), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                7
            })
            .await;
        assert_eq!(result, Err(TimeError::Elapsed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_advances_clock() {
        let time = TokioTimeProvider::new();
        let before = tokio::time::Instant::now();
        time.sleep(Duration::from_millis(250)).await;
        assert!(before.elapsed() >= Duration::from_millis(250));
    }
}
