//! Time provider abstraction.
//!
//! Monotonic time drives timers and backoff. Wall-clock time stamps data that
//! outlives the process, such as offline queue entries.

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors that can occur during time operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    /// The operation timed out.
    #[error("operation timed out")]
    Elapsed,

    /// The time provider has been shut down and is no longer accessible.
    #[error("time provider shut down")]
    Shutdown,
}

/// Provider trait for time operations.
///
/// ## Time Semantics
///
/// - `now()`: monotonic time since the provider was created. Use this for
///   scheduling, timeouts and age comparisons within a session.
/// - `unix_time()`: wall-clock time since the Unix epoch. Use this for
///   timestamps that are persisted and compared after a restart.
#[async_trait(?Send)]
pub trait TimeProvider: Clone {
    /// Sleep for the specified duration.
    async fn sleep(&self, duration: Duration) -> Result<(), TimeError>;

    /// Get monotonic time elapsed since provider creation.
    fn now(&self) -> Duration;

    /// Get wall-clock time since the Unix epoch.
    fn unix_time(&self) -> Duration;

    /// Run a future with a timeout.
    ///
    /// Returns `Ok(result)` if the future completes within the timeout,
    /// or `Err(TimeError::Elapsed)` if it times out.
    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: std::future::Future<Output = T>;
}

/// Real time provider using Tokio's time facilities.
///
/// Both clocks are derived from [`tokio::time::Instant`], so a test runtime
/// with a paused clock advances `now()` and `unix_time()` together.
#[derive(Debug, Clone)]
pub struct TokioTimeProvider {
    /// Start time for calculating elapsed duration
    start_time: tokio::time::Instant,

    /// Wall-clock reading taken together with `start_time`
    start_unix: Duration,
}

impl TokioTimeProvider {
    /// Create a new Tokio time provider.
    pub fn new() -> Self {
        Self {
            start_time: tokio::time::Instant::now(),
            start_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default(),
        }
    }
}

impl Default for TokioTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl TimeProvider for TokioTimeProvider {
    async fn sleep(&self, duration: Duration) -> Result<(), TimeError> {
        tokio::time::sleep(duration).await;
        Ok(())
    }

    fn now(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn unix_time(&self) -> Duration {
        self.start_unix + self.now()
    }

    async fn timeout<F, T>(&self, duration: Duration, future: F) -> Result<T, TimeError>
    where
        F: std::future::Future<Output = T>,
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
    async fn test_clocks_advance_together() {
        let time = TokioTimeProvider::new();
        let unix_before = time.unix_time();

        time.sleep(Duration::from_secs(90)).await.expect("sleep");

        assert!(time.now() >= Duration::from_secs(90));
        assert_eq!(time.unix_time() - unix_before, time.now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_elapses() {
        let time = TokioTimeProvider::new();
        let result = time
            .timeout(Duration::from_millis(10), std::future::pending::<()>())
            .await;
        assert_eq!(result, Err(TimeError::Elapsed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_completes() {
        let time = TokioTimeProvider::new();
        let result = time.timeout(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }
}
