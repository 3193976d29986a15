//! Reconnect scheduling.

use std::time::Duration;

use tether_core::RandomProvider;

use crate::config::ClientConfig;

/// A scheduled reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    /// Attempt number within the current exponential run (0 in fixed mode).
    pub attempt: u32,
    /// Delay before the attempt, jitter included.
    pub delay: Duration,
    /// Whether exponential backoff was exhausted.
    pub fixed_interval: bool,
}

/// Exponential backoff with jitter, falling back to fixed-interval retries.
///
/// Each failure bumps the attempt counter and yields
/// `min(base * 2^(attempt - 1), max) + jitter`. Once the counter passes
/// `max_attempts` the policy switches to `fallback_interval + jitter` and
/// resets the counter, so that after the next successful connection a
/// failure starts again from `base`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    jitter: Duration,
    max_attempts: u32,
    fallback_interval: Duration,
    attempt: u32,
    fixed_mode: bool,
}

impl ReconnectPolicy {
    /// Build a policy from the client configuration.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            base: config.base_reconnect_delay,
            max: config.max_reconnect_delay,
            jitter: config.reconnect_jitter,
            max_attempts: config.max_reconnect_attempts,
            fallback_interval: config.fallback_retry_interval,
            attempt: 0,
            fixed_mode: false,
        }
    }

    /// Current attempt counter.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether fixed-interval retry is in use.
    pub fn is_fixed_mode(&self) -> bool {
        self.fixed_mode
    }

    /// Reset after a successful connection.
    pub fn on_connected(&mut self) {
        self.attempt = 0;
        self.fixed_mode = false;
    }

    /// Schedule the next attempt using `random` for jitter.
    pub fn next_retry<R: RandomProvider>(&mut self, random: &R) -> ScheduledRetry {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(random.random_range(0..jitter_ms))
        };
        self.next_retry_with_jitter(jitter)
    }

    /// Schedule the next attempt with an explicit jitter amount.
    pub fn next_retry_with_jitter(&mut self, jitter: Duration) -> ScheduledRetry {
        self.attempt = self.attempt.saturating_add(1);

        if self.fixed_mode || self.attempt > self.max_attempts {
            if !self.fixed_mode {
                tracing::warn!(
                    "Reconnect attempts exhausted after {}, retrying every {:?}",
                    self.max_attempts,
                    self.fallback_interval
                );
            }
            self.fixed_mode = true;
            self.attempt = 0;
            return ScheduledRetry {
                attempt: 0,
                delay: self.fallback_interval + jitter,
                fixed_interval: true,
            };
        }

        let exponent = (self.attempt - 1).min(31);
        let delay = self
            .base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max));

        ScheduledRetry {
            attempt: self.attempt,
            delay: delay + jitter,
            fixed_interval: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::TokioRandomProvider;

    fn policy(base_ms: u64, max_ms: u64, attempts: u32) -> ReconnectPolicy {
        let config = ClientConfig::default()
            .with_backoff(
                Duration::from_millis(base_ms),
                Duration::from_millis(max_ms),
                Duration::ZERO,
            )
            .with_retry_limit(attempts, Duration::from_secs(30));
        ReconnectPolicy::from_config(&config)
    }

    fn delays(policy: &mut ReconnectPolicy, n: usize) -> Vec<u64> {
        (0..n)
            .map(|_| policy.next_retry_with_jitter(Duration::ZERO).delay.as_millis() as u64)
            .collect()
    }

    #[test]
    fn test_exponential_then_capped() {
        let mut p = policy(500, 5000, 10);
        assert_eq!(delays(&mut p, 5), vec![500, 1000, 2000, 4000, 5000]);
    }

    #[test]
    fn test_fixed_mode_after_exhaustion() {
        let mut p = policy(100, 1000, 3);
        assert_eq!(delays(&mut p, 3), vec![100, 200, 400]);

        let retry = p.next_retry_with_jitter(Duration::ZERO);
        assert!(retry.fixed_interval);
        assert_eq!(retry.delay, Duration::from_secs(30));
        assert_eq!(p.attempt(), 0);

        // Stays in fixed mode until a connection succeeds.
        assert!(p.next_retry_with_jitter(Duration::ZERO).fixed_interval);

        p.on_connected();
        assert!(!p.is_fixed_mode());
        assert_eq!(delays(&mut p, 2), vec![100, 200]);
    }

    #[test]
    fn test_success_resets_backoff() {
        let mut p = policy(100, 10_000, 10);
        delays(&mut p, 4);
        p.on_connected();
        assert_eq!(p.next_retry_with_jitter(Duration::ZERO).delay, Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_span() {
        let config = ClientConfig::default().with_backoff(
            Duration::from_millis(100),
            Duration::from_millis(100),
            Duration::from_millis(50),
        );
        let random = TokioRandomProvider::new();
        for _ in 0..100 {
            let mut p = ReconnectPolicy::from_config(&config);
            let delay = p.next_retry(&random).delay;
            assert!(delay >= Duration::from_millis(100) && delay < Duration::from_millis(150));
        }
    }

    #[test]
    fn test_huge_attempt_counts_do_not_overflow() {
        let mut p = policy(1000, 30_000, u32::MAX);
        let last = delays(&mut p, 64).pop();
        assert_eq!(last, Some(30_000));
    }
}
