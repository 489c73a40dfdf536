//! Retry policy with exponential backoff.

use std::time::Duration;

use geozip_shared::RetryConfig;

/// How many times a lookup is attempted and how long to wait in between.
///
/// The delay before retry `n` (1-based) is `backoff_base * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.backoff_base_ms),
        )
    }
}

impl RetryPolicy {
    /// A policy with at least one attempt.
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Total attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the first retry.
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    /// Delay to sleep before retry number `retry` (1-based).
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}
