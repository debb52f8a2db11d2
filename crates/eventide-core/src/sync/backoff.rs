//! Retry policy with capped exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff and retry limits for queued mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay after the first failure (ms)
    pub base_delay_ms: u64,
    pub multiplier: u32,
    /// Upper bound for any single delay (ms)
    pub max_delay_ms: u64,
    /// Failures after which an item stops being retried automatically
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            multiplier: 2,
            max_delay_ms: 30_000,
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt of an item that had failed `retry_count` times
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = u64::from(self.multiplier).saturating_pow(retry_count);
        let delay = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Absolute time (Unix ms) of the next attempt
    #[must_use]
    pub fn next_retry_at(&self, retry_count: u32, now: i64) -> i64 {
        let delay = i64::try_from(self.delay_for(retry_count).as_millis()).unwrap_or(i64::MAX);
        now.saturating_add(delay)
    }

    #[must_use]
    pub const fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}
