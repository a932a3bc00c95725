//! Retry policy for per-recipient sends.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How many times a send is attempted and how long to wait between failures.
///
/// With `backoff_factor == 1` every gap is exactly `delay_ms`. Larger factors
/// grow the gap geometrically up to `max_delay_ms`. There is no jitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per dispatch, including the first (0 is treated as 1)
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub backoff_factor: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            backoff_factor: 1,
            max_delay_ms: 1000,
        }
    }
}

impl From<&super::EngineConfig> for RetryPolicy {
    fn from(config: &super::EngineConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            delay_ms: config.retry_delay_ms,
            backoff_factor: config.backoff_factor,
            max_delay_ms: config.max_retry_delay_ms,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Gap to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = self
            .delay_ms
            .saturating_mul(self.backoff_factor.max(1).saturating_pow(exponent));
        // A cap below the base delay would shrink the fixed gap, keep the base
        Duration::from_millis(delay.min(self.max_delay_ms.max(self.delay_ms)))
    }
}
