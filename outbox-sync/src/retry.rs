//! Exponential backoff between dispatch attempts.

use outbox_types::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff schedule: `base * multiplier^(retry_count - 1)`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    /// Values below 1.0 are treated as 1.0 so delays never shrink.
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, after `retry_count` failures so far.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let raw = self.base_delay_ms as f64 * factor;
        let cap = self.max_delay_ms as f64;
        let millis = if raw.is_finite() { raw.min(cap) } else { cap };
        Duration::from_millis(millis as u64)
    }

    /// When the next attempt may run.
    pub fn next_attempt_at(&self, now: Timestamp, retry_count: u32) -> Timestamp {
        now.saturating_add(self.delay_for(retry_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_retry_waits_base_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(5_000));
    }

    #[test]
    fn zero_retries_is_base_delay() {
        assert_eq!(RetryPolicy::default().delay_for(0), Duration::from_millis(5_000));
    }

    #[test]
    fn shrinking_multiplier_is_clamped() {
        let policy = RetryPolicy {
            base_delay_ms: 100,
            multiplier: 0.5,
            max_delay_ms: 1_000,
        };
        assert_eq!(policy.delay_for(4), Duration::from_millis(100));
    }

    #[test]
    fn huge_exponent_hits_cap() {
        assert_eq!(
            RetryPolicy::default().delay_for(u32::MAX),
            Duration::from_millis(60_000)
        );
    }
}
