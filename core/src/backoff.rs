//! Reconnection backoff

use std::time::Duration;

/// Exponential reconnection backoff: base, 2*base, 4*base, ... capped at `max`
///
/// The delay depends only on the attempt counter, so the same attempt always
/// waits the same amount of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay for the zeroth attempt
    pub base: Duration,
    /// Upper bound for any delay
    pub max: Duration,
}

impl BackoffPolicy {
    /// Create a new policy. A `max` below `base` caps every attempt at `max`.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before reconnect attempt number `attempt`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max.as_millis()).unwrap_or(u64::MAX);
        // 2^63 already saturates any realistic base
        let factor = 2u64.saturating_pow(attempt.min(63));
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
        }
    }
}
