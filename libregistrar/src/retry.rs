//! Bounded exponential backoff for conflicting node updates.

use std::time::Duration;

use rand::Rng;

/// Retry budget applied when a conditional write hits a version conflict.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Growth factor applied to the delay after every attempt.
    pub factor: f64,
    /// Upper bound for any single delay, before jitter.
    pub max_backoff: Duration,
    /// Fraction of the delay added as random jitter, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_millis(10),
            factor: 2.0,
            max_backoff: Duration::from_secs(1),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Effective attempt budget.
    pub fn budget(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Delay to wait after `attempt` (1-based) failed, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.initial_backoff.as_nanos() as f64 * self.factor.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_backoff.as_nanos() as f64);
        if capped.is_finite() && capped > 0.0 {
            Duration::from_nanos(capped.round() as u64)
        } else {
            Duration::ZERO
        }
    }

    /// Delay to wait after `attempt` (1-based) failed, with jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        base.mul_f64(1.0 + rand::rng().random_range(0.0..=jitter))
    }
}
