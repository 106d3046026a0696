//! Retry budget and backoff calculation.
//!
//! The async retry loop lives in `rowgen-engine`; this module holds the
//! portable pieces so the schedule can be checked without a runtime.

use std::time::Duration;

/// Default number of attempts per batch call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default backoff base.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Bounded retry schedule for one batch call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base,
        }
    }

    /// Build from a float number of seconds, as configured on the CLI.
    pub fn from_secs_f64(max_attempts: u32, backoff_secs: f64) -> Self {
        let backoff = if backoff_secs.is_finite() && backoff_secs > 0.0 {
            Duration::from_secs_f64(backoff_secs)
        } else {
            Duration::ZERO
        };
        Self::new(max_attempts, backoff)
    }

    /// Wait after failed attempt `attempt` (0-based): `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
    }

    /// Whether another attempt is allowed after attempt `attempt` failed.
    pub fn has_next(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}
