//! Capped exponential reconnect backoff.
//!
//! The Nth consecutive retry waits `min(initial * multiplier^(N-1), max)`.
//! A successful handshake resets the sequence.

use std::time::Duration;

/// Delay before the first retry.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(2000);

/// Growth factor between consecutive retries.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Upper bound on any retry delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial: Duration,
    /// Growth factor, at least 1.0
    pub multiplier: f64,
    /// Cap
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max: DEFAULT_MAX_DELAY,
        }
    }
}

impl BackoffPolicy {
    /// Delay for the given 1-based attempt, rounded to whole milliseconds.
    ///
    /// Attempt 0 is treated as attempt 1.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let max_ms = self.max.as_secs_f64() * 1000.0;
        let raw_ms = self.initial.as_secs_f64() * 1000.0 * self.multiplier.powi(exponent);

        let ms = if raw_ms.is_finite() { raw_ms.min(max_ms) } else { max_ms };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(ms.round().max(0.0) as u64)
    }
}

/// Retry counter over a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    /// Fresh sequence; the next delay is `policy.initial`.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Advance the sequence and return the delay for the new attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.policy.delay(self.attempt)
    }

    /// Restart from the initial delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Retries scheduled since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Parameters in use.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}
