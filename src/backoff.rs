//! Reconnection backoff policy.
//!
//! Pure delay computation: exponential growth from a base delay, capped at a
//! maximum, plus uniform random jitter so that many clients dropped by the
//! same outage do not reconnect in lockstep.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with a ceiling and uniform jitter.
///
/// The deterministic component is monotonically non-decreasing in the
/// attempt number and bounded by `max`; [`next_delay`](Self::next_delay)
/// adds a random offset in `[0, jitter]`, so the total is always bounded by
/// `max + jitter`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay for attempt 0.
    pub base: Duration,
    /// Growth factor per attempt. Values below 1.0 are treated as 1.0.
    pub multiplier: f64,
    /// Ceiling for the deterministic component.
    pub max: Duration,
    /// Upper bound of the uniform jitter added on top.
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            multiplier: 2.0,
            max: Duration::from_millis(30_000),
            jitter: Duration::from_millis(250),
        }
    }
}

impl BackoffPolicy {
    /// The deterministic (jitter-free) delay for a given attempt.
    ///
    /// Saturates rather than overflowing for large attempt numbers.
    pub fn deterministic_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        // f64 -> u64 casts saturate, so even absurd attempt counts stay sane.
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let ms = (base_ms as f64 * factor) as u64;
        Duration::from_millis(ms.min(max_ms))
    }

    /// The delay to wait before the given reconnect attempt, with jitter.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let det = self.deterministic_delay(attempt);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return det;
        }
        det + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}
