//! Retry policy for the request pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::ClientError;

/// How many attempts to make and how to pace them.
///
/// The default makes zero attempts: callers that want a request to go out must
/// configure `max_attempts >= 1`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryPolicy {
    /// Upper bound on attempts. Zero means nothing is sent.
    pub max_attempts: usize,
    /// Delay between attempts. `None` retries back to back.
    pub backoff: Option<Backoff>,
    /// Stop early on errors that [`ClientError::is_retryable`] rejects.
    /// When false every failure is retried the same way.
    pub classify: bool,
}

impl RetryPolicy {
    /// Uniform back-to-back retries, up to `max_attempts` attempts.
    pub fn attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn classified(mut self) -> Self {
        self.classify = true;
        self
    }

    /// Whether the loop should go on after `error` on attempt `attempt` (1-based).
    pub(crate) fn should_retry(&self, attempt: usize, error: &ClientError) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        !self.classify || error.is_retryable()
    }

    /// Delay to wait after the failed attempt `attempt` (1-based).
    pub(crate) fn delay_after(&self, attempt: usize) -> Option<Duration> {
        self.backoff.as_ref().map(|b| b.delay(attempt - 1))
    }
}

/// Exponential backoff: `initial * multiplier^n`, capped at `max`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Scale each delay by a factor in `[0.5, 1.0]`.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: usize) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let millis = (self.initial.as_millis() as f64 * self.multiplier.powi(exponent))
            .min(self.max.as_millis() as f64);
        let millis = if self.jitter {
            millis * jitter_factor()
        } else {
            millis
        };
        Duration::from_millis(millis as u64)
    }
}

/// Per-process draw counter mixed into every jitter factor.
static JITTER_DRAWS: AtomicU64 = AtomicU64::new(0);

/// A factor in `[0.5, 1.0)`.
fn jitter_factor() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    jitter_from(nanos, JITTER_DRAWS.fetch_add(1, Ordering::Relaxed))
}

/// Mixes the clock reading with the draw counter (splitmix64 finalizer) and
/// maps the result into `[0.5, 1.0)`.
fn jitter_from(nanos: u32, draw: u64) -> f64 {
    let mut z = u64::from(nanos) ^ draw.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    0.5 + (z % 1000) as f64 / 2000.0
}
