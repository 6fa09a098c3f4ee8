//! Retry policy: decides backoff delays between attempts.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter and an upper cap.
///
/// The delay for the n-th failed attempt is
/// `base * 2^(n-1)`, nudged by up to ±25% jitter and capped at `cap`.
/// With the defaults that is roughly 1s, 2s, 4s, 8s, 16s, 30s, 30s, ...
/// Jitter spreads out retries so a burst of failures does not come back as a
/// burst of retries; the cap bounds worst-case latency.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base: Duration,

    /// Upper bound on any computed delay.
    pub cap: Duration,
}

/// Jitter amplitude: computed delays are scaled by a factor in
/// [1 - JITTER/2, 1 + JITTER/2].
const JITTER: f64 = 0.5;

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next retry, given the number of failed attempts so
    /// far (1-indexed: pass 1 after the first failure).
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_ms = self.base.as_millis() as f64;
        let exponential = base_ms * 2f64.powi(attempts.saturating_sub(1).min(30) as i32);

        let jitter_factor = 1.0 + rand::thread_rng().gen_range(-JITTER / 2.0..=JITTER / 2.0);
        let capped = (exponential * jitter_factor).min(self.cap.as_millis() as f64);

        Duration::from_millis(capped as u64)
    }
}
