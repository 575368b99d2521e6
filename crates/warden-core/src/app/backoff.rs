//! Backoff policy for registry retries.

use std::time::Duration;

use rand::Rng;

use crate::config::MembershipConfig;

/// Exponential backoff with an upper bound and optional full jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    pub multiplier: f64,

    pub max_delay: Duration,

    /// Randomize each delay in `[delay / 2, delay]`.
    pub jitter: bool,
}

impl BackoffPolicy {
    pub fn from_config(config: &MembershipConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.backoff_base_ms),
            multiplier: config.backoff_multiplier,
            max_delay: Duration::from_millis(config.backoff_max_ms),
            jitter: true,
        }
    }

    /// Delay before the next attempt.
    ///
    /// `attempts` is the number of attempts already made (1-indexed):
    /// `delay = min(base_delay * multiplier^(attempts - 1), max_delay)`.
    ///
    /// With base_delay=200ms, multiplier=2.0, max_delay=1s:
    /// - attempt 1: 200ms
    /// - attempt 2: 400ms
    /// - attempt 3: 800ms
    /// - attempt 4: 1s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let delay = Duration::from_secs_f64(capped.max(0.0));
        if self.jitter {
            jittered(delay)
        } else {
            delay
        }
    }
}

fn jittered(delay: Duration) -> Duration {
    let half = delay / 2;
    if half.is_zero() {
        return delay;
    }
    let extra = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
    half + Duration::from_millis(extra)
}
