//! Exponential backoff with multiplicative jitter.
//!
//!   backoff(n) = INITIAL_DELAY                              for n <= 0
//!              = min(INITIAL_DELAY * 2^n, MAX_DELAY) * (1 + u)  otherwise,
//!                u ~ Uniform[-JITTER, +JITTER]
//!
//! A suspended record becomes eligible once `now > last_attempt + backoff`.
//! Exactly equal is not eligible.

use crate::{
    clock::Clock,
    config::RetryConfig,
    rng::SeededRng,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

pub const INITIAL_DELAY_SECS: i64 = 30;
pub const MAX_DELAY_SECS: i64 = 30 * 60;
pub const JITTER_PERCENT: f64 = 0.2;
pub const MAX_RETRIES: u32 = 5;

pub struct RetryPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    jitter_pct: f64,
    max_retries: u32,
    clock: Arc<dyn Clock>,
    rng: SeededRng,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig, clock: Arc<dyn Clock>, rng: SeededRng) -> Self {
        Self {
            initial_delay: Duration::seconds(config.initial_delay_secs),
            max_delay: Duration::seconds(config.max_delay_secs),
            jitter_pct: config.jitter_pct,
            max_retries: config.max_retries,
            clock,
            rng,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn calculate_backoff(&self, retry_count: i64) -> Duration {
        if retry_count <= 0 {
            return self.initial_delay;
        }
        self.jittered(self.base_delay(retry_count))
    }

    /// Unjittered delay: doubling per retry, capped at the max delay.
    pub fn base_delay(&self, retry_count: i64) -> Duration {
        if retry_count <= 0 {
            return self.initial_delay;
        }
        let initial_ms = self.initial_delay.num_milliseconds();
        let max_ms = self.max_delay.num_milliseconds();
        // Shift is clamped; the cap applies long before 2^62.
        let factor = 1i64.checked_shl(retry_count.min(62) as u32).unwrap_or(i64::MAX);
        let delay_ms = initial_ms.saturating_mul(factor).min(max_ms);
        Duration::milliseconds(delay_ms)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_pct <= 0.0 {
            return delay;
        }
        let factor = 1.0 + self.rng.symmetric(self.jitter_pct);
        Duration::milliseconds((delay.num_milliseconds() as f64 * factor).round() as i64)
    }

    pub fn next_retry_time(&self, retry_count: i64) -> DateTime<Utc> {
        self.clock.now() + self.calculate_backoff(retry_count)
    }

    pub fn is_retry_eligible(&self, last_attempt: DateTime<Utc>, retry_count: i64) -> bool {
        self.clock.now() > last_attempt + self.calculate_backoff(retry_count)
    }
}
