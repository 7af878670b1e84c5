//! Exponential backoff with jitter for publish retries.

use std::time::Duration;

use lobbymatch_types::PublisherConfig;
use rand::Rng;

/// Delay schedule for failed publishes.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter_fraction: f64,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &PublisherConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial: config.initial_backoff(),
            max: config.max_backoff(),
            multiplier: config.backoff_multiplier,
            jitter_fraction: config.jitter_fraction,
        }
    }

    /// Whether another attempt is allowed after `attempts` have failed.
    #[must_use]
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Backoff after the `attempt`-th failure (1-based), before jitter.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.initial.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Backoff after the `attempt`-th failure, with up to
    /// `jitter_fraction` of the base delay added at random.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter_range_ms = (base.as_millis() as f64 * self.jitter_fraction) as u64;
        if jitter_range_ms == 0 {
            return base;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=jitter_range_ms);
        base + Duration::from_millis(jitter_ms)
    }
}
