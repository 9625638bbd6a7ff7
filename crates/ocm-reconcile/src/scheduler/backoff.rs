//! Per-key exponential backoff for failed reconciles

use std::time::Duration;

/// Exponential backoff without jitter
///
/// The n-th consecutive failure of a key waits `base * multiplier^(n-1)`,
/// capped at `max_delay`.
#[derive(Clone, Debug)]
pub struct Backoff {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor per consecutive failure
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Backoff with the given base and cap, doubling per failure
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            ..Default::default()
        }
    }

    /// Delay before retrying after `failures` consecutive failures
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(failures - 1).unwrap_or(i32::MAX);
        let nanos = self.base_delay.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos as u64)
    }
}
