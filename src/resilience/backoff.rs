//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff schedule: `min(base * multiplier^exponent, max)`,
/// optionally stretched by up to 10% random jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
    pub jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            base,
            multiplier,
            max,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay for the given exponent, before jitter.
    pub fn raw_delay(&self, exponent: u32) -> Duration {
        let factor = self.multiplier.powi(exponent.min(i32::MAX as u32) as i32);
        let delay_secs = self.base.as_secs_f64() * factor;
        if !delay_secs.is_finite() || delay_secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(delay_secs)
    }

    /// Delay for the given exponent, jittered when enabled.
    pub fn delay(&self, exponent: u32) -> Duration {
        let capped = self.raw_delay(exponent);
        if self.jitter {
            add_jitter(capped)
        } else {
            capped
        }
    }
}

/// Stretch a delay by 0 to 10%.
pub fn add_jitter(delay: Duration) -> Duration {
    let jitter_range = delay.as_millis() as u64 / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };
    delay + Duration::from_millis(jitter)
}
