//! Retry policy: decides backoff delays.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a cap and proportional jitter.
///
/// `delay_for(n) = min(max_delay, base_delay * 2^n) + jitter`, where jitter is
/// uniform in `[0, jitter_ratio * delay]`.
///
/// Example with the defaults (base 2s, cap 10min):
/// - attempt 1: 4s (+ up to 0.4s)
/// - attempt 2: 8s
/// - attempt 3: 16s
/// - attempt 9 and later: 10min
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the capped delay added as random jitter. Clamped to `[0, 1]`.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(600),
            jitter_ratio: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_ratio: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_ratio,
        }
    }

    /// Same curve, no randomness. Handy for deterministic tests.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_ratio = 0.0;
        self
    }

    /// Capped exponential delay before jitter.
    pub fn max_delay_for(&self, attempt_count: u32) -> Duration {
        // 2^31 * anything already overflows a realistic cap
        let factor = 2f64.powi(attempt_count.min(31) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        let cap = self.max_delay.as_secs_f64();
        Duration::try_from_secs_f64(secs.min(cap))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Delay to wait before the next attempt, jitter included.
    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        let unit = if self.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range(0.0..=1.0)
        } else {
            0.0
        };
        self.delay_with_unit(attempt_count, unit)
    }

    /// `unit` in `[0, 1]` picks where in the jitter window the delay lands.
    fn delay_with_unit(&self, attempt_count: u32, unit: f64) -> Duration {
        let delay = self.max_delay_for(attempt_count);
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        let jitter = delay.as_secs_f64() * ratio * unit.clamp(0.0, 1.0);
        let jitter = Duration::try_from_secs_f64(jitter).unwrap_or(Duration::ZERO);
        delay.saturating_add(jitter)
    }
}
