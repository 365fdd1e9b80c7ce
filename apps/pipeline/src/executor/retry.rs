use std::time::Duration;

use rand::Rng;

/// Attempt budget and backoff curve for one service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per candidate per stage, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Fraction of the delay that is randomized, 0–1.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Exponential delay before attempt `attempt + 1`, capped at `max_backoff`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let millis = (self.initial_backoff.as_millis() as u64).saturating_mul(1_u64 << exponent);
        Duration::from_millis(millis).min(self.max_backoff)
    }

    /// `base_delay` with symmetric jitter applied, never above `max_backoff`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor).min(self.max_backoff)
    }

    /// Whether a candidate with `attempts` already spent may try again.
    pub fn has_budget(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
