//! Randomized pacing between dequeues

use rand::Rng;
use std::time::Duration;

/// Samples inter-fetch delays uniformly from `[0.5, 1.5] × base`
#[derive(Debug, Clone, Copy)]
pub struct RateLimiter {
    base_delay: Duration,
}

impl RateLimiter {
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// A fresh delay to wait before the next dequeue
    pub fn delay_before_next(&self) -> Duration {
        sample_delay(self.base_delay)
    }

    /// Sleeps for one freshly sampled delay; returns at once when the base is zero
    pub async fn wait(&self) {
        let delay = self.delay_before_next();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Draws one delay from `[0.5 × base, 1.5 × base]`
pub fn sample_delay(base: Duration) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    base.mul_f64(rand::rng().random_range(0.5..=1.5))
}
