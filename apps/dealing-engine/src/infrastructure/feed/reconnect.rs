//! Reconnect backoff for the tick source adapters.
//!
//! Failed dials back off exponentially: the first retry waits the initial
//! delay, each later retry multiplies it, and no single wait exceeds the
//! configured ceiling. A successful connect starts the schedule over at the
//! initial delay.

use std::time::Duration;

use rand::Rng;

/// Reconnection tuning knobs.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Wait before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single wait.
    pub max_delay: Duration,
    /// Growth factor applied per failed attempt.
    pub multiplier: f64,
    /// Random spread applied to each wait (0.1 = within 10% either way).
    pub jitter_factor: f64,
    /// Retry budget; 0 removes the limit.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

/// Retry bookkeeping for a single adapter.
///
/// Every adapter carries its own policy, so one feed's outages never widen
/// another feed's waits.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Build a policy with no failed attempts recorded.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self { config, attempts: 0 }
    }

    /// Consume one attempt from the budget and return how long to wait
    /// before redialing, or `None` once the budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        let delay = self.delay_for_attempt(self.attempts);
        self.attempts += 1;
        Some(self.jittered(delay))
    }

    /// Forget past failures; the next wait is the initial delay again.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Failed attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Whether the budget allows another attempt.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempts < self.config.max_attempts
    }

    // Schedule computed in millisecond space and clamped to the ceiling
    // there, so large exponents cannot overflow Duration arithmetic.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let growth = self.config.multiplier.max(1.0);
        let factor = growth.powi(attempt.min(64) as i32);

        let millis = self.config.initial_delay.as_millis() as f64 * factor;
        let ceiling = self.config.max_delay.as_millis() as f64;
        Duration::from_millis(millis.min(ceiling) as u64)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let spread = delay.as_millis() as f64 * self.config.jitter_factor;
        if spread <= 0.0 {
            return delay;
        }

        let offset: f64 = rand::rng().random_range(-spread..=spread);
        Duration::from_millis((delay.as_millis() as f64 + offset).max(1.0) as u64)
    }
}
