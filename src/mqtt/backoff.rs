//! Exponential reconnect delay
//!
//! ```text
//! delay[n] = min(initial * multiplier^(n-1), max)
//! ```
//!
//! The bridge never gives up on the broker, so there is no attempt limit;
//! the delay simply saturates at `max` until a connection succeeds.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    initial_delay: Duration,
    current_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay: initial,
            current_delay: initial.min(max),
            max_delay: max,
            multiplier,
            attempt: 0,
        }
    }

    /// Returns the delay before the next attempt and advances the schedule
    pub fn next_sleep(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let sleep = self.current_delay;

        let next = self.current_delay.as_secs_f64() * self.multiplier.max(1.0);
        self.current_delay = Duration::from_secs_f64(next).min(self.max_delay);

        sleep
    }

    /// Call after a successful connection
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay.min(self.max_delay);
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60), 2.0)
    }
}
