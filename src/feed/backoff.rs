//! Bounded exponential reconnect backoff

use std::time::Duration;

use ::backoff::backoff::Backoff as BackoffPolicy;
use ::backoff::ExponentialBackoff;

/// Reconnect delay: starts at `min`, doubles, saturates at `max`. Never gives up.
pub struct Backoff {
    policy: ExponentialBackoff,
    max: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        let policy = ExponentialBackoff {
            initial_interval: min,
            current_interval: min,
            max_interval: max,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        Self { policy, max }
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        self.policy.next_backoff().unwrap_or(self.max)
    }

    /// Back to `min` after a successful connect
    pub fn reset(&mut self) {
        self.policy.reset();
    }
}
