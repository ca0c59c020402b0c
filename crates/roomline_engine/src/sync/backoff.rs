//! Backoff between failed sync requests.

use crate::config::RetryConfig;
use std::time::Duration;

/// Smallest delay handed out after a failure.
const MIN_DELAY: Duration = Duration::from_millis(1);

/// Delay sequence for consecutive failures.
///
/// Each delay is at least the previous one and at most `max_delay`, even
/// with jitter, and never zero. [`reset`](Backoff::reset) after a success.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
    last: Duration,
}

impl Backoff {
    /// Creates a backoff with no failures recorded.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempt: 0,
            last: Duration::ZERO,
        }
    }

    /// Records a failure and returns how long to wait.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let computed = self.config.delay_for_attempt(self.attempt);
        let delay = computed
            .max(self.last)
            .min(self.config.max_delay)
            .max(MIN_DELAY);
        self.last = delay;
        delay
    }

    /// Failures since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Forgets all failures.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last = Duration::ZERO;
    }
}
