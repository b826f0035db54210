//! Bounded exponential backoff for transport sessions.

use std::time::Duration;

/// Reconnection policy.
///
/// Attempt `n` (1-based) waits `base_delay * 2^(n-1)`. There is no jitter and
/// no cap other than the attempt budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    /// Create a new policy.
    ///
    /// # Arguments
    ///
    /// * `base_delay` - Delay before the first attempt
    /// * `max_attempts` - Attempts allowed before giving up
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt `attempt`, or `None` once the budget is spent.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2_u32.checked_pow(attempt - 1)?;
        self.base_delay.checked_mul(factor)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), 5)
    }
}

/// Tracks the attempts made since the last successful open.
#[derive(Debug)]
pub struct Supervisor {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl Supervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Called after a successful open.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Consume one attempt and return how long to wait before it.
    /// `None` means the budget is exhausted and the session must fail.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.policy.delay(self.attempts + 1)?;
        self.attempts += 1;
        Some(delay)
    }
}
