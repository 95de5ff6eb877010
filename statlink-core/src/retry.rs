//! Bounded failure counting and the two backoff policies built on it
//!
//! The channel and the reporting scheduler each keep their own
//! [`RetryCounter`]. They share the exponential curve (`2^n` seconds) but cap
//! it differently:
//!
//! - reconnects are not clamped, so a dead server is retried at most every
//!   32s once the counter saturates
//! - reporting is clamped to the configured interval, so a struggling link
//!   slows ticks down to, and never past, the steady-state cadence

use std::time::Duration;

/// Highest value a [`RetryCounter`] reaches
pub const MAX_ATTEMPTS: u32 = 5;

/// Delay before the reconnect that follows a zero counter
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Failure counter in `0..=MAX_ATTEMPTS`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryCounter {
    attempts: u32,
}

impl RetryCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value
    pub fn get(&self) -> u32 {
        self.attempts
    }

    /// Record a failure. Saturates at [`MAX_ATTEMPTS`].
    pub fn increment(&mut self) {
        if self.attempts < MAX_ATTEMPTS {
            self.attempts += 1;
        }
    }

    /// Record a success
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

fn exponential(attempts: u32) -> Duration {
    Duration::from_millis(1000u64 << attempts.min(MAX_ATTEMPTS))
}

/// Delay before the next reconnect attempt: `2^n * 1000` ms for `n > 0`
pub fn reconnect_delay(attempts: u32) -> Duration {
    if attempts == 0 {
        return RECONNECT_BASE_DELAY;
    }
    exponential(attempts)
}

/// Delay before the next report tick: `min(2^n * 1000 ms, interval)` for
/// `n > 0`, and `interval` for `n == 0`
pub fn report_delay(attempts: u32, interval: Duration) -> Duration {
    if attempts == 0 {
        return interval;
    }
    exponential(attempts).min(interval)
}
