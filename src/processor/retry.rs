//! Retry scheduling
//!
//! The delay is a fixed lookup on the message's processing counter, not a
//! formula: 1 → 5s, 2 → 25s, 3 → 125s, anything else → 5s.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default number of processing attempts before a transient failure is final
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const FALLBACK_DELAY: Duration = Duration::from_secs(5);

/// Delay before the next delivery, given the current processing counter
pub fn retry_delay(attempt: u32) -> Duration {
    match attempt {
        1 => Duration::from_secs(5),
        2 => Duration::from_secs(25),
        3 => Duration::from_secs(125),
        _ => FALLBACK_DELAY,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Reschedule {
        available_at: DateTime<Utc>,
        delay: Duration,
    },
    DeadLetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Counters strictly above this are dead-lettered
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn decide(&self, attempt: u32, now: DateTime<Utc>) -> RetryDecision {
        if attempt > self.max_attempts {
            return RetryDecision::DeadLetter;
        }

        let delay = retry_delay(attempt);
        // Table values are small, conversion cannot fail
        let step = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(5));
        RetryDecision::Reschedule {
            available_at: now + step,
            delay,
        }
    }
}
