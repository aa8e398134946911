//! Retry policy for failed deliveries

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { next_attempt_at: DateTime<Utc> },
    GiveUp,
}

/// Fixed-delay retry with a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Decide what happens after `attempt_count` attempts have been made.
    ///
    /// Retries while `attempt_count < max_attempts`, so a post that always
    /// fails is attempted exactly `max_attempts` times. A retry that would
    /// land past the last representable time is a `GiveUp`.
    pub fn decide(&self, attempt_count: u32, now: DateTime<Utc>) -> RetryDecision {
        if attempt_count >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        chrono::Duration::from_std(self.base_delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay))
            .map_or(RetryDecision::GiveUp, |next_attempt_at| {
                RetryDecision::Retry { next_attempt_at }
            })
    }
}
