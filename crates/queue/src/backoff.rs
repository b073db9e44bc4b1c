//! Retry schedule for transient delivery failures.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Default attempt budget per entry.
pub const MAX_SEND_ATTEMPTS: u32 = 8;

// 2^32 minutes is several thousand years; larger exponents only overflow.
const MAX_EXPONENT: u32 = 32;

/// Exponential backoff: the n-th retry (0-based) waits `2^(n+1)` minutes.
///
/// One policy is shared by entry generation and the backoff path of a
/// [`crate::MailQueue`]; entries carry no override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Backoffs allowed before the entry must be finalized as an error.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_SEND_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Delay applied when backing off from `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_add(1).min(MAX_EXPONENT);
        Duration::minutes(1_i64 << exponent)
    }

    /// Next send date after backing off from `attempt`.
    pub fn next_send_date(&self, current: DateTime<Utc>, attempt: u32) -> DateTime<Utc> {
        current
            .checked_add_signed(self.delay_for_attempt(attempt))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn remaining_attempts(&self, attempt: u32) -> u32 {
        self.max_attempts.saturating_sub(attempt)
    }

    /// `MaxAttemptsExceeded` once the budget is spent.
    pub fn check(&self, attempt: u32) -> Result<(), QueueError> {
        if self.should_retry(attempt) {
            Ok(())
        } else {
            Err(QueueError::MaxAttemptsExceeded {
                attempts: attempt,
                max: self.max_attempts,
            })
        }
    }
}
