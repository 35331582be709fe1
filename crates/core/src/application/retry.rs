// Retry budget and decision logic
use crate::application::classify::ErrorClass;
use crate::application::constants::{
    EXECUTE_FIRST_RETRY_DELAY, EXECUTE_MAX_ATTEMPTS, QUERY_FIRST_RETRY_DELAY, QUERY_MAX_ATTEMPTS,
};
use std::time::Duration;

/// How the inter-attempt delay grows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffShape {
    /// Same delay before every retry
    Stable,
    /// Delay grows with the attempt index: first, 2×first, 3×first, ...
    LinearIncrease,
}

/// What the retry loop does after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Wait `delay`, then attempt again on the same handle
    Retry { delay: Duration },
    /// Replace the underlying handle, wait `delay`, then attempt again
    RecoverThenRetry { delay: Duration },
    /// Replace the underlying handle, then surface the error (budget spent)
    RecoverThenFail,
    /// Stop and surface the error
    Fail,
}

/// Immutable retry budget
///
/// Decides what to do with a classified failure. The policy itself has no
/// side effects: recovery is performed by the connection that owns the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    first_delay: Duration,
    backoff: BackoffShape,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `max_attempts` - Total attempts including the first (at least 1)
    /// * `first_delay` - Delay after the first failed attempt
    /// * `backoff` - Growth of the delay for later attempts
    pub fn new(max_attempts: u32, first_delay: Duration, backoff: BackoffShape) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            first_delay,
            backoff,
        }
    }

    /// 10 attempts, 1s apart
    pub fn query_default() -> Self {
        Self::new(QUERY_MAX_ATTEMPTS, QUERY_FIRST_RETRY_DELAY, BackoffShape::Stable)
    }

    /// 10 attempts, 2s, 4s, 6s, ... apart
    pub fn execute_default() -> Self {
        Self::new(
            EXECUTE_MAX_ATTEMPTS,
            EXECUTE_FIRST_RETRY_DELAY,
            BackoffShape::LinearIncrease,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn first_delay(&self) -> Duration {
        self.first_delay
    }

    pub fn backoff(&self) -> BackoffShape {
        self.backoff
    }

    /// Delay to wait after failed attempt `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffShape::Stable => self.first_delay,
            BackoffShape::LinearIncrease => self.first_delay.saturating_mul(attempt + 1),
        }
    }

    /// Whether another attempt may follow attempt `attempt` (0-based)
    pub fn has_budget(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Decide what follows a failed attempt
    ///
    /// Returns:
    /// - `RecoverThenRetry` for a lost connection while budget remains
    /// - `RecoverThenFail` for a lost connection once the budget is spent
    /// - `Retry` for a transient statement error while budget remains
    /// - `Fail` for fatal or idempotent outcomes, and retryable ones out of budget
    pub fn decide(&self, attempt: u32, class: ErrorClass) -> RetryAction {
        let budget = self.has_budget(attempt);
        match class {
            ErrorClass::ConnectionLost if budget => RetryAction::RecoverThenRetry {
                delay: self.delay_for(attempt),
            },
            ErrorClass::ConnectionLost => RetryAction::RecoverThenFail,
            ErrorClass::Retryable if budget => RetryAction::Retry {
                delay: self.delay_for(attempt),
            },
            ErrorClass::Retryable | ErrorClass::Fatal | ErrorClass::Idempotent(_) => {
                RetryAction::Fail
            }
        }
    }
}
