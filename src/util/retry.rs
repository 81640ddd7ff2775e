//! Linear-backoff retry policy for outbound publishes.
//!
//! Publishing to the bus is the only place the orchestrator retries anything;
//! AI-level retries belong to the worker layer.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub(crate) max_attempts: usize,
    /// Backoff grows linearly: step, 2*step, 3*step, ...
    pub(crate) backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before the given attempt (0-based; the first attempt has
    /// no delay).
    pub(crate) fn delay_for_attempt(&self, attempt: usize) -> Duration {
        self.backoff_step.saturating_mul(attempt as u32)
    }

    pub(crate) const fn can_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_has_no_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(0));
    }

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn can_retry_respects_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.can_retry(0));
        assert!(policy.can_retry(2));
        assert!(!policy.can_retry(3));
    }
}
