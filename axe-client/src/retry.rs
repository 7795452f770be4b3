//! Exponential backoff for transient API failures.

use std::time::Duration;

/// Retry configuration applied around the full request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each attempt.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(1u32 << attempt.min(16))
    }

    /// Whether an HTTP status warrants a retry.
    pub fn retryable_status(&self, status: u16) -> bool {
        matches!(status, 429 | 500 | 529)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_two_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(8));
    }

    #[test]
    fn status_filter() {
        let policy = RetryPolicy::default();
        assert!(policy.retryable_status(429));
        assert!(policy.retryable_status(500));
        assert!(policy.retryable_status(529));
        assert!(!policy.retryable_status(200));
        assert!(!policy.retryable_status(401));
        assert!(!policy.retryable_status(502));
    }
}
