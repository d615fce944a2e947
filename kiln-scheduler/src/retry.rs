//! Bounded retry with exponential backoff.

use std::time::Duration;

/// Whether a failure is eligible for retry. Hermeticity and resource
/// violations are never retried — retrying them cannot change the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    RateLimited,
    ExecutionTransient,
    SandboxViolation,
    ResourceViolation,
    ExecutionPermanent,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Network | FailureKind::RateLimited | FailureKind::ExecutionTransient)
    }
}

/// Exponential backoff with a cap, as attempts accumulate.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Backoff duration before attempt number `attempt` (1-indexed: the
    /// first retry is attempt 1).
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let scaled = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(scaled.min(self.max_backoff.as_secs_f64()))
    }

    /// Whether `attempt` (the attempt about to be made, 1-indexed) is still
    /// within the retry budget.
    pub fn should_attempt(&self, attempt: usize, failure: FailureKind) -> bool {
        failure.is_retryable() && attempt <= self.max_retries + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_then_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(500));
    }

    #[test]
    fn sandbox_violations_are_never_retryable() {
        assert!(!FailureKind::SandboxViolation.is_retryable());
        assert!(!FailureKind::ResourceViolation.is_retryable());
    }

    #[test]
    fn retry_budget_is_bounded() {
        let policy = RetryPolicy { max_retries: 3, ..Default::default() };
        assert!(policy.should_attempt(4, FailureKind::Network));
        assert!(!policy.should_attempt(5, FailureKind::Network));
    }
}
