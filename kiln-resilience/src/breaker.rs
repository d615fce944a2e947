//! Circuit breaker and its retry-with-backoff companion for calls into a
//! remote endpoint (the CAS HTTP client, principally). The retry shape —
//! bounded attempts, exponential backoff with a cap, per-outcome retry
//! eligibility — mirrors how this codebase's local action scheduler retries
//! failed actions; this version is async and wraps the call in a breaker so
//! a persistently failing endpoint stops being hammered.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Trips open after `failure_threshold` consecutive failures; after
/// `open_duration` it allows a bounded number of probe requests through
/// (`HalfOpen`); a probe success closes it, a probe failure reopens it.
pub struct CircuitBreaker {
    state: Mutex<CircuitState>,
    opened_at: Mutex<Option<Instant>>,
    consecutive_failures: AtomicU32,
    failure_threshold: u32,
    open_duration: Duration,
    half_open_probes_in_flight: AtomicU32,
    half_open_max_probes: u32,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_duration: Duration, half_open_max_probes: u32) -> Self {
        Self {
            state: Mutex::new(CircuitState::Closed),
            opened_at: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
            failure_threshold,
            open_duration,
            half_open_probes_in_flight: AtomicU32::new(0),
            half_open_max_probes,
        }
    }

    /// Whether a new call may proceed right now.
    pub fn allow_request(&self) -> bool {
        let mut state = self.state.lock().expect("breaker state poisoned");
        match *state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let opened_at = self.opened_at.lock().expect("breaker opened_at poisoned");
                if opened_at.map(|t| t.elapsed() >= self.open_duration).unwrap_or(false) {
                    *state = CircuitState::HalfOpen;
                    self.half_open_probes_in_flight.store(0, Ordering::Release);
                    drop(opened_at);
                    self.try_reserve_probe()
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self.try_reserve_probe(),
        }
    }

    fn try_reserve_probe(&self) -> bool {
        let reserved = self.half_open_probes_in_flight.fetch_add(1, Ordering::AcqRel);
        if reserved < self.half_open_max_probes {
            true
        } else {
            self.half_open_probes_in_flight.fetch_sub(1, Ordering::AcqRel);
            false
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        let mut state = self.state.lock().expect("breaker state poisoned");
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            *self.opened_at.lock().expect("breaker opened_at poisoned") = None;
        }
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().expect("breaker state poisoned");
        match *state {
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                *self.opened_at.lock().expect("breaker opened_at poisoned") = Some(Instant::now());
            }
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.failure_threshold {
                    *state = CircuitState::Open;
                    *self.opened_at.lock().expect("breaker opened_at poisoned") = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn is_open(&self) -> bool {
        *self.state.lock().expect("breaker state poisoned") == CircuitState::Open
    }
}

/// Bounded-attempt exponential backoff, shared by every retryable call this
/// crate makes into remote endpoints.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn backoff_duration(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let scaled = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi((attempt - 1) as i32);
        Duration::from_secs_f64(scaled.min(self.max_backoff.as_secs_f64()))
    }
}

/// Errors that can abort a retry loop before the wrapped operation even runs.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError<E> {
    #[error("circuit open, request not attempted")]
    CircuitOpen,
    #[error(transparent)]
    Inner(E),
}

/// Whether a particular error from the wrapped operation is worth retrying.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

/// Run `operation` under `policy` and `breaker`: each attempt first checks
/// the breaker, then runs the call, then reports the outcome back to the
/// breaker. Non-retryable errors and an exhausted attempt budget both end
/// the loop immediately.
pub async fn execute_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
    operation_name: &str,
    mut operation: F,
) -> Result<T, ResilienceError<E>>
where
    F: FnMut() -> Fut,
    E: RetryableError,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        if !breaker.allow_request() {
            tracing::warn!(operation = operation_name, "circuit open, refusing attempt {}", attempt + 1);
            return Err(ResilienceError::CircuitOpen);
        }

        if attempt > 0 {
            let backoff = policy.backoff_duration(attempt);
            tracing::debug!(operation = operation_name, attempt = attempt + 1, ?backoff, "retrying");
            tokio::time::sleep(backoff).await;
        }

        match operation().await {
            Ok(value) => {
                breaker.record_success();
                return Ok(value);
            }
            Err(error) => {
                breaker.record_failure();
                if !error.is_retryable() {
                    return Err(ResilienceError::Inner(error));
                }
                last_error = Some(error);
            }
        }
    }

    Err(ResilienceError::Inner(last_error.expect("loop ran at least once")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("flaky")]
    struct Flaky;
    impl RetryableError for Flaky {
        fn is_retryable(&self) -> bool {
            true
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("fatal")]
    struct Fatal;
    impl RetryableError for Fatal {
        fn is_retryable(&self) -> bool {
            false
        }
    }

    #[test]
    fn breaker_opens_after_threshold_and_blocks_requests() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60), 1);
        assert!(breaker.allow_request());
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(!breaker.allow_request());
    }

    #[test]
    fn breaker_half_opens_after_cooldown_and_closes_on_success() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(10), 1);
        breaker.record_failure();
        assert!(!breaker.allow_request());
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow_request());
        breaker.record_success();
        assert!(!breaker.is_open());
        assert!(breaker.allow_request());
    }

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy { initial_backoff: Duration::from_millis(1), ..Default::default() };
        let breaker = CircuitBreaker::new(100, Duration::from_secs(60), 10);
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<u32, ResilienceError<Flaky>> = execute_with_retry(&policy, &breaker, "test", || {
            let attempts = attempts_clone.clone();
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 1 {
                    Err(Flaky)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn non_retryable_errors_abort_immediately() {
        let policy = RetryPolicy::default();
        let breaker = CircuitBreaker::new(100, Duration::from_secs(60), 10);
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<u32, ResilienceError<Fatal>> = execute_with_retry(&policy, &breaker, "test", || {
            let attempts = attempts_clone.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(Fatal)
            }
        })
        .await;

        assert!(matches!(result, Err(ResilienceError::Inner(Fatal))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
