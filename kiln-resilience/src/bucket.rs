//! Token bucket rate limiting. Refill and consumption are both lock-free: a
//! single `AtomicU64` holds tokens scaled by 1000 (to keep fractional refill
//! rates exact under integer CAS), refilled lazily against elapsed wall time
//! on every `try_consume` call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

const SCALE: u64 = 1000;

pub struct TokenBucket {
    max_tokens: u64,
    refill_rate_per_second: f64,
    tokens_scaled: AtomicU64,
    last_refill_ms: AtomicU64,
    created_at: Instant,
}

impl TokenBucket {
    pub fn new(max_tokens: u64, refill_rate_per_second: f64) -> Self {
        Self {
            max_tokens,
            refill_rate_per_second,
            tokens_scaled: AtomicU64::new(max_tokens * SCALE),
            last_refill_ms: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.created_at.elapsed().as_millis() as u64
    }

    /// Attempt to consume `n` tokens, refilling lazily first. A compare-and-swap
    /// retry loop: under contention a losing writer simply re-reads and retries
    /// rather than blocking.
    pub fn try_consume(&self, n: u64) -> bool {
        self.try_consume_scaled(n, 1.0)
    }

    /// Like `try_consume`, but `reputation_multiplier` (0.5..=1.0) scales the
    /// effective request cost — a caller with poor reputation is charged more
    /// tokens per request, so it is throttled harder without touching the
    /// bucket's base capacity.
    pub fn try_consume_scaled(&self, n: u64, reputation_multiplier: f64) -> bool {
        let effective_n = ((n as f64) / reputation_multiplier.max(0.01)).ceil() as u64;
        let need = effective_n.saturating_mul(SCALE);
        let max_scaled = self.max_tokens.saturating_mul(SCALE);

        loop {
            let now_ms = self.elapsed_ms();
            let last_ms = self.last_refill_ms.load(Ordering::Acquire);
            let current = self.tokens_scaled.load(Ordering::Acquire);

            let elapsed_secs = now_ms.saturating_sub(last_ms) as f64 / 1000.0;
            let refill = (elapsed_secs * self.refill_rate_per_second * SCALE as f64) as u64;
            let refilled = current.saturating_add(refill).min(max_scaled);

            if refilled < need {
                // Persist the refill even on a denial so the next attempt starts
                // from an up-to-date balance; a lost race here just means the
                // next caller recomputes it, which is harmless.
                let _ = self.tokens_scaled.compare_exchange(current, refilled, Ordering::AcqRel, Ordering::Acquire);
                let _ = self.last_refill_ms.compare_exchange(last_ms, now_ms, Ordering::AcqRel, Ordering::Acquire);
                return false;
            }

            let remaining = refilled - need;
            if self.tokens_scaled.compare_exchange(current, remaining, Ordering::AcqRel, Ordering::Acquire).is_ok() {
                let _ = self.last_refill_ms.compare_exchange(last_ms, now_ms, Ordering::AcqRel, Ordering::Acquire);
                return true;
            }
        }
    }

    pub fn available_tokens(&self) -> u64 {
        self.tokens_scaled.load(Ordering::Acquire) / SCALE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn consumes_up_to_capacity_then_denies() {
        let bucket = TokenBucket::new(10, 0.0);
        for _ in 0..10 {
            assert!(bucket.try_consume(1));
        }
        assert!(!bucket.try_consume(1));
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::new(10, 1000.0);
        assert!(bucket.try_consume(10));
        thread::sleep(Duration::from_millis(50));
        assert!(bucket.try_consume(1));
    }

    #[test]
    fn low_reputation_is_charged_more_per_request() {
        let bucket = TokenBucket::new(10, 0.0);
        assert!(bucket.try_consume_scaled(5, 0.5));
        assert_eq!(bucket.available_tokens(), 0);
    }

    #[test]
    fn concurrent_consumers_never_oversubscribe_capacity() {
        let bucket = std::sync::Arc::new(TokenBucket::new(100, 0.0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let bucket = bucket.clone();
                thread::spawn(move || (0..20).filter(|_| bucket.try_consume(1)).count())
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 100);
    }
}
