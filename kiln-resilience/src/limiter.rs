//! Hierarchical admission control: a request must clear the global bucket,
//! then its per-IP bucket, then (if present) its per-token bucket. Per-IP and
//! per-token buckets are created lazily on first sight and scaled by a
//! reputation score tracked alongside each one.

use crate::bucket::TokenBucket;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Tracks successes/failures for one caller and derives a [0.5, 1.0]
/// admission multiplier from them — a caller with a clean record gets full
/// throughput, one that fails half its calls is throttled to half.
#[derive(Default)]
pub struct Reputation {
    successes: AtomicU64,
    failures: AtomicU64,
}

impl Reputation {
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn score(&self) -> f64 {
        let s = self.successes.load(Ordering::Relaxed) as f64;
        let f = self.failures.load(Ordering::Relaxed) as f64;
        if s + f == 0.0 {
            1.0
        } else {
            s / (s + f)
        }
    }

    /// Rescale the [0, 1] score into [0.5, 1.0] — even a caller with a
    /// terrible record keeps half its admission rate, it is never fully
    /// locked out by reputation alone.
    pub fn multiplier(&self) -> f64 {
        0.5 + 0.5 * self.score()
    }
}

struct Quota {
    bucket: TokenBucket,
    reputation: Reputation,
}

pub struct HierarchicalLimiterConfig {
    pub global_capacity: u64,
    pub global_refill_per_second: f64,
    pub per_ip_capacity: u64,
    pub per_ip_refill_per_second: f64,
    pub per_token_capacity: u64,
    pub per_token_refill_per_second: f64,
}

pub struct HierarchicalLimiter {
    global: TokenBucket,
    per_ip: Mutex<HashMap<IpAddr, Quota>>,
    per_token: Mutex<HashMap<String, Quota>>,
    config: HierarchicalLimiterConfig,
}

impl HierarchicalLimiter {
    pub fn new(config: HierarchicalLimiterConfig) -> Self {
        Self {
            global: TokenBucket::new(config.global_capacity, config.global_refill_per_second),
            per_ip: Mutex::new(HashMap::new()),
            per_token: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Admits iff the global bucket, the caller's per-IP bucket, and (when
    /// `token` is given) its per-token bucket all admit.
    pub fn admit(&self, ip: IpAddr, token: Option<&str>, cost: u64) -> bool {
        if !self.global.try_consume(cost) {
            return false;
        }

        let ip_admitted = {
            let mut buckets = self.per_ip.lock().expect("per-ip map poisoned");
            let quota = buckets.entry(ip).or_insert_with(|| Quota {
                bucket: TokenBucket::new(self.config.per_ip_capacity, self.config.per_ip_refill_per_second),
                reputation: Reputation::default(),
            });
            quota.bucket.try_consume_scaled(cost, quota.reputation.multiplier())
        };
        if !ip_admitted {
            return false;
        }

        if let Some(token) = token {
            let mut buckets = self.per_token.lock().expect("per-token map poisoned");
            let quota = buckets.entry(token.to_string()).or_insert_with(|| Quota {
                bucket: TokenBucket::new(self.config.per_token_capacity, self.config.per_token_refill_per_second),
                reputation: Reputation::default(),
            });
            if !quota.bucket.try_consume_scaled(cost, quota.reputation.multiplier()) {
                return false;
            }
        }

        true
    }

    /// Feed the outcome of a call back into reputation tracking, creating the
    /// per-IP/per-token quota if this is the first time either is seen.
    pub fn record_outcome(&self, ip: IpAddr, token: Option<&str>, success: bool) {
        let mut ip_buckets = self.per_ip.lock().expect("per-ip map poisoned");
        let quota = ip_buckets.entry(ip).or_insert_with(|| Quota {
            bucket: TokenBucket::new(self.config.per_ip_capacity, self.config.per_ip_refill_per_second),
            reputation: Reputation::default(),
        });
        if success {
            quota.reputation.record_success();
        } else {
            quota.reputation.record_failure();
        }
        drop(ip_buckets);

        if let Some(token) = token {
            let mut token_buckets = self.per_token.lock().expect("per-token map poisoned");
            let quota = token_buckets.entry(token.to_string()).or_insert_with(|| Quota {
                bucket: TokenBucket::new(self.config.per_token_capacity, self.config.per_token_refill_per_second),
                reputation: Reputation::default(),
            });
            if success {
                quota.reputation.record_success();
            } else {
                quota.reputation.record_failure();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HierarchicalLimiterConfig {
        HierarchicalLimiterConfig {
            global_capacity: 100,
            global_refill_per_second: 0.0,
            per_ip_capacity: 10,
            per_ip_refill_per_second: 0.0,
            per_token_capacity: 5,
            per_token_refill_per_second: 0.0,
        }
    }

    #[test]
    fn per_ip_bucket_exhausts_independently_of_global() {
        let limiter = HierarchicalLimiter::new(config());
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        for _ in 0..10 {
            assert!(limiter.admit(ip, None, 1));
        }
        assert!(!limiter.admit(ip, None, 1));

        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limiter.admit(other, None, 1));
    }

    #[test]
    fn per_token_bucket_is_the_tightest_constraint_when_present() {
        let limiter = HierarchicalLimiter::new(config());
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        for _ in 0..5 {
            assert!(limiter.admit(ip, Some("tok"), 1));
        }
        assert!(!limiter.admit(ip, Some("tok"), 1));
    }

    #[test]
    fn poor_reputation_halves_effective_throughput() {
        let limiter = HierarchicalLimiter::new(config());
        let ip: IpAddr = "10.0.0.3".parse().unwrap();
        for _ in 0..20 {
            limiter.record_outcome(ip, None, false);
        }
        // Reputation multiplier bottoms out at 0.5, so a capacity-10 bucket
        // admits roughly 5 cost-1 requests before exhausting.
        let admitted = (0..10).filter(|_| limiter.admit(ip, None, 1)).count();
        assert!(admitted <= 6);
    }
}
