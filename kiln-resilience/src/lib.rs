//! Rate limiting, circuit breaking, and adaptive throttling around calls into
//! remote endpoints — principally the remote CAS client and REAPI adapter.
//! None of these guards touch the build graph or scheduler directly; they
//! exist entirely at the boundary where this process talks to the network.

mod adaptive;
mod breaker;
mod bucket;
mod limiter;
mod window;

pub use adaptive::AdaptiveRateController;
pub use breaker::{execute_with_retry, CircuitBreaker, ResilienceError, RetryPolicy, RetryableError};
pub use bucket::TokenBucket;
pub use limiter::{HierarchicalLimiter, HierarchicalLimiterConfig, Reputation};
pub use window::SlidingWindow;

/// A priority level above which a request bypasses queueing entirely as long
/// as its bucket still has tokens available — urgent work never waits behind
/// a full sliding window if it can be admitted outright.
pub const PRIORITY_BYPASS_THRESHOLD: u8 = 200;

/// Whether a request at `priority` should skip window-based queueing and go
/// straight to bucket admission.
pub fn bypasses_queue(priority: u8) -> bool {
    priority >= PRIORITY_BYPASS_THRESHOLD
}
