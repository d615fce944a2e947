//! Kiln wires together this workspace's build-engine crates:
//!
//! - **kiln-graph**: the dependency DAG and per-target build state
//! - **kiln-scheduler**: priority ready-queue, retries, worker assignment
//! - **kiln-sandbox**: hermetic execution specs and resource limits
//! - **kiln-cache**: local fingerprint-keyed action cache
//! - **kiln-cas**: remote content-addressable blob storage
//! - **kiln-reapi**: REAPI-compatible adapter for handing actions to remote workers
//! - **kiln-resilience**: retry/circuit-breaking around the network boundary
//! - **kiln-verify**: acyclicity/hermeticity/determinism/race-freedom proofs
//!
//! ## Architecture
//!
//! Kiln does not reimplement any of these concerns itself; it owns none of
//! the graph, scheduling, caching, or sandboxing logic directly. It only
//! drives the crates above through one build: construct a graph, seed and
//! drain the scheduler, execute each ready action hermetically, record the
//! outcome in the local cache, then build a proof bundle over the finished
//! graph. See [`demo::run_sample_build`] for the end-to-end wiring.

pub use kiln_cache::{ActionCache, CacheEntry, CacheError, OutputFile};
pub use kiln_cas::{build_router as cas_router, BlobStore, CasClient, ServerConfig as CasServerConfig};
pub use kiln_graph::{BuildGraph, BuildStatus, Target, TargetId, TargetType, ValidationMode};
pub use kiln_hash::action::ActionInput;
pub use kiln_hash::{Action, Digest, Platform};
pub use kiln_reapi::{build_router as reapi_router, ActionExecutor, Capabilities, FixedExecutor};
pub use kiln_resilience::{CircuitBreaker, RetryPolicy as NetworkRetryPolicy, RetryableError};
pub use kiln_sandbox::{NetworkPolicy, ResourceLimits, SandboxSpec};
pub use kiln_scheduler::{FailureOutcome, Priority, RetryPolicy, Scheduler, WorkerId};
pub use kiln_verify::{AcyclicityProof, DeterminismProof, HermeticityProof, ProofBundle, RaceFreedomProof};

pub mod demo;
