//! Builds a tamper-evident proof bundle for one build graph: a witness that
//! it is acyclic, that every target's declared action spec is hermetic, that
//! every target has a complete deterministic fingerprint, and that the
//! scheduler's concurrency model cannot race on it.

pub mod acyclicity;
pub mod bundle;
pub mod determinism;
pub mod error;
pub mod hermeticity;
pub mod race;

pub use acyclicity::AcyclicityProof;
pub use bundle::ProofBundle;
pub use determinism::DeterminismProof;
pub use error::VerifyError;
pub use hermeticity::{HermeticityProof, TargetHermeticity};
pub use race::RaceFreedomProof;
