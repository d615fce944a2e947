//! Hermetic sandboxed execution of a single action.
//!
//! The core contract is `inputs ∩ outputs = ∅` ([`SandboxSpec`]), enforced
//! before any process is spawned; afterward the executor verifies every
//! declared output was produced and nothing undeclared was written. On
//! Linux, isolation is implemented with mount/PID/network namespaces and an
//! OverlayFS merge of declared input roots ([`linux::HermeticExecutor`]).
//! Resource accounting is platform-abstracted via [`ResourceMonitor`].

mod resource;
mod spec;
mod violation;

#[cfg(target_os = "linux")]
mod linux;

pub use resource::{PollingMonitor, ResourceMonitor, ResourceSnapshot};
pub use spec::{NetworkPolicy, OverlappingPathsError, ResourceLimits, SandboxSpec};
pub use violation::{ResourceKind, ResourceViolation, SandboxViolation, ViolationType};

#[cfg(target_os = "linux")]
pub use linux::{ExecutionOutcome, HermeticExecutor, SandboxError};

#[cfg(target_os = "linux")]
pub use resource::cgroups::CgroupMonitor;
