//! Hermeticity and resource-limit violations observed during execution.

use std::path::PathBuf;

/// The kind of hermeticity breach observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationType {
    /// A path outside the declared output set was written.
    FilesystemWrite,
    /// A path in the declared output set was never produced.
    MissingDeclaredOutput,
}

/// One observed breach of the sandbox contract.
#[derive(Debug, Clone)]
pub struct SandboxViolation {
    pub violation_type: ViolationType,
    pub attempted_path: Option<PathBuf>,
    pub command: String,
    pub pid: Option<u32>,
    pub message: String,
}

impl std::fmt::Display for SandboxViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.violation_type, self.message)
    }
}

/// A resource ceiling exceeded during execution.
#[derive(Debug, Clone)]
pub struct ResourceViolation {
    pub resource: ResourceKind,
    pub limit: u64,
    pub actual: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Memory,
    CpuTime,
    Processes,
    DiskIo,
    NetworkIo,
}

impl std::fmt::Display for ResourceViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} limit exceeded: {} > {}", self.resource, self.actual, self.limit)
    }
}
