//! The sandbox specification: what an action is allowed to touch, and how
//! much of the host's resources it may consume.

use std::collections::BTreeSet;
use std::path::PathBuf;

/// Resource ceilings enforced for one action's execution.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub max_memory_bytes: u64,
    pub max_cpu_time_ms: u64,
    pub max_processes: u32,
    pub max_file_size_bytes: u64,
    pub max_disk_io_bytes: u64,
    pub max_network_io_bytes: u64,
    pub cpu_shares: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 2 * 1024 * 1024 * 1024,
            max_cpu_time_ms: 5 * 60 * 1000,
            max_processes: 64,
            max_file_size_bytes: 1024 * 1024 * 1024,
            max_disk_io_bytes: 4 * 1024 * 1024 * 1024,
            max_network_io_bytes: 0,
            cpu_shares: 1024,
        }
    }
}

/// Whether a sandboxed action may reach the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkPolicy {
    Isolated,
    Allowed,
}

/// The declared contract for one sandboxed execution: what it may read,
/// what it must (only) write, and under what limits.
///
/// Invariant: `inputs ∩ outputs = ∅`. [`SandboxSpec::new`] enforces this at
/// construction time rather than leaving it to be discovered at execution
/// time.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub inputs: BTreeSet<PathBuf>,
    pub outputs: BTreeSet<PathBuf>,
    pub working_directory: PathBuf,
    pub env_allowlist: Vec<String>,
    pub resource_limits: ResourceLimits,
    pub network: NetworkPolicy,
}

/// Returned when a [`SandboxSpec`] would violate the `inputs ∩ outputs = ∅`
/// invariant.
#[derive(Debug, thiserror::Error)]
#[error("inputs and outputs overlap: {0:?}")]
pub struct OverlappingPathsError(pub Vec<PathBuf>);

impl SandboxSpec {
    pub fn new(
        inputs: BTreeSet<PathBuf>,
        outputs: BTreeSet<PathBuf>,
        working_directory: PathBuf,
        env_allowlist: Vec<String>,
        resource_limits: ResourceLimits,
        network: NetworkPolicy,
    ) -> Result<Self, OverlappingPathsError> {
        let overlap: Vec<PathBuf> = inputs.intersection(&outputs).cloned().collect();
        if !overlap.is_empty() {
            return Err(OverlappingPathsError(overlap));
        }
        Ok(Self {
            inputs,
            outputs,
            working_directory,
            env_allowlist,
            resource_limits,
            network,
        })
    }

    /// Filter an environment down to the allowlisted keys, normalizing
    /// `SOURCE_DATE_EPOCH` when the caller supplies one for determinism.
    pub fn filter_env(&self, ambient: &[(String, String)], source_date_epoch: Option<i64>) -> Vec<(String, String)> {
        let mut filtered: Vec<(String, String)> = ambient
            .iter()
            .filter(|(k, _)| self.env_allowlist.iter().any(|allowed| allowed == k))
            .cloned()
            .collect();
        if let Some(epoch) = source_date_epoch {
            filtered.retain(|(k, _)| k != "SOURCE_DATE_EPOCH");
            filtered.push(("SOURCE_DATE_EPOCH".to_string(), epoch.to_string()));
        }
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlapping_input_output() {
        let mut inputs = BTreeSet::new();
        inputs.insert(PathBuf::from("a.txt"));
        let mut outputs = BTreeSet::new();
        outputs.insert(PathBuf::from("a.txt"));
        let result = SandboxSpec::new(inputs, outputs, PathBuf::from("."), vec![], ResourceLimits::default(), NetworkPolicy::Isolated);
        assert!(result.is_err());
    }

    #[test]
    fn accepts_disjoint_input_output() {
        let mut inputs = BTreeSet::new();
        inputs.insert(PathBuf::from("a.c"));
        let mut outputs = BTreeSet::new();
        outputs.insert(PathBuf::from("a.o"));
        let result = SandboxSpec::new(inputs, outputs, PathBuf::from("."), vec![], ResourceLimits::default(), NetworkPolicy::Isolated);
        assert!(result.is_ok());
    }

    #[test]
    fn filter_env_drops_non_allowlisted_keys() {
        let spec = SandboxSpec::new(
            BTreeSet::new(),
            BTreeSet::new(),
            PathBuf::from("."),
            vec!["PATH".to_string()],
            ResourceLimits::default(),
            NetworkPolicy::Isolated,
        )
        .unwrap();
        let ambient = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("SECRET".to_string(), "leaked".to_string()),
        ];
        let filtered = spec.filter_env(&ambient, None);
        assert_eq!(filtered, vec![("PATH".to_string(), "/usr/bin".to_string())]);
    }

    #[test]
    fn filter_env_normalizes_source_date_epoch() {
        let spec = SandboxSpec::new(
            BTreeSet::new(),
            BTreeSet::new(),
            PathBuf::from("."),
            vec!["SOURCE_DATE_EPOCH".to_string()],
            ResourceLimits::default(),
            NetworkPolicy::Isolated,
        )
        .unwrap();
        let ambient = vec![("SOURCE_DATE_EPOCH".to_string(), "123".to_string())];
        let filtered = spec.filter_env(&ambient, Some(0));
        assert_eq!(filtered, vec![("SOURCE_DATE_EPOCH".to_string(), "0".to_string())]);
    }
}
