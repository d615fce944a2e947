//! Determinism proof: every target has a complete, deterministic fingerprint
//! over its own declared fields and its dependency subgraph.

use crate::error::VerifyError;
use kiln_graph::{BuildGraph, TargetId};
use kiln_hash::Digest;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeterminismProof {
    pub fingerprints: HashMap<TargetId, Digest>,
    /// True iff every target in the graph produced a fingerprint (none were
    /// skipped for missing declarations).
    pub complete: bool,
}

impl DeterminismProof {
    pub fn build(graph: &BuildGraph) -> Result<Self, VerifyError> {
        let target_ids = graph.target_ids();
        let mut fingerprints = HashMap::with_capacity(target_ids.len());
        for target in &target_ids {
            let digest = graph.content_hash(target)?;
            fingerprints.insert(target.clone(), digest);
        }
        let complete = fingerprints.len() == target_ids.len();
        Ok(Self { fingerprints, complete })
    }
}
