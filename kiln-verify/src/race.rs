//! Race-freedom proof: the happens-before relation implied by dependency
//! edges, a structural fact about this workspace's shared mutable state, and
//! a check that no two targets declare overlapping output sets.

use crate::error::VerifyError;
use kiln_graph::{BuildGraph, TargetId};
use kiln_sandbox::SandboxSpec;
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaceFreedomProof {
    /// `(dependency, dependent)` pairs: the dependency happens-before the
    /// dependent, since the scheduler only marks a node `Ready` after every
    /// dependency reaches `Success`/`Cached` via a sequentially-consistent
    /// decrement of its pending-dependency counter to zero.
    pub happens_before: Vec<(TargetId, TargetId)>,
    /// Every piece of cross-thread-mutable state this workspace's scheduler
    /// touches (`BuildNode::status`/`retry_count`/`pending_deps`) is an
    /// atomic; this is a structural invariant of `kiln-graph`, not something
    /// computed per run, so it is always `true` for a graph built from this
    /// workspace's own `BuildGraph`.
    pub atomics_discipline: bool,
    /// True iff no two targets' declared output sets intersect.
    pub disjoint_writes: bool,
}

impl RaceFreedomProof {
    pub fn build(graph: &BuildGraph, specs: &[(TargetId, SandboxSpec)]) -> Result<Self, VerifyError> {
        let mut happens_before = Vec::new();
        for target in graph.target_ids() {
            for dep in graph.dependencies(&target)? {
                happens_before.push((dep, target.clone()));
            }
        }

        let mut seen: HashSet<&PathBuf> = HashSet::new();
        let mut disjoint_writes = true;
        for (_, spec) in specs {
            for output in &spec.outputs {
                if !seen.insert(output) {
                    disjoint_writes = false;
                }
            }
        }

        Ok(Self { happens_before, atomics_discipline: true, disjoint_writes })
    }
}
