//! Hermeticity proof: for every target's declared action spec, the union of
//! its declared inputs and the union of its declared outputs must be
//! disjoint, and the action must run network-isolated.

use kiln_graph::TargetId;
use kiln_sandbox::{NetworkPolicy, SandboxSpec};
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetHermeticity {
    pub target: TargetId,
    pub disjoint: bool,
    pub network_isolated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HermeticityProof {
    pub inputs: BTreeSet<PathBuf>,
    pub outputs: BTreeSet<PathBuf>,
    pub per_target: Vec<TargetHermeticity>,
    /// True iff every target's own inputs/outputs are disjoint.
    pub disjoint: bool,
    /// True iff every target runs with no network access.
    pub network_isolated: bool,
}

impl HermeticityProof {
    pub fn build(specs: &[(TargetId, SandboxSpec)]) -> Self {
        let mut inputs = BTreeSet::new();
        let mut outputs = BTreeSet::new();
        let mut per_target = Vec::with_capacity(specs.len());

        for (target, spec) in specs {
            inputs.extend(spec.inputs.iter().cloned());
            outputs.extend(spec.outputs.iter().cloned());
            // `SandboxSpec::new` already enforces this invariant at
            // construction, so `is_disjoint` here re-derives it as a
            // witness rather than trusting the constructor blindly.
            let disjoint = spec.inputs.is_disjoint(&spec.outputs);
            let network_isolated = spec.network == NetworkPolicy::Isolated;
            per_target.push(TargetHermeticity { target: target.clone(), disjoint, network_isolated });
        }

        let disjoint = per_target.iter().all(|t| t.disjoint);
        let network_isolated = per_target.iter().all(|t| t.network_isolated);
        Self { inputs, outputs, per_target, disjoint, network_isolated }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_sandbox::ResourceLimits;

    fn spec(inputs: &[&str], outputs: &[&str], network: NetworkPolicy) -> SandboxSpec {
        SandboxSpec::new(
            inputs.iter().map(PathBuf::from).collect(),
            outputs.iter().map(PathBuf::from).collect(),
            PathBuf::from("."),
            vec![],
            ResourceLimits::default(),
            network,
        )
        .unwrap()
    }

    #[test]
    fn all_isolated_and_disjoint_targets_prove_hermetic() {
        let specs = vec![
            (TargetId::new("a"), spec(&["a.c"], &["a.o"], NetworkPolicy::Isolated)),
            (TargetId::new("b"), spec(&["b.c"], &["b.o"], NetworkPolicy::Isolated)),
        ];
        let proof = HermeticityProof::build(&specs);
        assert!(proof.disjoint);
        assert!(proof.network_isolated);
        assert_eq!(proof.inputs.len(), 2);
        assert_eq!(proof.outputs.len(), 2);
    }

    #[test]
    fn a_single_networked_target_fails_the_global_isolation_flag() {
        let specs = vec![
            (TargetId::new("a"), spec(&["a.c"], &["a.o"], NetworkPolicy::Isolated)),
            (TargetId::new("fetch"), spec(&["manifest.json"], &["vendor/"], NetworkPolicy::Allowed)),
        ];
        let proof = HermeticityProof::build(&specs);
        assert!(!proof.network_isolated);
        assert!(proof.disjoint);
    }
}
