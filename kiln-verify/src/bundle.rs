//! The proof bundle: all four proofs plus a BLAKE3 fingerprint of their
//! canonical encoding, so a bundle handed to a third party can be checked
//! for tampering without re-deriving every proof from scratch.

use crate::acyclicity::AcyclicityProof;
use crate::determinism::DeterminismProof;
use crate::error::VerifyError;
use crate::hermeticity::HermeticityProof;
use crate::race::RaceFreedomProof;
use kiln_graph::{BuildGraph, TargetId};
use kiln_hash::{Digest, StreamingHasher};
use kiln_sandbox::SandboxSpec;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofBundle {
    pub acyclicity: AcyclicityProof,
    pub hermeticity: HermeticityProof,
    pub determinism: DeterminismProof,
    pub race_freedom: RaceFreedomProof,
    pub fingerprint: Digest,
}

impl ProofBundle {
    /// Build every proof for `graph`, given the sandbox spec each target
    /// runs under. `specs` must cover every target in `graph` — a missing
    /// entry would silently understate what the determinism proof claims to
    /// have checked, so it is an error rather than an omission.
    pub fn build(graph: &mut BuildGraph, specs: Vec<(TargetId, SandboxSpec)>) -> Result<Self, VerifyError> {
        let target_ids = graph.target_ids();
        for target in &target_ids {
            if !specs.iter().any(|(id, _)| id == target) {
                return Err(VerifyError::MissingActionSpec(target.clone()));
            }
        }

        let acyclicity = AcyclicityProof::build(graph)?;
        let determinism = DeterminismProof::build(graph)?;
        let race_freedom = RaceFreedomProof::build(graph, &specs)?;
        let hermeticity = HermeticityProof::build(&specs);

        let fingerprint = fingerprint_bundle(&acyclicity, &hermeticity, &determinism, &race_freedom);

        Ok(Self { acyclicity, hermeticity, determinism, race_freedom, fingerprint })
    }

    /// Whether every proof in the bundle holds: acyclicity is implicit in
    /// having built one at all, so only the boolean proofs are checked here.
    pub fn is_valid(&self) -> bool {
        self.hermeticity.disjoint
            && self.hermeticity.network_isolated
            && self.determinism.complete
            && self.race_freedom.atomics_discipline
            && self.race_freedom.disjoint_writes
    }
}

fn fingerprint_bundle(
    acyclicity: &AcyclicityProof,
    hermeticity: &HermeticityProof,
    determinism: &DeterminismProof,
    race_freedom: &RaceFreedomProof,
) -> Digest {
    let mut hasher = StreamingHasher::new();

    hasher.update(&(acyclicity.order.len() as u64).to_le_bytes());
    for target in &acyclicity.order {
        write_str(&mut hasher, target.as_str());
    }

    hasher.update(&[u8::from(hermeticity.disjoint), u8::from(hermeticity.network_isolated)]);
    hasher.update(&(hermeticity.inputs.len() as u64).to_le_bytes());
    for input in &hermeticity.inputs {
        write_str(&mut hasher, &input.to_string_lossy());
    }
    hasher.update(&(hermeticity.outputs.len() as u64).to_le_bytes());
    for output in &hermeticity.outputs {
        write_str(&mut hasher, &output.to_string_lossy());
    }

    let mut fingerprints: Vec<_> = determinism.fingerprints.iter().collect();
    fingerprints.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
    hasher.update(&[u8::from(determinism.complete)]);
    hasher.update(&(fingerprints.len() as u64).to_le_bytes());
    for (target, digest) in fingerprints {
        write_str(&mut hasher, target.as_str());
        hasher.update(digest.as_bytes());
    }

    let mut happens_before = race_freedom.happens_before.clone();
    happens_before.sort_by(|a, b| (a.0.as_str(), a.1.as_str()).cmp(&(b.0.as_str(), b.1.as_str())));
    hasher.update(&(happens_before.len() as u64).to_le_bytes());
    for (from, to) in &happens_before {
        write_str(&mut hasher, from.as_str());
        write_str(&mut hasher, to.as_str());
    }
    hasher.update(&[u8::from(race_freedom.atomics_discipline), u8::from(race_freedom.disjoint_writes)]);

    hasher.finalize()
}

fn write_str(hasher: &mut StreamingHasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}
