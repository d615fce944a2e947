//! Acyclicity proof: a topological ordering of every target, which only
//! exists if the graph has no cycle.

use crate::error::VerifyError;
use kiln_graph::{BuildGraph, TargetId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcyclicityProof {
    /// A permutation of every target id such that each target appears after
    /// all of its dependencies.
    pub order: Vec<TargetId>,
}

impl AcyclicityProof {
    /// `graph.validate()` itself fails if a cycle exists, so a returned
    /// `AcyclicityProof` is a witness that none does.
    pub fn build(graph: &mut BuildGraph) -> Result<Self, VerifyError> {
        let order = graph.validate()?;
        Ok(Self { order })
    }

    /// Re-derive the edge-forwardness check independent of how `order` was
    /// produced: every dependency of a target must appear earlier in the
    /// order than the target itself.
    pub fn check_forward_edges(&self, graph: &BuildGraph) -> Result<bool, VerifyError> {
        let mut position = std::collections::HashMap::new();
        for (i, target) in self.order.iter().enumerate() {
            position.insert(target.clone(), i);
        }
        for target in &self.order {
            let target_pos = position[target];
            for dep in graph.dependencies(target)? {
                let dep_pos = match position.get(&dep) {
                    Some(p) => *p,
                    None => return Ok(false),
                };
                if dep_pos >= target_pos {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_graph::{Target, TargetType, ValidationMode};

    fn leaf(id: &str, deps: Vec<&str>) -> Target {
        Target {
            id: TargetId::new(id),
            target_type: TargetType::Library,
            language: "rust".into(),
            sources: vec![format!("{id}.rs")],
            dependencies: deps.into_iter().map(TargetId::new).collect(),
            output_hints: vec![format!("{id}.rlib")],
            config: serde_json::Value::Null,
        }
    }

    #[test]
    fn linear_chain_produces_a_forward_respecting_order() {
        let mut graph = BuildGraph::new(ValidationMode::Deferred);
        graph.add_target(leaf("a", vec![])).unwrap();
        graph.add_target(leaf("b", vec!["a"])).unwrap();
        graph.add_target(leaf("c", vec!["b"])).unwrap();
        graph.link_dependencies().unwrap();

        let proof = AcyclicityProof::build(&mut graph).unwrap();
        assert_eq!(proof.order.len(), 3);
        assert!(proof.check_forward_edges(&graph).unwrap());
    }
}
