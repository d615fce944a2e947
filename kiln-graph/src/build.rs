//! The build-specific graph: targets, nodes, and the graph that owns them.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use kiln_hash::Digest;

use crate::dag::{Dag, GraphError, GraphResult, NodeId};

/// Opaque target identifier, e.g. `//path/to/pkg:name`. Unique within a
/// workspace; immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        TargetId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of thing a target produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TargetType {
    Executable,
    Library,
    Test,
    Custom,
}

/// An immutable target definition, as handed to the graph by the external
/// configuration subsystem.
#[derive(Debug, Clone)]
pub struct Target {
    pub id: TargetId,
    pub target_type: TargetType,
    pub language: String,
    pub sources: Vec<String>,
    pub dependencies: Vec<TargetId>,
    pub output_hints: Vec<String>,
    pub config: serde_json::Value,
}

/// Build status of a node. Transitions: Pending -> Building -> (Success |
/// Failed | Cached); Failed -> Pending while retries remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BuildStatus {
    Pending = 0,
    Building = 1,
    Success = 2,
    Failed = 3,
    Cached = 4,
}

impl BuildStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => BuildStatus::Building,
            2 => BuildStatus::Success,
            3 => BuildStatus::Failed,
            4 => BuildStatus::Cached,
            _ => BuildStatus::Pending,
        }
    }
}

/// A node wrapping a [`Target`] with the mutable, concurrently-accessed
/// bookkeeping the scheduler needs. `status`, `retry_count`, and
/// `pending_deps` are atomics so readers never need the graph's lock;
/// `target` and structural edges are immutable after the graph is built.
pub struct BuildNode {
    pub target: Target,
    status: AtomicI64,
    retry_count: AtomicUsize,
    pending_deps: AtomicUsize,
    cached_depth: AtomicI64,
    last_error: Mutex<Option<String>>,
}

const DEPTH_UNSET: i64 = -1;

impl BuildNode {
    fn new(target: Target, dep_count: usize) -> Self {
        Self {
            target,
            status: AtomicI64::new(BuildStatus::Pending as i64),
            retry_count: AtomicUsize::new(0),
            pending_deps: AtomicUsize::new(dep_count),
            cached_depth: AtomicI64::new(DEPTH_UNSET),
            last_error: Mutex::new(None),
        }
    }

    pub fn status(&self) -> BuildStatus {
        BuildStatus::from_u8(self.status.load(Ordering::Acquire) as u8)
    }

    pub fn set_status(&self, status: BuildStatus) {
        self.status.store(status as i64, Ordering::Release);
    }

    pub fn retry_count(&self) -> usize {
        self.retry_count.load(Ordering::Acquire)
    }

    pub fn increment_retry(&self) -> usize {
        self.retry_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn pending_deps(&self) -> usize {
        self.pending_deps.load(Ordering::Acquire)
    }

    /// Decrement the pending-dependency counter; returns true if this call
    /// brought it to zero (the node just became Ready).
    pub fn decrement_pending_deps(&self) -> bool {
        self.pending_deps.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().expect("last_error mutex poisoned").clone()
    }

    pub fn set_last_error(&self, err: impl Into<String>) {
        *self.last_error.lock().expect("last_error mutex poisoned") = Some(err.into());
    }
}

/// Controls when cycle-creating edges are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Reject a cycle-creating edge as soon as it is added.
    Immediate,
    /// Accept edges eagerly; a single `validate()` call detects cycles.
    Deferred,
}

/// The target dependency graph. Owns every [`BuildNode`] exclusively; the
/// scheduler and executor hold `TargetId`/`NodeId` references into it.
pub struct BuildGraph {
    dag: Dag<BuildNode>,
    by_target_id: HashMap<TargetId, NodeId>,
    mode: ValidationMode,
    validated: bool,
}

impl BuildGraph {
    pub fn new(mode: ValidationMode) -> Self {
        Self {
            dag: Dag::new(),
            by_target_id: HashMap::new(),
            mode,
            validated: false,
        }
    }

    /// Add a target as a node. Does not wire up dependency edges; call
    /// [`BuildGraph::link_dependencies`] after every target has been added
    /// so that forward references resolve.
    pub fn add_target(&mut self, target: Target) -> GraphResult<NodeId> {
        if self.by_target_id.contains_key(&target.id) {
            return Err(GraphError::InvalidOperation(format!(
                "duplicate target id: {}",
                target.id
            )));
        }
        let id = target.id.clone();
        let node_id = self.dag.add_node(BuildNode::new(target, 0));
        self.by_target_id.insert(id, node_id);
        Ok(node_id)
    }

    /// Wire up dependency edges for every target added so far, based on each
    /// target's declared `dependencies`. In `Immediate` mode, a cycle is
    /// rejected on the edge that would create it; in `Deferred` mode, edges
    /// are accepted and `validate()` must be called afterward.
    pub fn link_dependencies(&mut self) -> GraphResult<()> {
        let targets: Vec<(NodeId, Vec<TargetId>)> = self
            .by_target_id
            .values()
            .map(|&node_id| {
                let deps = self.dag.node(node_id).expect("node exists").target.dependencies.clone();
                (node_id, deps)
            })
            .collect();

        for (node_id, deps) in targets {
            if deps.is_empty() {
                continue;
            }
            for dep_id in deps {
                let dep_node = *self
                    .by_target_id
                    .get(&dep_id)
                    .ok_or_else(|| GraphError::InvalidOperation(format!("unknown dependency: {dep_id}")))?;
                match self.mode {
                    ValidationMode::Immediate => self.dag.add_edge(dep_node, node_id)?,
                    ValidationMode::Deferred => self.dag.add_edge_unchecked(dep_node, node_id)?,
                }
                self.dag
                    .node(node_id)
                    .expect("node exists")
                    .pending_deps
                    .fetch_add(1, Ordering::AcqRel);
            }
            let target_id = self.target_id_of(node_id);
            self.invalidate_depth_cascade(&target_id)?;
        }
        Ok(())
    }

    /// Validate structural acyclicity. Required once before scheduling when
    /// the graph was built in `Deferred` mode; a no-op success in
    /// `Immediate` mode since every edge was already checked on insert.
    pub fn validate(&mut self) -> GraphResult<Vec<TargetId>> {
        let order = self.dag.validate()?;
        self.validated = true;
        Ok(order.into_iter().map(|id| self.target_id_of(id)).collect())
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn node_id(&self, target: &TargetId) -> Option<NodeId> {
        self.by_target_id.get(target).copied()
    }

    pub fn node(&self, id: NodeId) -> GraphResult<&BuildNode> {
        self.dag.node(id)
    }

    pub fn node_by_target(&self, target: &TargetId) -> GraphResult<&BuildNode> {
        let id = self
            .node_id(target)
            .ok_or_else(|| GraphError::InvalidOperation(format!("unknown target: {target}")))?;
        self.dag.node(id)
    }

    pub fn target_ids(&self) -> Vec<TargetId> {
        self.by_target_id.keys().cloned().collect()
    }

    fn target_id_of(&self, node_id: NodeId) -> TargetId {
        self.dag.node(node_id).expect("node exists").target.id.clone()
    }

    pub fn dependencies(&self, target: &TargetId) -> GraphResult<Vec<TargetId>> {
        let node_id = self
            .node_id(target)
            .ok_or_else(|| GraphError::InvalidOperation(format!("unknown target: {target}")))?;
        Ok(self.dag.dependencies(node_id)?.into_iter().map(|id| self.target_id_of(id)).collect())
    }

    pub fn dependents(&self, target: &TargetId) -> GraphResult<Vec<TargetId>> {
        let node_id = self
            .node_id(target)
            .ok_or_else(|| GraphError::InvalidOperation(format!("unknown target: {target}")))?;
        Ok(self.dag.dependents(node_id)?.into_iter().map(|id| self.target_id_of(id)).collect())
    }

    /// Memoized longest-path depth from any leaf. The memo is invalidated
    /// along the dependent cascade whenever `link_dependencies` adds a new
    /// edge reaching this node (see `invalidate_depth_cascade`).
    pub fn depth(&self, target: &TargetId) -> GraphResult<usize> {
        let node_id = self
            .node_id(target)
            .ok_or_else(|| GraphError::InvalidOperation(format!("unknown target: {target}")))?;
        let node = self.dag.node(node_id)?;
        let cached = node.cached_depth.load(Ordering::Acquire);
        if cached != DEPTH_UNSET {
            return Ok(cached as usize);
        }
        let computed = self.dag.depth(node_id)? as i64;
        node.cached_depth.store(computed, Ordering::Release);
        Ok(computed as usize)
    }

    /// Invalidate the memoized depth of `target` and every transitive
    /// dependent, forcing recomputation on next `depth()` call.
    pub fn invalidate_depth_cascade(&self, target: &TargetId) -> GraphResult<()> {
        let mut stack = vec![self
            .node_id(target)
            .ok_or_else(|| GraphError::InvalidOperation(format!("unknown target: {target}")))?];
        let mut seen = std::collections::HashSet::new();
        while let Some(node_id) = stack.pop() {
            if !seen.insert(node_id) {
                continue;
            }
            self.dag.node(node_id)?.cached_depth.store(DEPTH_UNSET, Ordering::Release);
            stack.extend(self.dag.dependents(node_id)?);
        }
        Ok(())
    }

    /// Critical-path score per target: own cost plus the max critical-path
    /// score among its dependents. `cost_fn` assigns a base cost to each
    /// target (e.g. estimated execution time); targets with no dependents
    /// get a score equal to their own cost.
    pub fn critical_path<F>(&self, cost_fn: F) -> GraphResult<HashMap<TargetId, u64>>
    where
        F: Fn(&Target) -> u64,
    {
        let order = self.dag.topological_sort()?;
        let mut score: HashMap<NodeId, u64> = HashMap::new();
        for &node_id in order.iter().rev() {
            let node = self.dag.node(node_id)?;
            let own_cost = cost_fn(&node.target);
            let dependents = self.dag.dependents(node_id)?;
            let best_dependent = dependents.iter().map(|d| score.get(d).copied().unwrap_or(0)).max().unwrap_or(0);
            score.insert(node_id, own_cost + best_dependent);
        }
        Ok(score.into_iter().map(|(id, v)| (self.target_id_of(id), v)).collect())
    }

    /// Content hash of a target: BLAKE3 over the target's own declared
    /// fields combined with the content hashes of its dependencies,
    /// computed depth-first. Two targets with equal bytes and equal
    /// dependency subgraphs produce equal hashes.
    pub fn content_hash(&self, target: &TargetId) -> GraphResult<Digest> {
        let node_id = self
            .node_id(target)
            .ok_or_else(|| GraphError::InvalidOperation(format!("unknown target: {target}")))?;
        let mut visited = std::collections::HashSet::new();
        self.content_hash_recursive(node_id, &mut visited)
    }

    fn content_hash_recursive(
        &self,
        node_id: NodeId,
        visited: &mut std::collections::HashSet<NodeId>,
    ) -> GraphResult<Digest> {
        let node = self.dag.node(node_id)?;
        let mut hasher = kiln_hash::StreamingHasher::new();
        hasher.update(node.target.id.as_str().as_bytes());
        hasher.update(node.target.language.as_bytes());
        for source in &node.target.sources {
            hasher.update(source.as_bytes());
        }

        visited.insert(node_id);
        let mut deps = self.dag.dependencies(node_id)?;
        deps.sort();
        for dep in deps {
            if visited.contains(&dep) {
                continue;
            }
            let dep_hash = self.content_hash_recursive(dep, visited)?;
            hasher.update(dep_hash.as_bytes());
        }

        Ok(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, deps: &[&str]) -> Target {
        Target {
            id: TargetId::new(id),
            target_type: TargetType::Library,
            language: "rust".into(),
            sources: vec![format!("{id}.rs")],
            dependencies: deps.iter().map(|d| TargetId::new(*d)).collect(),
            output_hints: vec![],
            config: serde_json::Value::Null,
        }
    }

    fn three_target_chain(mode: ValidationMode) -> BuildGraph {
        let mut graph = BuildGraph::new(mode);
        graph.add_target(target("a", &[])).unwrap();
        graph.add_target(target("b", &["a"])).unwrap();
        graph.add_target(target("c", &["b"])).unwrap();
        graph.link_dependencies().unwrap();
        graph
    }

    #[test]
    fn clean_build_topological_order_matches_dependency_chain() {
        let mut graph = three_target_chain(ValidationMode::Immediate);
        let order = graph.validate().unwrap();
        let pos = |id: &str| order.iter().position(|t| t.as_str() == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn pending_deps_starts_at_dependency_count() {
        let graph = three_target_chain(ValidationMode::Immediate);
        let node = graph.node_by_target(&TargetId::new("c")).unwrap();
        assert_eq!(node.pending_deps(), 1);
        let node = graph.node_by_target(&TargetId::new("a")).unwrap();
        assert_eq!(node.pending_deps(), 0);
    }

    #[test]
    fn immediate_mode_rejects_cycle_on_link() {
        let mut graph = BuildGraph::new(ValidationMode::Immediate);
        graph.add_target(target("x", &["z"])).unwrap();
        graph.add_target(target("y", &["x"])).unwrap();
        graph.add_target(target("z", &["y"])).unwrap();
        let result = graph.link_dependencies();
        assert!(result.is_err());
    }

    #[test]
    fn deferred_mode_accepts_edges_then_reports_cycle_witness() {
        let mut graph = BuildGraph::new(ValidationMode::Deferred);
        graph.add_target(target("x", &["z"])).unwrap();
        graph.add_target(target("y", &["x"])).unwrap();
        graph.add_target(target("z", &["y"])).unwrap();
        graph.link_dependencies().unwrap();
        let result = graph.validate();
        assert!(result.is_err());
    }

    #[test]
    fn depth_increases_along_chain() {
        let graph = three_target_chain(ValidationMode::Immediate);
        assert_eq!(graph.depth(&TargetId::new("a")).unwrap(), 0);
        assert_eq!(graph.depth(&TargetId::new("b")).unwrap(), 1);
        assert_eq!(graph.depth(&TargetId::new("c")).unwrap(), 2);
    }

    #[test]
    fn invalidate_depth_cascade_clears_memo_for_target_and_its_dependents() {
        let graph = three_target_chain(ValidationMode::Immediate);
        assert_eq!(graph.depth(&TargetId::new("a")).unwrap(), 0);
        assert_eq!(graph.depth(&TargetId::new("c")).unwrap(), 2);

        let node_a = graph.node_by_target(&TargetId::new("a")).unwrap();
        let node_c = graph.node_by_target(&TargetId::new("c")).unwrap();
        assert_ne!(node_a.cached_depth.load(Ordering::Acquire), DEPTH_UNSET);
        assert_ne!(node_c.cached_depth.load(Ordering::Acquire), DEPTH_UNSET);

        graph.invalidate_depth_cascade(&TargetId::new("a")).unwrap();

        assert_eq!(node_a.cached_depth.load(Ordering::Acquire), DEPTH_UNSET);
        assert_eq!(node_c.cached_depth.load(Ordering::Acquire), DEPTH_UNSET);
    }

    #[test]
    fn linking_a_later_dependency_invalidates_its_own_depth_memo() {
        let mut graph = BuildGraph::new(ValidationMode::Deferred);
        graph.add_target(target("a", &[])).unwrap();
        graph.add_target(target("b", &[])).unwrap();
        graph.link_dependencies().unwrap();
        assert_eq!(graph.depth(&TargetId::new("b")).unwrap(), 0);

        // "b" gains a dependency on "a" after its depth was already memoized.
        let node_id = graph.node_id(&TargetId::new("b")).unwrap();
        graph.dag.node_mut(node_id).unwrap().target.dependencies.push(TargetId::new("a"));
        graph.link_dependencies().unwrap();

        assert_eq!(graph.depth(&TargetId::new("b")).unwrap(), 1);
    }

    #[test]
    fn critical_path_scores_leaf_of_diamond_highest() {
        let mut graph = BuildGraph::new(ValidationMode::Immediate);
        graph.add_target(target("root", &[])).unwrap();
        graph.add_target(target("left", &["root"])).unwrap();
        graph.add_target(target("right", &["root"])).unwrap();
        graph.add_target(target("sink", &["left", "right"])).unwrap();
        graph.link_dependencies().unwrap();

        let scores = graph.critical_path(|_| 1).unwrap();
        assert_eq!(scores[&TargetId::new("root")], 3);
        assert_eq!(scores[&TargetId::new("sink")], 1);
    }

    #[test]
    fn content_hash_changes_when_dependency_source_changes() {
        let mut graph = three_target_chain(ValidationMode::Immediate);
        let before = graph.content_hash(&TargetId::new("c")).unwrap();

        graph.node_by_target(&TargetId::new("a")).unwrap();
        let node_id = graph.node_id(&TargetId::new("a")).unwrap();
        let node_mut = graph.dag.node_mut(node_id).unwrap();
        node_mut.target.sources.push("extra.rs".into());

        let after = graph.content_hash(&TargetId::new("c")).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn status_transitions_are_observable_without_graph_lock() {
        let graph = three_target_chain(ValidationMode::Immediate);
        let node = graph.node_by_target(&TargetId::new("a")).unwrap();
        assert_eq!(node.status(), BuildStatus::Pending);
        node.set_status(BuildStatus::Building);
        assert_eq!(node.status(), BuildStatus::Building);
        node.set_status(BuildStatus::Success);
        assert_eq!(node.status(), BuildStatus::Success);
    }

    #[test]
    fn retry_count_increments() {
        let graph = three_target_chain(ValidationMode::Immediate);
        let node = graph.node_by_target(&TargetId::new("a")).unwrap();
        assert_eq!(node.increment_retry(), 1);
        assert_eq!(node.increment_retry(), 2);
        assert_eq!(node.retry_count(), 2);
    }
}
