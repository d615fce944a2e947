//! Generic directed graph storage shared by [`crate::BuildGraph`].
//!
//! Nodes and edges are generic over a payload type so the same storage serves
//! both [`crate::BuildNode`] graphs and plain tests. Cycle handling has two
//! modes: callers that want to reject a cycle-creating edge immediately use
//! [`Dag::add_edge`]; callers that want to build the whole edge set first and
//! validate once use [`Dag::add_edge_unchecked`] followed by [`Dag::validate`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Node identifier in the graph. Stable for the lifetime of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Construct a `NodeId` directly. Exposed for callers that need a
    /// placeholder id (e.g. tests in downstream crates); ids handed back by
    /// a live [`Dag`] are always obtained from [`Dag::add_node`].
    pub fn new(raw: usize) -> Self {
        NodeId(raw)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// Error type for graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The given edge would create (or did create) a cycle. Carries the
    /// cycle witness: a sequence of node ids forming the cycle, first and
    /// last entries equal.
    #[error("cycle detected in graph: {0:?}")]
    Cycle(Vec<NodeId>),

    /// Referenced node does not exist.
    #[error("node {0} not found in graph")]
    NodeNotFound(NodeId),

    /// A structural operation was attempted that the graph's current state
    /// does not permit (e.g. scheduling before `validate`).
    #[error("invalid graph operation: {0}")]
    InvalidOperation(String),
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

struct Node<N> {
    data: N,
    outgoing: HashSet<NodeId>,
    incoming: HashSet<NodeId>,
}

struct Edge {
    from: NodeId,
    to: NodeId,
}

/// Generic directed graph with O(1) node/edge insertion and O(V+E) traversal
/// algorithms. Acyclicity is not an invariant of this type itself — it is
/// enforced either per-edge (`add_edge`) or in a single batch (`validate`).
pub struct Dag<N> {
    nodes: HashMap<NodeId, Node<N>>,
    edges: Vec<Edge>,
    next_id: usize,
}

impl<N> Default for Dag<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> Dag<N> {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            next_id: 0,
        }
    }

    /// Insert a node and return its id.
    pub fn add_node(&mut self, data: N) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                data,
                outgoing: HashSet::new(),
                incoming: HashSet::new(),
            },
        );
        id
    }

    /// Add a directed edge `from -> to`, rejecting it immediately if it
    /// would create a cycle (Immediate validation mode).
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> GraphResult<()> {
        self.require_node(from)?;
        self.require_node(to)?;

        if self.can_reach(to, from) {
            return Err(GraphError::Cycle(vec![from, to, from]));
        }

        self.insert_edge(from, to);
        Ok(())
    }

    /// Add a directed edge without checking for cycles. Intended for
    /// Deferred validation mode: the caller must call [`Dag::validate`]
    /// before relying on acyclicity.
    pub fn add_edge_unchecked(&mut self, from: NodeId, to: NodeId) -> GraphResult<()> {
        self.require_node(from)?;
        self.require_node(to)?;
        self.insert_edge(from, to);
        Ok(())
    }

    fn insert_edge(&mut self, from: NodeId, to: NodeId) {
        self.edges.push(Edge { from, to });
        if let Some(n) = self.nodes.get_mut(&from) {
            n.outgoing.insert(to);
        }
        if let Some(n) = self.nodes.get_mut(&to) {
            n.incoming.insert(from);
        }
    }

    fn require_node(&self, id: NodeId) -> GraphResult<()> {
        if self.nodes.contains_key(&id) {
            Ok(())
        } else {
            Err(GraphError::NodeNotFound(id))
        }
    }

    fn can_reach(&self, start: NodeId, end: NodeId) -> bool {
        if start == end {
            return true;
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start);
        while let Some(current) = queue.pop_front() {
            if current == end {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                for &neighbor in &node.outgoing {
                    if !visited.contains(&neighbor) {
                        queue.push_back(neighbor);
                    }
                }
            }
        }
        false
    }

    /// Reference to a node's payload.
    pub fn node(&self, id: NodeId) -> GraphResult<&N> {
        self.nodes.get(&id).map(|n| &n.data).ok_or(GraphError::NodeNotFound(id))
    }

    /// Mutable reference to a node's payload.
    pub fn node_mut(&mut self, id: NodeId) -> GraphResult<&mut N> {
        self.nodes.get_mut(&id).map(|n| &mut n.data).ok_or(GraphError::NodeNotFound(id))
    }

    /// All node ids currently in the graph, in arbitrary order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Direct dependencies (incoming edges) of a node.
    pub fn dependencies(&self, id: NodeId) -> GraphResult<Vec<NodeId>> {
        self.nodes
            .get(&id)
            .map(|n| n.incoming.iter().copied().collect())
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Direct dependents (outgoing edges) of a node.
    pub fn dependents(&self, id: NodeId) -> GraphResult<Vec<NodeId>> {
        self.nodes
            .get(&id)
            .map(|n| n.outgoing.iter().copied().collect())
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Topologically sort via Kahn's algorithm. On success, `pos(a) < pos(b)`
    /// for every edge `a -> b`. On failure, returns a cycle witness.
    pub fn topological_sort(&self) -> GraphResult<Vec<NodeId>> {
        let mut in_degree: HashMap<NodeId, usize> = self.nodes.keys().map(|&id| (id, 0)).collect();
        for edge in &self.edges {
            *in_degree.entry(edge.to).or_insert(0) += 1;
        }

        let mut queue: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            result.push(id);
            if let Some(node) = self.nodes.get(&id) {
                for &neighbor in &node.outgoing {
                    if let Some(d) = in_degree.get_mut(&neighbor) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(neighbor);
                        }
                    }
                }
            }
        }

        if result.len() == self.nodes.len() {
            Ok(result)
        } else {
            Err(GraphError::Cycle(self.first_cycle().unwrap_or_default()))
        }
    }

    /// Validate the whole graph at once: returns the topological order, or a
    /// cycle witness if one exists. Intended for Deferred validation mode
    /// after a batch of `add_edge_unchecked` calls.
    pub fn validate(&self) -> GraphResult<Vec<NodeId>> {
        self.topological_sort()
    }

    /// Find one cycle, if any exists, as a node-id path whose first and last
    /// elements are equal.
    pub fn first_cycle(&self) -> Option<Vec<NodeId>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for &id in self.nodes.keys() {
            if !visited.contains(&id) {
                if let Some(cycle) = self.first_cycle_dfs(id, &mut visited, &mut rec_stack, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn first_cycle_dfs(
        &self,
        id: NodeId,
        visited: &mut HashSet<NodeId>,
        rec_stack: &mut HashSet<NodeId>,
        path: &mut Vec<NodeId>,
    ) -> Option<Vec<NodeId>> {
        visited.insert(id);
        rec_stack.insert(id);
        path.push(id);

        if let Some(node) = self.nodes.get(&id) {
            for &neighbor in &node.outgoing {
                if !visited.contains(&neighbor) {
                    if let Some(cycle) = self.first_cycle_dfs(neighbor, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(&neighbor) {
                    let start = path.iter().position(|&n| n == neighbor).unwrap_or(0);
                    let mut witness = path[start..].to_vec();
                    witness.push(neighbor);
                    return Some(witness);
                }
            }
        }

        path.pop();
        rec_stack.remove(&id);
        None
    }

    /// Longest-path depth from any leaf (a node with no dependencies) to
    /// `id`, counting edges. Leaves have depth 0. Requires an acyclic graph;
    /// behavior on a cyclic graph is unspecified (may not terminate).
    pub fn depth(&self, id: NodeId) -> GraphResult<usize> {
        let order = self.topological_sort()?;
        let mut depth: HashMap<NodeId, usize> = HashMap::new();
        for node_id in order {
            let deps = self.dependencies(node_id)?;
            let d = deps.iter().map(|dep| depth.get(dep).copied().unwrap_or(0) + 1).max().unwrap_or(0);
            depth.insert(node_id, d);
        }
        Ok(depth.get(&id).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_graph_has_no_nodes_or_edges() {
        let dag = Dag::<&str>::new();
        assert_eq!(dag.node_count(), 0);
        assert_eq!(dag.edge_count(), 0);
    }

    #[test]
    fn add_edge_rejects_immediate_cycle() {
        let mut dag = Dag::<&str>::new();
        let a = dag.add_node("a");
        let b = dag.add_node("b");
        let c = dag.add_node("c");
        dag.add_edge(a, b).unwrap();
        dag.add_edge(b, c).unwrap();
        let result = dag.add_edge(c, a);
        assert!(matches!(result, Err(GraphError::Cycle(_))));
    }

    #[test]
    fn deferred_mode_detects_cycle_on_validate() {
        let mut dag = Dag::<&str>::new();
        let a = dag.add_node("a");
        let b = dag.add_node("b");
        let c = dag.add_node("c");
        dag.add_edge_unchecked(a, b).unwrap();
        dag.add_edge_unchecked(b, c).unwrap();
        dag.add_edge_unchecked(c, a).unwrap();
        let result = dag.validate();
        assert!(matches!(result, Err(GraphError::Cycle(_))));
    }

    #[test]
    fn topological_sort_respects_edge_order() {
        let mut dag = Dag::<&str>::new();
        let a = dag.add_node("a");
        let b = dag.add_node("b");
        let c = dag.add_node("c");
        dag.add_edge(a, b).unwrap();
        dag.add_edge(b, c).unwrap();
        let order = dag.topological_sort().unwrap();
        let pos = |id: NodeId| order.iter().position(|&n| n == id).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }

    #[test]
    fn depth_counts_longest_path() {
        let mut dag = Dag::<&str>::new();
        let root = dag.add_node("root");
        let a = dag.add_node("a");
        let b = dag.add_node("b");
        dag.add_edge(root, a).unwrap();
        dag.add_edge(a, b).unwrap();
        assert_eq!(dag.depth(root).unwrap(), 0);
        assert_eq!(dag.depth(a).unwrap(), 1);
        assert_eq!(dag.depth(b).unwrap(), 2);
    }
}
