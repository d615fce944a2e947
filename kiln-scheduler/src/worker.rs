//! The worker registry: tracks which workers exist and what they're doing.

use kiln_graph::NodeId;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerHealth {
    Healthy,
    Degraded,
}

pub struct Worker {
    pub id: WorkerId,
    pub capabilities: Vec<String>,
    pub health: WorkerHealth,
    in_progress: HashSet<NodeId>,
}

/// Tracks registered workers and their in-progress assignments. Callers
/// (the scheduler) hold this behind their own lock; the registry itself
/// does no internal locking.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerId, Worker>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self { workers: HashMap::new() }
    }

    pub fn register(&mut self, id: WorkerId, capabilities: Vec<String>) {
        self.workers.insert(
            id,
            Worker { id, capabilities, health: WorkerHealth::Healthy, in_progress: HashSet::new() },
        );
    }

    pub fn remove(&mut self, id: WorkerId) -> Option<Vec<NodeId>> {
        self.workers.remove(&id).map(|w| w.in_progress.into_iter().collect())
    }

    pub fn assign(&mut self, id: WorkerId, node_id: NodeId) -> bool {
        match self.workers.get_mut(&id) {
            Some(worker) => {
                worker.in_progress.insert(node_id);
                true
            }
            None => false,
        }
    }

    pub fn complete(&mut self, id: WorkerId, node_id: NodeId) {
        if let Some(worker) = self.workers.get_mut(&id) {
            worker.in_progress.remove(&node_id);
        }
    }

    pub fn mark_degraded(&mut self, id: WorkerId) {
        if let Some(worker) = self.workers.get_mut(&id) {
            worker.health = WorkerHealth::Degraded;
        }
    }

    pub fn healthy_worker_ids(&self) -> Vec<WorkerId> {
        self.workers
            .values()
            .filter(|w| w.health == WorkerHealth::Healthy)
            .map(|w| w.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_loss_returns_its_in_progress_set_for_reassignment() {
        let mut registry = WorkerRegistry::new();
        let id = WorkerId(1);
        registry.register(id, vec![]);
        registry.assign(id, NodeId::new(0));
        registry.assign(id, NodeId::new(1));
        let lost = registry.remove(id).unwrap();
        assert_eq!(lost.len(), 2);
    }

    #[test]
    fn degraded_workers_are_excluded_from_healthy_list() {
        let mut registry = WorkerRegistry::new();
        registry.register(WorkerId(1), vec![]);
        registry.register(WorkerId(2), vec![]);
        registry.mark_degraded(WorkerId(1));
        assert_eq!(registry.healthy_worker_ids(), vec![WorkerId(2)]);
    }
}
