//! Priority ordering for the ready queue.

use kiln_graph::{NodeId, TargetId};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Dispatch priority. `Critical` is dispatched before `High`, before
/// `Normal`, before `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// One action waiting in the ready queue.
#[derive(Debug, Clone)]
pub struct ScheduledAction {
    pub node_id: NodeId,
    pub target_id: TargetId,
    pub priority: Priority,
    pub estimated_duration_ms: u64,
    sequence: u64,
}

impl PartialEq for ScheduledAction {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for ScheduledAction {}

impl PartialOrd for ScheduledAction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledAction {
    /// Higher priority sorts greater (so `BinaryHeap::pop` returns it
    /// first). Within the same priority, the action enqueued earlier
    /// (smaller sequence) sorts greater, giving FIFO order among equals.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl ScheduledAction {
    pub fn new(node_id: NodeId, target_id: TargetId, priority: Priority, estimated_duration_ms: u64) -> Self {
        Self {
            node_id,
            target_id,
            priority,
            estimated_duration_ms,
            sequence: SEQUENCE.fetch_add(1, AtomicOrdering::Relaxed),
        }
    }
}

/// Priority-ordered ready queue. A thin wrapper over [`BinaryHeap`] so the
/// scheduler can swap the discipline out without touching callers.
#[derive(Default)]
pub struct ReadyQueue {
    heap: BinaryHeap<ScheduledAction>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self { heap: BinaryHeap::new() }
    }

    pub fn push(&mut self, action: ScheduledAction) {
        self.heap.push(action);
    }

    pub fn pop(&mut self) -> Option<ScheduledAction> {
        self.heap.pop()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Exponentially-weighted moving average of an action's execution time,
/// keyed by target language (a reasonable grouping when a specific target
/// has no prior samples of its own).
pub struct ExecutionTimeTracker {
    alpha: f64,
    estimates: std::sync::Mutex<std::collections::HashMap<String, f64>>,
}

impl ExecutionTimeTracker {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, estimates: std::sync::Mutex::new(std::collections::HashMap::new()) }
    }

    pub fn estimate(&self, key: &str) -> u64 {
        self.estimates.lock().expect("poisoned").get(key).copied().unwrap_or(0.0) as u64
    }

    pub fn record(&self, key: &str, observed_ms: u64) {
        let mut estimates = self.estimates.lock().expect("poisoned");
        let entry = estimates.entry(key.to_string()).or_insert(observed_ms as f64);
        *entry = self.alpha * observed_ms as f64 + (1.0 - self.alpha) * *entry;
    }
}

impl Default for ExecutionTimeTracker {
    fn default() -> Self {
        Self::new(0.3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(priority: Priority) -> ScheduledAction {
        ScheduledAction::new(NodeId::new(0), TargetId::new("//t:a"), priority, 0)
    }

    #[test]
    fn high_priority_dequeues_before_normal() {
        let mut queue = ReadyQueue::new();
        queue.push(action(Priority::Normal));
        queue.push(action(Priority::High));
        queue.push(action(Priority::Low));
        assert_eq!(queue.pop().unwrap().priority, Priority::High);
        assert_eq!(queue.pop().unwrap().priority, Priority::Normal);
        assert_eq!(queue.pop().unwrap().priority, Priority::Low);
    }

    #[test]
    fn equal_priority_is_fifo() {
        let mut queue = ReadyQueue::new();
        let first = action(Priority::Normal);
        let first_target = first.target_id.clone();
        queue.push(first);
        queue.push(action(Priority::Normal));
        assert_eq!(queue.pop().unwrap().target_id, first_target);
    }

    #[test]
    fn ewma_converges_toward_new_samples() {
        let tracker = ExecutionTimeTracker::new(0.5);
        tracker.record("rust", 100);
        tracker.record("rust", 200);
        let estimate = tracker.estimate("rust");
        assert!(estimate > 100 && estimate <= 200);
    }
}
