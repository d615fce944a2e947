//! Priority-aware, dependency-driven action scheduler.
//!
//! Structural graph mutation happens once, up front, in `kiln-graph`. From
//! there the scheduler only ever reads the graph and writes to each node's
//! atomic `status`/`retry_count`/`pending_deps` fields, so the common path
//! (decrementing a dependency counter, reading a status) never touches a
//! lock. The [`Scheduler`]'s own mutex only serializes the ready queue and
//! worker registry, matching the single-actor-with-atomic-counters shape
//! used throughout this codebase's concurrent components.

mod priority;
mod retry;
mod worker;

pub use priority::{ExecutionTimeTracker, Priority, ReadyQueue, ScheduledAction};
pub use retry::{FailureKind, RetryPolicy};
pub use worker::{Worker, WorkerHealth, WorkerId, WorkerRegistry};

use kiln_graph::{BuildGraph, BuildStatus, GraphResult, TargetId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What happened after a failed action was reported to the scheduler.
#[derive(Debug)]
pub enum FailureOutcome {
    Retrying { backoff: Duration, attempt: usize },
    Permanent { propagated: Vec<TargetId> },
}

/// The scheduler: owns the ready queue and worker registry, reads the graph.
pub struct Scheduler {
    graph: Arc<BuildGraph>,
    ready_queue: Mutex<ReadyQueue>,
    workers: Mutex<WorkerRegistry>,
    retry_policy: RetryPolicy,
    time_tracker: ExecutionTimeTracker,
    priority_thresholds: (u64, u64, u64),
    priority_scores: HashMap<TargetId, u64>,
}

impl Scheduler {
    pub fn new(graph: Arc<BuildGraph>, retry_policy: RetryPolicy) -> GraphResult<Self> {
        let priority_scores = graph.critical_path(|_target| 1u64)?;
        let mut sorted: Vec<u64> = priority_scores.values().copied().collect();
        sorted.sort_unstable();
        let quantile = |q: f64| -> u64 {
            if sorted.is_empty() {
                0
            } else {
                sorted[((sorted.len() as f64 - 1.0) * q).round() as usize]
            }
        };
        let priority_thresholds = (quantile(0.5), quantile(0.8), quantile(0.95));

        Ok(Self {
            graph,
            ready_queue: Mutex::new(ReadyQueue::new()),
            workers: Mutex::new(WorkerRegistry::new()),
            retry_policy,
            time_tracker: ExecutionTimeTracker::default(),
            priority_thresholds,
            priority_scores,
        })
    }

    pub fn register_worker(&self, id: WorkerId, capabilities: Vec<String>) {
        self.workers.lock().expect("worker registry poisoned").register(id, capabilities);
    }

    fn priority_for(&self, target: &TargetId) -> Priority {
        let score = self.priority_scores.get(target).copied().unwrap_or(0);
        let (p50, p80, p95) = self.priority_thresholds;
        if score >= p95 {
            Priority::Critical
        } else if score >= p80 {
            Priority::High
        } else if score >= p50 {
            Priority::Normal
        } else {
            Priority::Low
        }
    }

    fn estimated_duration(&self, target: &TargetId) -> u64 {
        let language = self
            .graph
            .node_by_target(target)
            .map(|n| n.target.language.clone())
            .unwrap_or_default();
        self.time_tracker.estimate(&language)
    }

    /// Scan the graph for targets whose dependencies are already satisfied
    /// and enqueue them. Call once after the graph is validated, before the
    /// first `dequeue_ready`.
    pub fn seed_ready_actions(&self) -> GraphResult<usize> {
        let mut count = 0;
        let mut queue = self.ready_queue.lock().expect("ready queue poisoned");
        for target in self.graph.target_ids() {
            let node = self.graph.node_by_target(&target)?;
            if node.status() == BuildStatus::Pending && node.pending_deps() == 0 {
                let node_id = self.graph.node_id(&target).expect("target exists");
                queue.push(ScheduledAction::new(node_id, target.clone(), self.priority_for(&target), self.estimated_duration(&target)));
                count += 1;
            }
        }
        Ok(count)
    }

    /// Pop the highest-priority ready action, if any.
    pub fn dequeue_ready(&self) -> Option<ScheduledAction> {
        self.ready_queue.lock().expect("ready queue poisoned").pop()
    }

    pub fn ready_len(&self) -> usize {
        self.ready_queue.lock().expect("ready queue poisoned").len()
    }

    /// Assign a dequeued action to a worker; marks the node `Building`.
    pub fn assign(&self, action: &ScheduledAction, worker: WorkerId) -> GraphResult<bool> {
        let assigned = self.workers.lock().expect("worker registry poisoned").assign(worker, action.node_id);
        if assigned {
            self.graph.node(action.node_id)?.set_status(BuildStatus::Building);
        }
        Ok(assigned)
    }

    /// Report a successful completion. Returns the set of actions that just
    /// became ready as a result (their last pending dependency resolved).
    pub fn on_complete(&self, action: &ScheduledAction, worker: WorkerId, duration_ms: u64) -> GraphResult<Vec<ScheduledAction>> {
        self.workers.lock().expect("worker registry poisoned").complete(worker, action.node_id);
        let node = self.graph.node(action.node_id)?;
        node.set_status(BuildStatus::Success);
        self.time_tracker.record(&node.target.language, duration_ms);

        let mut newly_ready = Vec::new();
        for dependent in self.graph.dependents(&action.target_id)? {
            let dep_node = self.graph.node_by_target(&dependent)?;
            if dep_node.decrement_pending_deps() {
                let node_id = self.graph.node_id(&dependent).expect("target exists");
                let scheduled = ScheduledAction::new(node_id, dependent.clone(), self.priority_for(&dependent), self.estimated_duration(&dependent));
                self.ready_queue.lock().expect("ready queue poisoned").push(scheduled.clone());
                newly_ready.push(scheduled);
            }
        }
        Ok(newly_ready)
    }

    /// Report a failure. Retries re-enter the ready queue (bumped one
    /// priority level if they were already High/Critical, so a retried
    /// urgent action does not fall behind newly-arrived normal work);
    /// exhausted retries mark the action and every transitive dependent
    /// `Failed`.
    pub fn on_failure(&self, action: ScheduledAction, worker: WorkerId, failure: FailureKind, error: impl Into<String>) -> GraphResult<FailureOutcome> {
        self.workers.lock().expect("worker registry poisoned").complete(worker, action.node_id);
        let node = self.graph.node(action.node_id)?;
        node.set_last_error(error);
        let attempt = node.increment_retry();

        if self.retry_policy.should_attempt(attempt, failure) {
            node.set_status(BuildStatus::Pending);
            let bumped_priority = match action.priority {
                Priority::High | Priority::Critical => Priority::Critical,
                other => other,
            };
            let retried = ScheduledAction::new(action.node_id, action.target_id.clone(), bumped_priority, action.estimated_duration_ms);
            self.ready_queue.lock().expect("ready queue poisoned").push(retried);
            Ok(FailureOutcome::Retrying { backoff: self.retry_policy.backoff_for(attempt), attempt })
        } else {
            node.set_status(BuildStatus::Failed);
            let propagated = self.propagate_failure(&action.target_id)?;
            Ok(FailureOutcome::Permanent { propagated })
        }
    }

    /// A worker disappeared; its in-progress actions are retried (subject
    /// to the normal retry budget) or propagated as failures.
    pub fn on_worker_failure(&self, worker: WorkerId) -> GraphResult<Vec<ScheduledAction>> {
        let lost = self.workers.lock().expect("worker registry poisoned").remove(worker).unwrap_or_default();
        let mut requeued = Vec::new();
        for node_id in lost {
            let (target_id, attempt) = {
                let node = self.graph.node(node_id)?;
                (node.target.id.clone(), node.increment_retry())
            };
            if self.retry_policy.should_attempt(attempt, FailureKind::ExecutionTransient) {
                self.graph.node(node_id)?.set_status(BuildStatus::Pending);
                let scheduled = ScheduledAction::new(node_id, target_id.clone(), Priority::High, self.estimated_duration(&target_id));
                self.ready_queue.lock().expect("ready queue poisoned").push(scheduled.clone());
                requeued.push(scheduled);
            } else {
                self.graph.node(node_id)?.set_status(BuildStatus::Failed);
                self.propagate_failure(&target_id)?;
            }
        }
        Ok(requeued)
    }

    fn propagate_failure(&self, target: &TargetId) -> GraphResult<Vec<TargetId>> {
        let mut stack = self.graph.dependents(target)?;
        let mut failed = Vec::new();
        while let Some(t) = stack.pop() {
            let node = self.graph.node_by_target(&t)?;
            if node.status() != BuildStatus::Failed {
                node.set_status(BuildStatus::Failed);
                failed.push(t.clone());
                stack.extend(self.graph.dependents(&t)?);
            }
        }
        Ok(failed)
    }
}
