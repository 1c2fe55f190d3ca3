/// Workload scheduling policies.
///
/// Each time a compute slot frees up, the device-level scheduler selects
/// which pending kernel launch runs next. Four policies are implemented:
///   - FIFO               — submission order, baseline
///   - Priority           — highest priority value first
///   - RoundRobin         — rotating pick over the pending queue
///   - ShortestJobFirst   — smallest estimated instruction count first
///
/// All policies share the same bookkeeping: three guarded sequences
/// (pending / running / completed) behind a single lock. A policy only
/// decides which pending index to take.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::workload::Workload;

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------

#[derive(Default)]
struct WorkloadQueues {
    pending: Vec<Arc<Workload>>,
    running: Vec<Arc<Workload>>,
    completed: Vec<Arc<Workload>>,
}

// ---------------------------------------------------------------------------
// Selection policies
// ---------------------------------------------------------------------------

/// A selection policy picks the index of the next workload to run from the
/// pending sequence, or `None` when nothing is pending.
pub trait SelectionPolicy: Send + Sync {
    fn select(&self, pending: &[Arc<Workload>]) -> Option<usize>;

    fn name(&self) -> &'static str;
}

/// Front of the queue, strictly in submission order.
pub struct FifoPolicy;

impl SelectionPolicy for FifoPolicy {
    fn select(&self, pending: &[Arc<Workload>]) -> Option<usize> {
        if pending.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    fn name(&self) -> &'static str {
        "FIFO"
    }
}

/// Greatest priority value wins; ties go to the earliest submission.
pub struct PriorityPolicy;

impl SelectionPolicy for PriorityPolicy {
    fn select(&self, pending: &[Arc<Workload>]) -> Option<usize> {
        // First maximum, scanned explicitly: max_by_key would hand back the
        // *last* of equal candidates and break the tie rule.
        let mut best: Option<usize> = None;
        for (i, workload) in pending.iter().enumerate() {
            match best {
                Some(b) if workload.priority() <= pending[b].priority() => {}
                _ => best = Some(i),
            }
        }
        best
    }

    fn name(&self) -> &'static str {
        "Priority"
    }
}

/// Rotating pick: position `cursor mod len`. The cursor itself is fixed;
/// removing the selected entry rotates the queue under it.
pub struct RoundRobinPolicy {
    cursor: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        RoundRobinPolicy { cursor: AtomicUsize::new(0) }
    }
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        RoundRobinPolicy::new()
    }
}

impl SelectionPolicy for RoundRobinPolicy {
    fn select(&self, pending: &[Arc<Workload>]) -> Option<usize> {
        if pending.is_empty() {
            return None;
        }
        Some(self.cursor.load(Ordering::Relaxed) % pending.len())
    }

    fn name(&self) -> &'static str {
        "Round-Robin"
    }
}

/// Smallest estimated instruction count wins; ties go to the earliest
/// submission (the first minimum).
pub struct ShortestJobFirstPolicy;

impl SelectionPolicy for ShortestJobFirstPolicy {
    fn select(&self, pending: &[Arc<Workload>]) -> Option<usize> {
        pending
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.estimated_instructions())
            .map(|(i, _)| i)
    }

    fn name(&self) -> &'static str {
        "Shortest-Job-First"
    }
}

// ---------------------------------------------------------------------------
// WorkloadScheduler
// ---------------------------------------------------------------------------

/// The device-level scheduler: guarded pending/running/completed sequences
/// plus a pluggable selection policy.
pub struct WorkloadScheduler {
    queues: Mutex<WorkloadQueues>,
    policy: Box<dyn SelectionPolicy>,
}

impl WorkloadScheduler {
    pub fn new(policy: Box<dyn SelectionPolicy>) -> Self {
        WorkloadScheduler {
            queues: Mutex::new(WorkloadQueues::default()),
            policy,
        }
    }

    pub fn name(&self) -> &'static str {
        self.policy.name()
    }

    /// Appends a workload to the pending sequence.
    pub fn add_workload(&self, workload: Arc<Workload>) {
        self.queues.lock().pending.push(workload);
    }

    /// Picks one pending workload per the policy, moves it to running and
    /// returns it. `None` when nothing is pending.
    pub fn next_workload(&self) -> Option<Arc<Workload>> {
        let mut queues = self.queues.lock();
        let index = self.policy.select(&queues.pending)?;
        let workload = queues.pending.remove(index);
        queues.running.push(Arc::clone(&workload));
        Some(workload)
    }

    /// Moves a workload from pending to running. No-op when it is not in
    /// the pending sequence.
    pub fn mark_running(&self, workload: &Arc<Workload>) {
        let mut queues = self.queues.lock();
        if let Some(pos) = queues.pending.iter().position(|w| Arc::ptr_eq(w, workload)) {
            let moved = queues.pending.remove(pos);
            queues.running.push(moved);
        }
    }

    /// Moves a workload from running to completed. No-op when it is not in
    /// the running sequence.
    pub fn mark_completed(&self, workload: &Arc<Workload>) {
        let mut queues = self.queues.lock();
        if let Some(pos) = queues.running.iter().position(|w| Arc::ptr_eq(w, workload)) {
            let moved = queues.running.remove(pos);
            queues.completed.push(moved);
        }
    }

    pub fn has_pending_workloads(&self) -> bool {
        !self.queues.lock().pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.queues.lock().pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.queues.lock().running.len()
    }

    pub fn completed_count(&self) -> usize {
        self.queues.lock().completed.len()
    }

    pub fn completed_workloads(&self) -> Vec<Arc<Workload>> {
        self.queues.lock().completed.clone()
    }
}

// ---------------------------------------------------------------------------
// Algorithm selector
// ---------------------------------------------------------------------------

/// Selectable workload scheduling algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingAlgorithm {
    Fifo,
    Priority,
    RoundRobin,
    ShortestJobFirst,
}

impl SchedulingAlgorithm {
    /// Builds a scheduler running this algorithm.
    pub fn build(self) -> WorkloadScheduler {
        match self {
            SchedulingAlgorithm::Fifo => WorkloadScheduler::new(Box::new(FifoPolicy)),
            SchedulingAlgorithm::Priority => WorkloadScheduler::new(Box::new(PriorityPolicy)),
            SchedulingAlgorithm::RoundRobin => {
                WorkloadScheduler::new(Box::new(RoundRobinPolicy::new()))
            }
            SchedulingAlgorithm::ShortestJobFirst => {
                WorkloadScheduler::new(Box::new(ShortestJobFirstPolicy))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SchedulingAlgorithm::Fifo             => "FIFO",
            SchedulingAlgorithm::Priority         => "Priority",
            SchedulingAlgorithm::RoundRobin       => "Round-Robin",
            SchedulingAlgorithm::ShortestJobFirst => "Shortest-Job-First",
        }
    }

    pub const ALL: [SchedulingAlgorithm; 4] = [
        SchedulingAlgorithm::Fifo,
        SchedulingAlgorithm::Priority,
        SchedulingAlgorithm::RoundRobin,
        SchedulingAlgorithm::ShortestJobFirst,
    ];
}
