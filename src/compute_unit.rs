/// Compute unit — the per-core execution domain of the device.
/// Each unit owns a set of assigned thread blocks and a bounded FIFO of
/// ready warps, and advances one scheduling cycle at a time: pull a warp,
/// retire an eight-instruction quantum, re-queue or complete the warp.
///
/// Lock discipline: the ready queue and the block list each have one lock.
/// `assign_block` nests block-list → ready-queue (in that order only); the
/// cycle loop takes the block list only to flag completed blocks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::memory::MemoryController;
use crate::types::{AtomicState, CoreId, ExecutionState};
use crate::warp::{ThreadBlock, Warp};

/// Instructions a warp retires per executed cycle when picked.
pub const INSTRUCTIONS_PER_CYCLE: usize = 8;
/// Lifetime instruction threshold after which a warp completes.
pub const WARP_INSTRUCTION_LIMIT: u64 = 1000;

// ---------------------------------------------------------------------------
// WarpScheduler
// ---------------------------------------------------------------------------

/// Bounded FIFO of ready warps. Strict arrival order, no priority, no aging.
pub struct WarpScheduler {
    ready_queue: Mutex<VecDeque<Arc<Warp>>>,
    max_warps: usize,
}

impl WarpScheduler {
    pub fn new(max_warps: usize) -> Self {
        WarpScheduler {
            ready_queue: Mutex::new(VecDeque::new()),
            max_warps,
        }
    }

    /// Enqueues a warp at the tail. Rejects when the queue is full or the
    /// warp is not `Ready`.
    pub fn add_warp(&self, warp: Arc<Warp>) -> bool {
        let mut queue = self.ready_queue.lock();
        if queue.len() >= self.max_warps {
            return false;
        }
        if warp.state() != ExecutionState::Ready {
            return false;
        }
        queue.push_back(warp);
        true
    }

    /// Dequeues the warp at the head, or `None` when empty.
    pub fn next_warp(&self) -> Option<Arc<Warp>> {
        self.ready_queue.lock().pop_front()
    }

    pub fn has_ready_warps(&self) -> bool {
        !self.ready_queue.lock().is_empty()
    }

    pub fn queue_size(&self) -> usize {
        self.ready_queue.lock().len()
    }
}

// ---------------------------------------------------------------------------
// ComputeUnit
// ---------------------------------------------------------------------------

/// Hardware capacity caps for one compute unit.
#[derive(Debug, Clone, Copy)]
pub struct CuLimits {
    pub max_warps: usize,
    pub max_threads: usize,
    pub max_blocks: usize,
}

impl Default for CuLimits {
    fn default() -> Self {
        CuLimits {
            max_warps: 64,
            max_threads: 2048,
            max_blocks: 16,
        }
    }
}

/// A compute unit (the SM analogue): holds up to `max_blocks` resident
/// thread blocks and interleaves their warps through the ready queue.
/// Shared between its executor thread and the distributor behind an `Arc`.
pub struct ComputeUnit {
    core_id: CoreId,
    active_blocks: Mutex<Vec<ThreadBlock>>,
    warp_scheduler: WarpScheduler,
    limits: CuLimits,

    state: AtomicState,
    running: AtomicBool,

    cycles_executed: AtomicU64,
    instructions_executed: AtomicU64,
    warps_executed: AtomicU64,
    idle_cycles: AtomicU64,
    cycles_stalled: AtomicU64,

    memory_controller: Arc<MemoryController>,
}

impl ComputeUnit {
    pub fn new(core_id: CoreId, limits: CuLimits, memory_controller: Arc<MemoryController>) -> Self {
        ComputeUnit {
            core_id,
            active_blocks: Mutex::new(Vec::new()),
            warp_scheduler: WarpScheduler::new(limits.max_warps),
            limits,
            state: AtomicState::new(ExecutionState::Idle),
            running: AtomicBool::new(false),
            cycles_executed: AtomicU64::new(0),
            instructions_executed: AtomicU64::new(0),
            warps_executed: AtomicU64::new(0),
            idle_cycles: AtomicU64::new(0),
            cycles_stalled: AtomicU64::new(0),
            memory_controller,
        }
    }

    pub fn core_id(&self) -> CoreId {
        self.core_id
    }

    pub fn state(&self) -> ExecutionState {
        self.state.load()
    }

    pub fn warp_scheduler(&self) -> &WarpScheduler {
        &self.warp_scheduler
    }

    // -----------------------------------------------------------------------
    // Block management
    // -----------------------------------------------------------------------

    fn occupancy_allows(&self, blocks: &[ThreadBlock], block: &ThreadBlock) -> bool {
        if blocks.len() >= self.limits.max_blocks {
            return false;
        }
        let current_warps: usize = blocks.iter().map(|b| b.num_warps()).sum();
        current_warps + block.num_warps() <= self.limits.max_warps
    }

    /// Advisory occupancy probe; `assign_block` re-checks under its lock.
    pub fn can_accept_block(&self, block: &ThreadBlock) -> bool {
        self.occupancy_allows(&self.active_blocks.lock(), block)
    }

    /// Takes ownership of a block: enqueues all of its warps and moves the
    /// block into the active set. On rejection the block is handed back.
    pub fn assign_block(&self, block: ThreadBlock) -> Result<(), ThreadBlock> {
        let mut blocks = self.active_blocks.lock();
        if !self.occupancy_allows(&blocks, &block) {
            return Err(block);
        }

        for warp in block.warps() {
            self.warp_scheduler.add_warp(Arc::clone(warp));
        }
        blocks.push(block);
        self.state.store(ExecutionState::Running);
        Ok(())
    }

    /// Drops every block whose completed flag is set; with nothing left the
    /// unit returns to `Idle`.
    pub fn remove_completed_blocks(&self) {
        let mut blocks = self.active_blocks.lock();
        blocks.retain(|block| !block.is_completed());
        if blocks.is_empty() {
            self.state.store(ExecutionState::Idle);
        }
    }

    pub fn active_block_count(&self) -> usize {
        self.active_blocks.lock().len()
    }

    pub fn active_warp_count(&self) -> usize {
        self.active_blocks.lock().iter().map(|b| b.num_warps()).sum()
    }

    pub fn active_thread_count(&self) -> usize {
        self.active_blocks
            .lock()
            .iter()
            .map(|b| b.num_threads())
            .sum()
    }

    pub fn is_idle(&self) -> bool {
        self.active_blocks.lock().is_empty() && self.state.load() == ExecutionState::Idle
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Retires `num_instructions` instructions on one warp. Every 5th
    /// instruction issues a memory op; every 10th additionally stalls the
    /// warp for latency/10 cycles charged to this unit.
    pub fn execute_warp(&self, warp: &Warp, num_instructions: usize) {
        warp.set_state(ExecutionState::Running);

        for i in 0..num_instructions {
            warp.record_instruction();
            warp.increment_pc();
            self.instructions_executed.fetch_add(1, Ordering::Relaxed);

            if i % 5 == 0 {
                self.memory_controller.record_memory_op();

                if i % 10 == 0 {
                    warp.set_state(ExecutionState::MemoryStalled);
                    warp.record_stall();
                    self.cycles_stalled.fetch_add(1, Ordering::Relaxed);

                    let stall_cycles =
                        self.memory_controller.global_memory().latency_cycles() / 10;
                    self.cycles_executed.fetch_add(stall_cycles, Ordering::Relaxed);

                    warp.set_state(ExecutionState::Running);
                }
            }
        }

        warp.set_state(ExecutionState::Ready);
        self.warps_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// One scheduling cycle: pull a warp, run its quantum, then either
    /// retire it (and flag any fully-completed blocks) or re-queue it.
    /// With no ready warp the cycle counts as idle.
    pub fn simulate_cycle(&self) {
        self.cycles_executed.fetch_add(1, Ordering::Relaxed);

        match self.warp_scheduler.next_warp() {
            Some(warp) => {
                self.execute_warp(&warp, INSTRUCTIONS_PER_CYCLE);

                if warp.instructions_executed() >= WARP_INSTRUCTION_LIMIT {
                    warp.set_state(ExecutionState::Completed);

                    let blocks = self.active_blocks.lock();
                    for block in blocks.iter() {
                        if block.all_warps_completed() {
                            block.mark_completed();
                        }
                    }
                } else {
                    self.warp_scheduler.add_warp(warp);
                }
            }
            None => {
                self.idle_cycles.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Arms the running flag. Called before the executor thread spawns so a
    /// stop that races the thread start still wins.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Executor loop: cycle while there is resident work, otherwise yield
    /// briefly. Returns once `stop` clears the running flag.
    pub fn run(&self) {
        while self.running.load(Ordering::SeqCst) {
            if self.active_block_count() > 0 && self.warp_scheduler.has_ready_warps() {
                self.simulate_cycle();
            } else {
                std::thread::sleep(Duration::from_micros(100));
            }
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    // -----------------------------------------------------------------------
    // Metrics
    // -----------------------------------------------------------------------

    pub fn cycles_executed(&self) -> u64 {
        self.cycles_executed.load(Ordering::Relaxed)
    }

    pub fn instructions_executed(&self) -> u64 {
        self.instructions_executed.load(Ordering::Relaxed)
    }

    pub fn warps_executed(&self) -> u64 {
        self.warps_executed.load(Ordering::Relaxed)
    }

    pub fn idle_cycles(&self) -> u64 {
        self.idle_cycles.load(Ordering::Relaxed)
    }

    pub fn cycles_stalled(&self) -> u64 {
        self.cycles_stalled.load(Ordering::Relaxed)
    }

    /// Active cycles over total cycles, as a percentage. Zero before the
    /// first cycle.
    pub fn utilization(&self) -> f64 {
        let total = self.cycles_executed.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let active = total - self.idle_cycles.load(Ordering::Relaxed);
        active as f64 / total as f64 * 100.0
    }

    pub fn reset_metrics(&self) {
        self.cycles_executed.store(0, Ordering::Relaxed);
        self.instructions_executed.store(0, Ordering::Relaxed);
        self.warps_executed.store(0, Ordering::Relaxed);
        self.idle_cycles.store(0, Ordering::Relaxed);
        self.cycles_stalled.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WARP_SIZE;

    fn test_cu() -> ComputeUnit {
        ComputeUnit::new(0, CuLimits::default(), Arc::new(MemoryController::default()))
    }

    #[test]
    fn warp_queue_is_strict_fifo() {
        let sched = WarpScheduler::new(4);
        let a = Arc::new(Warp::new(0, 0, WARP_SIZE));
        let b = Arc::new(Warp::new(1, 0, WARP_SIZE));
        assert!(sched.add_warp(Arc::clone(&a)));
        assert!(sched.add_warp(Arc::clone(&b)));
        assert_eq!(sched.queue_size(), 2);

        let first = sched.next_warp();
        assert_eq!(first.map(|w| w.warp_id()), Some(0));
        let second = sched.next_warp();
        assert_eq!(second.map(|w| w.warp_id()), Some(1));
        assert!(sched.next_warp().is_none());
        assert!(!sched.has_ready_warps());
    }

    #[test]
    fn warp_queue_rejects_overflow_and_non_ready_warps() {
        let sched = WarpScheduler::new(1);
        let a = Arc::new(Warp::new(0, 0, WARP_SIZE));
        let b = Arc::new(Warp::new(1, 0, WARP_SIZE));
        assert!(sched.add_warp(a));
        assert!(!sched.add_warp(Arc::clone(&b)), "queue is full");

        let sched = WarpScheduler::new(4);
        b.set_state(ExecutionState::Completed);
        assert!(!sched.add_warp(b), "completed warps are not schedulable");
        assert_eq!(sched.queue_size(), 0);
    }

    #[test]
    fn occupancy_enforces_block_and_warp_caps() {
        let cu = ComputeUnit::new(
            0,
            CuLimits { max_warps: 8, max_threads: 2048, max_blocks: 2 },
            Arc::new(MemoryController::default()),
        );

        // 8 warps fill the warp cap in one block
        assert!(cu.assign_block(ThreadBlock::new(0, 256)).is_ok());
        assert_eq!(cu.active_warp_count(), 8);
        assert_eq!(cu.state(), ExecutionState::Running);

        // warp cap blocks further assignment even though the block cap has room
        let rejected = cu.assign_block(ThreadBlock::new(1, 32));
        assert!(rejected.is_err());
        let handed_back = rejected.err().map(|b| b.block_id());
        assert_eq!(handed_back, Some(1));

        // block cap check
        let cu = ComputeUnit::new(
            1,
            CuLimits { max_warps: 64, max_threads: 2048, max_blocks: 1 },
            Arc::new(MemoryController::default()),
        );
        assert!(cu.assign_block(ThreadBlock::new(0, 32)).is_ok());
        assert!(!cu.can_accept_block(&ThreadBlock::new(1, 32)));
    }

    #[test]
    fn quantum_arithmetic_matches_the_simulated_workload_shape() {
        let cu = test_cu();
        let warp = Warp::new(0, 0, WARP_SIZE);

        cu.execute_warp(&warp, INSTRUCTIONS_PER_CYCLE);

        // 8 instructions, memory ops at i = 0 and 5, one stall at i = 0
        assert_eq!(warp.instructions_executed(), 8);
        assert_eq!(warp.program_counter(), 8);
        assert_eq!(warp.cycles_stalled(), 1);
        assert_eq!(cu.instructions_executed(), 8);
        assert_eq!(cu.cycles_stalled(), 1);
        assert_eq!(cu.memory_controller.total_memory_ops(), 2);
        // stall charges latency/10 = 40 cycles
        assert_eq!(cu.cycles_executed(), 40);
        assert_eq!(warp.state(), ExecutionState::Ready);
        assert_eq!(cu.warps_executed(), 1);
    }

    #[test]
    fn warp_completes_at_the_instruction_limit_and_block_is_reaped() {
        let cu = test_cu();
        assert!(cu.assign_block(ThreadBlock::new(0, WARP_SIZE)).is_ok());

        // 1000 instructions / 8 per cycle = 125 executed cycles
        let mut cycles = 0;
        while cu.warp_scheduler.has_ready_warps() {
            cu.simulate_cycle();
            cycles += 1;
            assert!(cycles <= 200, "warp failed to complete");
        }
        assert_eq!(cycles, 125);

        {
            let blocks = cu.active_blocks.lock();
            assert!(blocks[0].is_completed());
            assert!(blocks[0].all_warps_completed());
        }

        cu.remove_completed_blocks();
        assert_eq!(cu.active_block_count(), 0);
        assert!(cu.is_idle());
        assert_eq!(cu.state(), ExecutionState::Idle);
    }

    #[test]
    fn cycle_without_ready_warps_counts_idle() {
        let cu = test_cu();
        cu.simulate_cycle();
        cu.simulate_cycle();
        assert_eq!(cu.cycles_executed(), 2);
        assert_eq!(cu.idle_cycles(), 2);
        assert_eq!(cu.utilization(), 0.0);
    }

    #[test]
    fn utilization_is_active_over_total_cycles() {
        let cu = test_cu();
        assert_eq!(cu.utilization(), 0.0);

        assert!(cu.assign_block(ThreadBlock::new(0, WARP_SIZE)).is_ok());
        cu.simulate_cycle(); // active: 1 + 40 stall cycles
        cu.remove_completed_blocks();

        let total = cu.cycles_executed();
        let expected = (total - cu.idle_cycles()) as f64 / total as f64 * 100.0;
        assert!((cu.utilization() - expected).abs() < 1e-9);

        cu.reset_metrics();
        assert_eq!(cu.cycles_executed(), 0);
        assert_eq!(cu.utilization(), 0.0);
    }
}
