/// Thread, Warp and ThreadBlock — the structural model of a launched kernel.
/// A warp is a group of up to 32 threads executing in SIMT lockstep; a
/// thread block groups warps around one shared-memory region.
///
/// Warps are shared (`Arc`) between the owning block and the per-unit ready
/// queue, so every mutable field is an atomic: the per-cycle execution loop
/// advances warps without ever taking the block lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::memory::{RegisterFile, SharedMemory};
use crate::types::{
    AtomicState, BlockId, ExecutionState, ThreadId, WarpId, MAX_THREADS_PER_BLOCK, WARP_SIZE,
};

// ---------------------------------------------------------------------------
// Thread
// ---------------------------------------------------------------------------

/// A single simulated thread. Owns its register file; belongs to exactly
/// one warp and one block.
pub struct Thread {
    thread_id: ThreadId,
    warp_id: WarpId,
    block_id: BlockId,
    state: AtomicState,
    registers: RegisterFile,
}

impl Thread {
    pub fn new(thread_id: ThreadId, warp_id: WarpId, block_id: BlockId) -> Self {
        let mut registers = RegisterFile::default();
        registers.set_owner(thread_id);
        Thread {
            thread_id,
            warp_id,
            block_id,
            state: AtomicState::new(ExecutionState::Ready),
            registers,
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn warp_id(&self) -> WarpId {
        self.warp_id
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub fn state(&self) -> ExecutionState {
        self.state.load()
    }

    pub fn set_state(&self, state: ExecutionState) {
        self.state.store(state);
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }
}

// ---------------------------------------------------------------------------
// Warp
// ---------------------------------------------------------------------------

/// A warp: up to [`WARP_SIZE`] threads advancing one program counter in
/// lockstep. The PC and the instruction counter only ever grow; `Completed`
/// is a terminal state.
pub struct Warp {
    warp_id: WarpId,
    block_id: BlockId,
    threads: Vec<Thread>,
    state: AtomicState,
    program_counter: AtomicU64,
    /// Bit i set = lane i active. All-ones for the thread count at launch.
    active_mask: AtomicU64,
    instructions_executed: AtomicU64,
    cycles_stalled: AtomicU64,
}

impl Warp {
    pub fn new(warp_id: WarpId, block_id: BlockId, num_threads: usize) -> Self {
        let threads = (0..num_threads)
            .map(|lane| {
                let tid = block_id * MAX_THREADS_PER_BLOCK as u32
                    + warp_id * WARP_SIZE as u32
                    + lane as u32;
                Thread::new(tid, warp_id, block_id)
            })
            .collect();

        Warp {
            warp_id,
            block_id,
            threads,
            state: AtomicState::new(ExecutionState::Ready),
            program_counter: AtomicU64::new(0),
            active_mask: AtomicU64::new((1u64 << num_threads) - 1),
            instructions_executed: AtomicU64::new(0),
            cycles_stalled: AtomicU64::new(0),
        }
    }

    pub fn warp_id(&self) -> WarpId {
        self.warp_id
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn state(&self) -> ExecutionState {
        self.state.load()
    }

    pub fn set_state(&self, state: ExecutionState) {
        self.state.store(state);
    }

    pub fn program_counter(&self) -> u64 {
        self.program_counter.load(Ordering::Relaxed)
    }

    pub fn increment_pc(&self) {
        self.program_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_mask(&self) -> u64 {
        self.active_mask.load(Ordering::Relaxed)
    }

    pub fn set_active_mask(&self, mask: u64) {
        self.active_mask.store(mask, Ordering::Relaxed);
    }

    pub fn record_instruction(&self) {
        self.instructions_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stall(&self) {
        self.cycles_stalled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn instructions_executed(&self) -> u64 {
        self.instructions_executed.load(Ordering::Relaxed)
    }

    pub fn cycles_stalled(&self) -> u64 {
        self.cycles_stalled.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// ThreadBlock
// ---------------------------------------------------------------------------

/// A thread block: the warps of one grid cell plus their shared memory.
/// Moves wholesale from the workload into exactly one compute unit; the
/// block keeps owning its warps for their whole lifetime.
pub struct ThreadBlock {
    block_id: BlockId,
    warps: Vec<Arc<Warp>>,
    shared_memory: SharedMemory,
    state: AtomicState,
    grid_position: (usize, usize, usize),
    completed: AtomicBool,
}

impl ThreadBlock {
    pub fn new(block_id: BlockId, num_threads: usize) -> Self {
        let num_warps = num_threads.div_ceil(WARP_SIZE);
        let warps = (0..num_warps)
            .map(|w| {
                let threads_in_warp = WARP_SIZE.min(num_threads - w * WARP_SIZE);
                Arc::new(Warp::new(w as WarpId, block_id, threads_in_warp))
            })
            .collect();

        let mut shared_memory = SharedMemory::default();
        shared_memory.set_owner(block_id);

        ThreadBlock {
            block_id,
            warps,
            shared_memory,
            state: AtomicState::new(ExecutionState::Ready),
            grid_position: (0, 0, 0),
            completed: AtomicBool::new(false),
        }
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub fn num_warps(&self) -> usize {
        self.warps.len()
    }

    pub fn warps(&self) -> &[Arc<Warp>] {
        &self.warps
    }

    pub fn warp(&self, index: usize) -> Option<&Arc<Warp>> {
        self.warps.get(index)
    }

    pub fn num_threads(&self) -> usize {
        self.warps.iter().map(|w| w.num_threads()).sum()
    }

    pub fn shared_memory(&self) -> &SharedMemory {
        &self.shared_memory
    }

    pub fn state(&self) -> ExecutionState {
        self.state.load()
    }

    pub fn set_state(&self, state: ExecutionState) {
        self.state.store(state);
    }

    pub fn set_grid_position(&mut self, x: usize, y: usize, z: usize) {
        self.grid_position = (x, y, z);
    }

    pub fn grid_position(&self) -> (usize, usize, usize) {
        self.grid_position
    }

    /// True when every owned warp has reached `Completed`.
    pub fn all_warps_completed(&self) -> bool {
        self.warps
            .iter()
            .all(|w| w.state() == ExecutionState::Completed)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// One-way: once a block is flagged completed it stays completed.
    pub fn mark_completed(&self) {
        self.completed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warp_derives_thread_ids_from_coordinates() {
        let warp = Warp::new(2, 3, WARP_SIZE);
        assert_eq!(warp.num_threads(), WARP_SIZE);
        let first = warp.threads().first().map(|t| t.thread_id());
        assert_eq!(
            first,
            Some(3 * MAX_THREADS_PER_BLOCK as u32 + 2 * WARP_SIZE as u32)
        );
        assert_eq!(warp.active_mask(), u32::MAX as u64);
        assert_eq!(warp.state(), ExecutionState::Ready);
    }

    #[test]
    fn partial_warp_masks_only_its_lanes() {
        let warp = Warp::new(0, 0, 5);
        assert_eq!(warp.num_threads(), 5);
        assert_eq!(warp.active_mask(), 0b11111);
    }

    #[test]
    fn pc_and_instruction_counter_only_grow() {
        let warp = Warp::new(0, 0, WARP_SIZE);
        for _ in 0..10 {
            warp.increment_pc();
            warp.record_instruction();
        }
        assert_eq!(warp.program_counter(), 10);
        assert_eq!(warp.instructions_executed(), 10);
    }

    #[test]
    fn block_splits_threads_into_warps_with_trailing_remainder() {
        let block = ThreadBlock::new(0, 100);
        assert_eq!(block.num_warps(), 4);
        assert_eq!(block.num_threads(), 100);
        let trailing = block.warp(3).map(|w| w.num_threads());
        assert_eq!(trailing, Some(4));
        assert_eq!(block.state(), ExecutionState::Ready);
        assert!(!block.is_completed());
    }

    #[test]
    fn block_completion_tracks_warp_states() {
        let block = ThreadBlock::new(7, 64);
        assert!(!block.all_warps_completed());

        for warp in block.warps() {
            warp.set_state(ExecutionState::Completed);
        }
        assert!(block.all_warps_completed());

        block.mark_completed();
        assert!(block.is_completed());
    }

    #[test]
    fn shared_memory_owner_matches_block() {
        let block = ThreadBlock::new(9, 32);
        assert_eq!(block.shared_memory().owner(), 9);
    }
}
