/// Core identifiers, device constants and execution states shared by the
/// whole simulator.

use std::sync::atomic::{AtomicU8, Ordering};

pub type ThreadId = u32;
pub type WarpId = u32;
pub type BlockId = u32;
pub type CoreId = u32;
pub type MemoryAddress = u64;

/// Threads per warp (SIMT lockstep group).
pub const WARP_SIZE: usize = 32;
/// Hardware cap on threads in a single block; also the stride used to
/// derive globally unique thread IDs from (block, warp, lane).
pub const MAX_THREADS_PER_BLOCK: usize = 1024;
pub const MAX_BLOCKS_PER_GRID: usize = 65_535;

/// Default global memory capacity for a standalone memory controller.
pub const GLOBAL_MEMORY_SIZE: usize = 8 * 1024 * 1024 * 1024;
/// Shared memory owned by each thread block.
pub const SHARED_MEMORY_PER_BLOCK: usize = 48 * 1024;
/// 32-bit registers in each thread's register file.
pub const REGISTERS_PER_THREAD: usize = 255;

/// Lifecycle state of an execution entity (thread, warp, block or
/// compute unit). `Completed` is terminal.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Idle = 0,
    Ready = 1,
    Running = 2,
    MemoryStalled = 3,
    Completed = 4,
}

impl ExecutionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ExecutionState::Idle,
            1 => ExecutionState::Ready,
            2 => ExecutionState::Running,
            3 => ExecutionState::MemoryStalled,
            _ => ExecutionState::Completed,
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Idle          => write!(f, "Idle"),
            ExecutionState::Ready         => write!(f, "Ready"),
            ExecutionState::Running       => write!(f, "Running"),
            ExecutionState::MemoryStalled => write!(f, "MemoryStalled"),
            ExecutionState::Completed     => write!(f, "Completed"),
        }
    }
}

/// Lock-free cell holding an [`ExecutionState`]. State transitions are
/// published by the executing thread and observed by the distributor and
/// metrics readers without any lock.
#[derive(Debug)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    pub fn new(state: ExecutionState) -> Self {
        AtomicState(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> ExecutionState {
        ExecutionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: ExecutionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_state_round_trips_every_variant() {
        let cell = AtomicState::new(ExecutionState::Idle);
        for state in [
            ExecutionState::Idle,
            ExecutionState::Ready,
            ExecutionState::Running,
            ExecutionState::MemoryStalled,
            ExecutionState::Completed,
        ] {
            cell.store(state);
            assert_eq!(cell.load(), state);
        }
    }
}
