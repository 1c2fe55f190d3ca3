/// Memory subsystem simulation.
/// Models the three memory tiers as latency-and-counter objects:
///   - GlobalMemory: device-wide GDDR/HBM (~400 cycle latency)
///   - SharedMemory: per-block scratchpad (~4 cycle latency)
///   - RegisterFile: per-thread 32-bit register storage
/// No data moves through the global/shared models; an access only checks
/// bounds and bumps counters. Latencies are consumed by the compute unit's
/// stall path, not here.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::types::{
    BlockId, MemoryAddress, ThreadId, GLOBAL_MEMORY_SIZE, REGISTERS_PER_THREAD,
    SHARED_MEMORY_PER_BLOCK,
};

pub const GLOBAL_MEMORY_LATENCY: u64 = 400;
pub const SHARED_MEMORY_LATENCY: u64 = 4;

/// Returns true when `[address, address + bytes)` fits in a region of
/// `size` bytes, without overflowing the address arithmetic.
fn in_bounds(address: MemoryAddress, bytes: usize, size: usize) -> bool {
    match address.checked_add(bytes as u64) {
        Some(end) => end <= size as u64,
        None => false,
    }
}

// ---------------------------------------------------------------------------
// GlobalMemory
// ---------------------------------------------------------------------------

/// Device global memory. Tracks read/write/byte counters; an out-of-range
/// access fails quietly and leaves every counter untouched.
pub struct GlobalMemory {
    size: usize,
    latency_cycles: u64,
    access_count: AtomicU64,
    read_count: AtomicU64,
    write_count: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
}

impl GlobalMemory {
    pub fn new(size: usize) -> Self {
        GlobalMemory {
            size,
            latency_cycles: GLOBAL_MEMORY_LATENCY,
            access_count: AtomicU64::new(0),
            read_count: AtomicU64::new(0),
            write_count: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    pub fn read(&self, address: MemoryAddress, bytes: usize) -> bool {
        if !in_bounds(address, bytes, self.size) {
            return false;
        }
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.read_count.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
        true
    }

    pub fn write(&self, address: MemoryAddress, bytes: usize) -> bool {
        if !in_bounds(address, bytes, self.size) {
            return false;
        }
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.write_count.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        true
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn latency_cycles(&self) -> u64 {
        self.latency_cycles
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.access_count.store(0, Ordering::Relaxed);
        self.read_count.store(0, Ordering::Relaxed);
        self.write_count.store(0, Ordering::Relaxed);
        self.bytes_read.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
    }
}

impl Default for GlobalMemory {
    fn default() -> Self {
        GlobalMemory::new(GLOBAL_MEMORY_SIZE)
    }
}

// ---------------------------------------------------------------------------
// SharedMemory
// ---------------------------------------------------------------------------

/// Per-block shared memory. Only the access counter is tracked.
pub struct SharedMemory {
    size: usize,
    latency_cycles: u64,
    access_count: AtomicU64,
    owner_block: BlockId,
}

impl SharedMemory {
    pub fn new(size: usize) -> Self {
        SharedMemory {
            size,
            latency_cycles: SHARED_MEMORY_LATENCY,
            access_count: AtomicU64::new(0),
            owner_block: 0,
        }
    }

    pub fn read(&self, address: MemoryAddress, bytes: usize) -> bool {
        if !in_bounds(address, bytes, self.size) {
            return false;
        }
        self.access_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn write(&self, address: MemoryAddress, bytes: usize) -> bool {
        if !in_bounds(address, bytes, self.size) {
            return false;
        }
        self.access_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn latency_cycles(&self) -> u64 {
        self.latency_cycles
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn set_owner(&mut self, block_id: BlockId) {
        self.owner_block = block_id;
    }

    pub fn owner(&self) -> BlockId {
        self.owner_block
    }

    pub fn clear(&self) {
        self.access_count.store(0, Ordering::Relaxed);
    }
}

impl Default for SharedMemory {
    fn default() -> Self {
        SharedMemory::new(SHARED_MEMORY_PER_BLOCK)
    }
}

// ---------------------------------------------------------------------------
// RegisterFile
// ---------------------------------------------------------------------------

/// Per-thread register file: bounded storage of 32-bit words. Unlike the
/// global/shared models this one really stores values.
pub struct RegisterFile {
    registers: Mutex<Vec<u32>>,
    owner_thread: ThreadId,
}

impl RegisterFile {
    pub fn new(num_registers: usize) -> Self {
        RegisterFile {
            registers: Mutex::new(vec![0; num_registers]),
            owner_thread: 0,
        }
    }

    /// Reads a register, or `None` when the index is out of range.
    pub fn read(&self, index: usize) -> Option<u32> {
        self.registers.lock().get(index).copied()
    }

    /// Writes a register. Returns false (leaving storage unmodified) when
    /// the index is out of range.
    pub fn write(&self, index: usize, value: u32) -> bool {
        let mut regs = self.registers.lock();
        match regs.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.registers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_owner(&mut self, thread_id: ThreadId) {
        self.owner_thread = thread_id;
    }

    pub fn owner(&self) -> ThreadId {
        self.owner_thread
    }

    pub fn clear(&self) {
        for reg in self.registers.lock().iter_mut() {
            *reg = 0;
        }
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        RegisterFile::new(REGISTERS_PER_THREAD)
    }
}

// ---------------------------------------------------------------------------
// MemoryController
// ---------------------------------------------------------------------------

/// Device-wide memory front end: owns the global memory model and the
/// counters every compute unit reports into. Shared across compute units
/// behind an `Arc`; all mutation is atomic increments.
pub struct MemoryController {
    global_memory: GlobalMemory,
    total_memory_ops: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl MemoryController {
    pub fn new(global_memory_size: usize) -> Self {
        MemoryController {
            global_memory: GlobalMemory::new(global_memory_size),
            total_memory_ops: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    pub fn global_memory(&self) -> &GlobalMemory {
        &self.global_memory
    }

    pub fn record_memory_op(&self) {
        self.total_memory_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_memory_ops(&self) -> u64 {
        self.total_memory_ops.load(Ordering::Relaxed)
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let total = hits + self.cache_misses.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }

    pub fn reset(&self) {
        self.global_memory.reset();
        self.total_memory_ops.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
    }
}

impl Default for MemoryController {
    fn default() -> Self {
        MemoryController::new(GLOBAL_MEMORY_SIZE)
    }
}
