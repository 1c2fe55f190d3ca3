/// Workload definitions and launch geometry.
/// A workload is a named kernel launch: grid/block dimensions plus cost
/// estimates — mirroring the CUDA launch model without executing any real
/// kernel code. Factory constructors build the common launch shapes with
/// deterministic cost formulas.

use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::BlockId;
use crate::warp::ThreadBlock;

/// Grid and block dimensions across three axes (mirrors CUDA's dim3 pair).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KernelConfig {
    pub grid_dim_x: usize,
    pub grid_dim_y: usize,
    pub grid_dim_z: usize,
    pub block_dim_x: usize,
    pub block_dim_y: usize,
    pub block_dim_z: usize,
}

impl KernelConfig {
    pub fn new(gx: usize, gy: usize, gz: usize, bx: usize, by: usize, bz: usize) -> Self {
        KernelConfig {
            grid_dim_x: gx,
            grid_dim_y: gy,
            grid_dim_z: gz,
            block_dim_x: bx,
            block_dim_y: by,
            block_dim_z: bz,
        }
    }

    /// Total number of thread blocks in the grid.
    pub fn total_blocks(&self) -> usize {
        self.grid_dim_x * self.grid_dim_y * self.grid_dim_z
    }

    /// Total number of threads per block.
    pub fn threads_per_block(&self) -> usize {
        self.block_dim_x * self.block_dim_y * self.block_dim_z
    }

    pub fn total_threads(&self) -> usize {
        self.total_blocks() * self.threads_per_block()
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig::new(1, 1, 1, 256, 1, 1)
    }
}

/// Kind tag for the built-in workload shapes. The numeric value is the
/// ordinal written into CSV exports.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadType {
    MatrixMultiply = 0,
    Convolution = 1,
    VectorAdd = 2,
    Reduction = 3,
    Custom = 4,
}

// ---------------------------------------------------------------------------
// Workload
// ---------------------------------------------------------------------------

/// A named kernel launch scheduled at device level.
///
/// Lifecycle: construct (or use a factory), tune priority/estimates, submit.
/// The device materializes the thread blocks; the distributor then consumes
/// them one by one — `next_block` pops from the back, so dispatch order is
/// the reverse of grid-index order. `start`/`complete` stamp a monotonic
/// clock around the whole launch.
pub struct Workload {
    name: String,
    workload_type: WorkloadType,
    config: KernelConfig,
    priority: i32,
    estimated_instructions: u64,
    estimated_memory_ops: u64,

    thread_blocks: Mutex<Vec<ThreadBlock>>,
    start_time: Mutex<Option<Instant>>,
    end_time: Mutex<Option<Instant>>,
}

impl Workload {
    pub fn new(name: impl Into<String>, workload_type: WorkloadType, config: KernelConfig) -> Self {
        Workload {
            name: name.into(),
            workload_type,
            config,
            priority: 0,
            estimated_instructions: 0,
            estimated_memory_ops: 0,
            thread_blocks: Mutex::new(Vec::new()),
            start_time: Mutex::new(None),
            end_time: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workload_type(&self) -> WorkloadType {
        self.workload_type
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    pub fn estimated_instructions(&self) -> u64 {
        self.estimated_instructions
    }

    pub fn set_estimated_instructions(&mut self, count: u64) {
        self.estimated_instructions = count;
    }

    pub fn estimated_memory_ops(&self) -> u64 {
        self.estimated_memory_ops
    }

    pub fn set_estimated_memory_ops(&mut self, count: u64) {
        self.estimated_memory_ops = count;
    }

    // -----------------------------------------------------------------------
    // Block management
    // -----------------------------------------------------------------------

    /// Expands the launch geometry into thread blocks. Block index `i` maps
    /// to grid position (i mod X, (i div X) mod Y, i div X*Y). Re-invocation
    /// rebuilds the same sequence from scratch.
    pub fn generate_thread_blocks(&self) {
        let mut blocks = self.thread_blocks.lock();
        blocks.clear();

        let total_blocks = self.config.total_blocks();
        let threads_per_block = self.config.threads_per_block();
        let grid_xy = self.config.grid_dim_x * self.config.grid_dim_y;

        blocks.reserve(total_blocks);
        for i in 0..total_blocks {
            let mut block = ThreadBlock::new(i as BlockId, threads_per_block);

            let z = i / grid_xy;
            let remaining = i % grid_xy;
            let y = remaining / self.config.grid_dim_x;
            let x = remaining % self.config.grid_dim_x;
            block.set_grid_position(x, y, z);

            blocks.push(block);
        }
    }

    /// Removes and returns the last not-yet-dispatched block (LIFO).
    pub fn next_block(&self) -> Option<ThreadBlock> {
        self.thread_blocks.lock().pop()
    }

    pub fn has_more_blocks(&self) -> bool {
        !self.thread_blocks.lock().is_empty()
    }

    pub fn remaining_blocks(&self) -> usize {
        self.thread_blocks.lock().len()
    }

    // -----------------------------------------------------------------------
    // Execution tracking
    // -----------------------------------------------------------------------

    pub fn start(&self) {
        *self.start_time.lock() = Some(Instant::now());
    }

    pub fn complete(&self) {
        *self.end_time.lock() = Some(Instant::now());
    }

    pub fn is_completed(&self) -> bool {
        self.end_time.lock().is_some()
    }

    pub fn started_at(&self) -> Option<Instant> {
        *self.start_time.lock()
    }

    /// Wall-clock time from `start` to `complete` in milliseconds
    /// (microsecond precision). Zero until the workload has completed.
    pub fn execution_time_ms(&self) -> f64 {
        let start = match *self.start_time.lock() {
            Some(t) => t,
            None => return 0.0,
        };
        let end = match *self.end_time.lock() {
            Some(t) => t,
            None => return 0.0,
        };
        end.duration_since(start).as_micros() as f64 / 1000.0
    }

    // -----------------------------------------------------------------------
    // Factory constructors
    // -----------------------------------------------------------------------

    /// Tiled matrix multiply C[M×N] = A[M×K] · B[K×N]: 16×16 thread tiles,
    /// one tile per block. Each output element costs K multiply-adds.
    pub fn matrix_multiply(m: usize, n: usize, k: usize) -> Self {
        let grid_x = m.div_ceil(16);
        let grid_y = n.div_ceil(16);
        let config = KernelConfig::new(grid_x, grid_y, 1, 16, 16, 1);

        let mut workload = Workload::new(
            format!("MatrixMultiply_{m}x{n}x{k}"),
            WorkloadType::MatrixMultiply,
            config,
        );
        workload.set_estimated_instructions((m * n * k) as u64 * 2);
        workload.set_estimated_memory_ops((m * n) as u64 * (k + 2) as u64);
        workload
    }

    /// 3×3 convolution over a NCHW tensor, one thread per output element.
    pub fn convolution(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        let total_outputs = batch * channels * height * width;
        let threads_per_block = 256;
        let num_blocks = total_outputs.div_ceil(threads_per_block);
        let config = KernelConfig::new(num_blocks, 1, 1, threads_per_block, 1, 1);

        let mut workload = Workload::new(
            format!("Convolution_{batch}x{channels}x{height}x{width}"),
            WorkloadType::Convolution,
            config,
        );
        // 9 multiply-adds per output
        workload.set_estimated_instructions(total_outputs as u64 * 9 * 2);
        workload.set_estimated_memory_ops(total_outputs as u64 * 10);
        workload
    }

    /// Element-wise vector addition: load, add, store per element.
    pub fn vector_add(size: usize) -> Self {
        let threads_per_block = 256;
        let num_blocks = size.div_ceil(threads_per_block);
        let config = KernelConfig::new(num_blocks, 1, 1, threads_per_block, 1, 1);

        let mut workload = Workload::new(
            format!("VectorAdd_{size}"),
            WorkloadType::VectorAdd,
            config,
        );
        workload.set_estimated_instructions(size as u64 * 2);
        workload.set_estimated_memory_ops(size as u64 * 3);
        workload
    }

    /// Tree reduction over `size` elements: log2(size) combining steps.
    pub fn reduction(size: usize) -> Self {
        let threads_per_block = 256;
        let num_blocks = size.div_ceil(threads_per_block);
        let config = KernelConfig::new(num_blocks, 1, 1, threads_per_block, 1, 1);

        let mut workload = Workload::new(
            format!("Reduction_{size}"),
            WorkloadType::Reduction,
            config,
        );
        let steps = size.checked_ilog2().unwrap_or(0) as u64;
        workload.set_estimated_instructions(size as u64 * steps);
        workload.set_estimated_memory_ops(size as u64 * 2);
        workload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_add_geometry_and_estimates() {
        let w = Workload::vector_add(1024);
        assert_eq!(w.config().total_blocks(), 4);
        assert_eq!(w.config().threads_per_block(), 256);
        assert_eq!(w.estimated_instructions(), 2048);
        assert_eq!(w.estimated_memory_ops(), 3072);
        assert_eq!(w.workload_type(), WorkloadType::VectorAdd);
    }

    #[test]
    fn matrix_multiply_geometry() {
        let w = Workload::matrix_multiply(512, 512, 512);
        assert_eq!(w.config().grid_dim_x, 32);
        assert_eq!(w.config().grid_dim_y, 32);
        assert_eq!(w.config().grid_dim_z, 1);
        assert_eq!(w.config().total_blocks(), 1024);
        assert_eq!(w.config().threads_per_block(), 256);
        assert_eq!(w.config().total_threads(), 262_144);
        assert_eq!(w.estimated_instructions(), 268_435_456);
    }

    #[test]
    fn reduction_estimate_uses_floor_log2() {
        let w = Workload::reduction(1 << 20);
        assert_eq!(w.estimated_instructions(), (1u64 << 20) * 20);
        assert_eq!(w.estimated_memory_ops(), (1u64 << 20) * 2);

        // degenerate sizes must not panic
        let tiny = Workload::reduction(1);
        assert_eq!(tiny.estimated_instructions(), 0);
    }

    #[test]
    fn block_generation_is_deterministic() {
        let w = Workload::matrix_multiply(64, 48, 8);
        w.generate_thread_blocks();
        let first_count = w.remaining_blocks();

        let mut positions = Vec::new();
        while let Some(block) = w.next_block() {
            positions.push(block.grid_position());
        }

        w.generate_thread_blocks();
        assert_eq!(w.remaining_blocks(), first_count);
        let mut again = Vec::new();
        while let Some(block) = w.next_block() {
            again.push(block.grid_position());
        }
        assert_eq!(positions, again);
    }

    #[test]
    fn blocks_dispatch_in_reverse_grid_order() {
        let w = Workload::new(
            "grid",
            WorkloadType::Custom,
            KernelConfig::new(2, 2, 2, 32, 1, 1),
        );
        w.generate_thread_blocks();
        assert_eq!(w.remaining_blocks(), 8);

        // Last generated block comes out first, at the far grid corner.
        let first_out = w.next_block().map(|b| (b.block_id(), b.grid_position()));
        assert_eq!(first_out, Some((7, (1, 1, 1))));

        let mut ids = vec![7];
        while let Some(block) = w.next_block() {
            ids.push(block.block_id());
        }
        assert_eq!(ids, vec![7, 6, 5, 4, 3, 2, 1, 0]);
        assert!(!w.has_more_blocks());
    }

    #[test]
    fn grid_positions_follow_row_major_order() {
        let w = Workload::new(
            "positions",
            WorkloadType::Custom,
            KernelConfig::new(3, 2, 1, 32, 1, 1),
        );
        w.generate_thread_blocks();

        let mut positions = Vec::new();
        while let Some(block) = w.next_block() {
            positions.push(block.grid_position());
        }
        positions.reverse(); // back to generation order
        assert_eq!(
            positions,
            vec![(0, 0, 0), (1, 0, 0), (2, 0, 0), (0, 1, 0), (1, 1, 0), (2, 1, 0)]
        );
    }

    #[test]
    fn execution_time_is_zero_until_completed() {
        let w = Workload::vector_add(256);
        assert_eq!(w.execution_time_ms(), 0.0);
        w.start();
        assert_eq!(w.execution_time_ms(), 0.0);
        w.complete();
        assert!(w.is_completed());
        assert!(w.execution_time_ms() >= 0.0);
    }
}
