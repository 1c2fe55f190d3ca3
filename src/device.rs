/// Top-level device orchestrator.
/// Owns the compute units, the memory controller, the active workload
/// scheduler and the performance analyzer. `start` spawns one executor
/// thread per compute unit plus one distributor thread; the distributor
/// serializes workloads end-to-end — expand, place blocks first-fit over
/// the units, wait for drain, record metrics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::compute_unit::{ComputeUnit, CuLimits};
use crate::memory::MemoryController;
use crate::metrics::{self, LiveSnapshot, PerformanceAnalyzer};
use crate::scheduler::{SchedulingAlgorithm, WorkloadScheduler};
use crate::types::CoreId;
use crate::warp::ThreadBlock;
use crate::workload::Workload;

/// Device configuration. The default mirrors an RTX 3080-class part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub num_compute_units: usize,
    pub warps_per_cu: usize,
    pub threads_per_warp: usize,
    pub max_blocks_per_cu: usize,
    pub global_memory_size: usize,
    pub shared_memory_per_block: usize,
    pub device_name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            num_compute_units: 68,
            warps_per_cu: 64,
            threads_per_warp: 32,
            max_blocks_per_cu: 16,
            global_memory_size: 10 * 1024 * 1024 * 1024,
            shared_memory_per_block: 48 * 1024,
            device_name: "warpsim RTX 3080 profile".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// GpuDevice
// ---------------------------------------------------------------------------

pub struct GpuDevice {
    config: DeviceConfig,
    compute_units: Vec<Arc<ComputeUnit>>,
    memory_controller: Arc<MemoryController>,
    scheduler: Mutex<Arc<WorkloadScheduler>>,
    analyzer: Arc<PerformanceAnalyzer>,

    running: Arc<AtomicBool>,
    simulation_active: AtomicBool,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl GpuDevice {
    pub fn new(config: DeviceConfig) -> Self {
        let memory_controller = Arc::new(MemoryController::new(config.global_memory_size));
        let limits = CuLimits {
            max_warps: config.warps_per_cu,
            max_threads: 2048,
            max_blocks: config.max_blocks_per_cu,
        };
        let compute_units = (0..config.num_compute_units)
            .map(|id| {
                Arc::new(ComputeUnit::new(
                    id as CoreId,
                    limits,
                    Arc::clone(&memory_controller),
                ))
            })
            .collect::<Vec<_>>();

        info!(
            device = %config.device_name,
            compute_units = compute_units.len(),
            "initialized device"
        );

        GpuDevice {
            config,
            compute_units,
            memory_controller,
            scheduler: Mutex::new(Arc::new(SchedulingAlgorithm::Fifo.build())),
            analyzer: Arc::new(PerformanceAnalyzer::new()),
            running: Arc::new(AtomicBool::new(false)),
            simulation_active: AtomicBool::new(false),
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn num_compute_units(&self) -> usize {
        self.compute_units.len()
    }

    pub fn compute_units(&self) -> &[Arc<ComputeUnit>] {
        &self.compute_units
    }

    pub fn memory_controller(&self) -> &Arc<MemoryController> {
        &self.memory_controller
    }

    pub fn performance_analyzer(&self) -> &Arc<PerformanceAnalyzer> {
        &self.analyzer
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Scheduler management
    // -----------------------------------------------------------------------

    /// Replaces the active scheduling policy. Only valid while stopped; a
    /// running device keeps its scheduler.
    pub fn set_scheduler(&self, scheduler: WorkloadScheduler) {
        if self.is_running() {
            warn!("scheduler swap ignored: device is running");
            return;
        }
        *self.scheduler.lock() = Arc::new(scheduler);
    }

    pub fn scheduler(&self) -> Arc<WorkloadScheduler> {
        Arc::clone(&self.scheduler.lock())
    }

    // -----------------------------------------------------------------------
    // Workload management
    // -----------------------------------------------------------------------

    /// Materializes the workload's thread blocks and hands it to the active
    /// scheduler. Returns the shared handle.
    pub fn submit_workload(&self, workload: Workload) -> Arc<Workload> {
        workload.generate_thread_blocks();
        let workload = Arc::new(workload);
        self.scheduler.lock().add_workload(Arc::clone(&workload));

        info!(
            workload = workload.name(),
            blocks = workload.config().total_blocks(),
            threads = workload.config().total_threads(),
            "submitted workload"
        );
        workload
    }

    // -----------------------------------------------------------------------
    // Execution control
    // -----------------------------------------------------------------------

    /// Spawns the executor threads and the distributor. No-op while running.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.simulation_active.store(true, Ordering::SeqCst);
        self.analyzer.start_simulation();

        let mut handles = self.worker_handles.lock();

        for cu in &self.compute_units {
            cu.start();
            let cu = Arc::clone(cu);
            handles.push(std::thread::spawn(move || cu.run()));
        }

        let running = Arc::clone(&self.running);
        let scheduler = self.scheduler();
        let compute_units = self.compute_units.clone();
        let memory_controller = Arc::clone(&self.memory_controller);
        let analyzer = Arc::clone(&self.analyzer);
        handles.push(std::thread::spawn(move || {
            distributor_loop(running, scheduler, compute_units, memory_controller, analyzer);
        }));

        info!(
            compute_units = self.compute_units.len(),
            scheduler = self.scheduler.lock().name(),
            "device started"
        );
    }

    /// Stops every worker and finalizes the device metrics. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        for cu in &self.compute_units {
            cu.stop();
        }
        let handles = std::mem::take(&mut *self.worker_handles.lock());
        for handle in handles {
            let _ = handle.join();
        }

        if self.simulation_active.swap(false, Ordering::SeqCst) {
            self.analyzer.end_simulation();
            self.analyzer
                .record_device_metrics(&self.compute_units, &self.memory_controller);
        }

        info!("device stopped");
    }

    /// Polls until the scheduler has neither pending nor running workloads,
    /// then stops the device.
    pub fn wait_for_completion(&self) {
        loop {
            let scheduler = self.scheduler();
            if !scheduler.has_pending_workloads() && scheduler.running_count() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        self.stop();
    }

    /// Stops the device, zeroes every compute-unit counter and clears the
    /// analyzer.
    pub fn reset(&self) {
        self.stop();
        for cu in &self.compute_units {
            cu.reset_metrics();
        }
        self.analyzer.reset();
        info!("device reset");
    }

    // -----------------------------------------------------------------------
    // Resource queries
    // -----------------------------------------------------------------------

    pub fn total_active_blocks(&self) -> usize {
        self.compute_units
            .iter()
            .map(|cu| cu.active_block_count())
            .sum()
    }

    pub fn total_active_warps(&self) -> usize {
        self.compute_units
            .iter()
            .map(|cu| cu.active_warp_count())
            .sum()
    }

    pub fn average_utilization(&self) -> f64 {
        if self.compute_units.is_empty() {
            return 0.0;
        }
        let total: f64 = self.compute_units.iter().map(|cu| cu.utilization()).sum();
        total / self.compute_units.len() as f64
    }

    pub fn print_device_info(&self) {
        println!("\n========================================");
        println!("  DEVICE INFORMATION");
        println!("========================================");
        println!("Device Name: {}", self.config.device_name);
        println!("Compute Units: {}", self.config.num_compute_units);
        println!("Warps per CU: {}", self.config.warps_per_cu);
        println!("Threads per Warp: {}", self.config.threads_per_warp);
        println!("Max Blocks per CU: {}", self.config.max_blocks_per_cu);
        println!(
            "Global Memory: {} GB",
            self.config.global_memory_size / (1024 * 1024 * 1024)
        );
        println!(
            "Shared Memory per Block: {} KB",
            self.config.shared_memory_per_block / 1024
        );
        println!("========================================\n");
    }
}

impl Drop for GpuDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Distributor
// ---------------------------------------------------------------------------

/// Tries each compute unit in index order; the first one with capacity takes
/// the block. On failure the block travels back to the caller.
fn try_place(compute_units: &[Arc<ComputeUnit>], mut block: ThreadBlock) -> Result<(), ThreadBlock> {
    for cu in compute_units {
        match cu.assign_block(block) {
            Ok(()) => return Ok(()),
            Err(rejected) => block = rejected,
        }
    }
    Err(block)
}

/// The single long-running distributor task: pulls workloads from the
/// scheduler one at a time, places their blocks first-fit, waits for the
/// device to drain, then records metrics. A stop mid-workload abandons the
/// remaining blocks and leaves the workload unrecorded.
fn distributor_loop(
    running: Arc<AtomicBool>,
    scheduler: Arc<WorkloadScheduler>,
    compute_units: Vec<Arc<ComputeUnit>>,
    memory_controller: Arc<MemoryController>,
    analyzer: Arc<PerformanceAnalyzer>,
) {
    while running.load(Ordering::SeqCst) {
        if !scheduler.has_pending_workloads() {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }

        let workload = match scheduler.next_workload() {
            Some(w) => w,
            None => continue,
        };

        info!(workload = workload.name(), "starting workload");
        workload.start();
        write_progress_snapshot("running", &workload, &scheduler, &compute_units, &memory_controller);

        // Dispatch all blocks, LIFO over the generated sequence.
        let mut aborted = false;
        'dispatch: while workload.has_more_blocks() {
            let Some(mut block) = workload.next_block() else {
                break;
            };
            loop {
                match try_place(&compute_units, block) {
                    Ok(()) => break,
                    Err(rejected) => {
                        if !running.load(Ordering::SeqCst) {
                            aborted = true;
                            break 'dispatch;
                        }
                        block = rejected;
                        debug!(
                            workload = workload.name(),
                            block = block.block_id(),
                            "all units occupied, waiting"
                        );
                        std::thread::sleep(Duration::from_millis(1));
                        for cu in &compute_units {
                            cu.remove_completed_blocks();
                        }
                    }
                }
            }
        }
        if aborted {
            break;
        }

        // Wait for the device to drain.
        loop {
            let mut all_idle = true;
            for cu in &compute_units {
                cu.remove_completed_blocks();
                if !cu.is_idle() {
                    all_idle = false;
                }
            }
            if all_idle {
                break;
            }
            if !running.load(Ordering::SeqCst) {
                aborted = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        if aborted {
            break;
        }

        workload.complete();
        scheduler.mark_completed(&workload);
        info!(
            workload = workload.name(),
            elapsed_ms = workload.execution_time_ms(),
            "completed workload"
        );

        analyzer.record_workload_metrics(&workload, &compute_units, &memory_controller);
        write_progress_snapshot("complete", &workload, &scheduler, &compute_units, &memory_controller);
    }
}

fn write_progress_snapshot(
    status: &str,
    workload: &Workload,
    scheduler: &WorkloadScheduler,
    compute_units: &[Arc<ComputeUnit>],
    memory_controller: &MemoryController,
) {
    let snapshot = LiveSnapshot {
        status: status.to_string(),
        workload_name: workload.name().to_string(),
        scheduler_name: scheduler.name().to_string(),
        blocks_total: workload.config().total_blocks(),
        cu_active_blocks: compute_units
            .iter()
            .map(|cu| cu.active_block_count())
            .collect(),
        total_cycles: compute_units.iter().map(|cu| cu.cycles_executed()).sum(),
        total_instructions: compute_units
            .iter()
            .map(|cu| cu.instructions_executed())
            .sum(),
        total_memory_ops: memory_controller.total_memory_ops(),
        workloads_completed: scheduler.completed_count(),
        timestamp_ms: metrics::now_ms(),
    };
    metrics::write_snapshot(&snapshot);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionState;

    fn small_device(num_cus: usize) -> GpuDevice {
        GpuDevice::new(DeviceConfig {
            num_compute_units: num_cus,
            device_name: "test device".to_string(),
            ..DeviceConfig::default()
        })
    }

    #[test]
    fn submit_materializes_blocks() {
        let device = small_device(1);
        let workload = device.submit_workload(Workload::vector_add(1024));
        assert_eq!(workload.remaining_blocks(), 4);
        assert!(device.scheduler().has_pending_workloads());
    }

    #[test]
    fn scheduler_swap_is_rejected_while_running() {
        let device = small_device(1);
        device.start();
        device.set_scheduler(SchedulingAlgorithm::Priority.build());
        assert_eq!(device.scheduler().name(), "FIFO");
        device.stop();

        device.set_scheduler(SchedulingAlgorithm::Priority.build());
        assert_eq!(device.scheduler().name(), "Priority");
    }

    #[test]
    fn start_twice_is_a_no_op() {
        let device = small_device(1);
        device.start();
        assert!(device.is_running());
        device.start();
        assert!(device.is_running());
        device.stop();
        assert!(!device.is_running());
    }

    #[test]
    fn units_start_idle() {
        let device = small_device(2);
        for cu in device.compute_units() {
            assert_eq!(cu.state(), ExecutionState::Idle);
            assert!(cu.is_idle());
        }
        assert_eq!(device.total_active_blocks(), 0);
        assert_eq!(device.total_active_warps(), 0);
        assert_eq!(device.average_utilization(), 0.0);
    }
}
