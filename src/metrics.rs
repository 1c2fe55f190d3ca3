/// Performance metrics collection and reporting.
///
/// The `PerformanceAnalyzer` records one row per completed workload (CU
/// counters are sampled cumulatively at completion time, so successive rows
/// are monotonically non-decreasing) plus a device-wide summary at
/// simulation end. `SchedulerComparison` lines up one analyzer per
/// scheduling policy and picks the winner by total execution time.
///
/// The distributor also writes a JSON snapshot to SNAPSHOT_PATH after every
/// workload so external dashboards can poll progress. Writes are atomic
/// (write to .tmp then rename) to avoid torn reads.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compute_unit::ComputeUnit;
use crate::memory::MemoryController;
use crate::workload::{Workload, WorkloadType};

pub const SNAPSHOT_PATH: &str = "/tmp/warpsim_live.json";

/// Failure while exporting a report. Exports are best-effort: callers log
/// the error and keep the simulation results in memory.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Metric rows
// ---------------------------------------------------------------------------

/// Metrics recorded for a single completed workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadMetrics {
    pub workload_name: String,
    pub workload_type: WorkloadType,
    pub execution_time_ms: f64,
    pub instructions_executed: u64,
    pub memory_operations: u64,
    pub cycles_executed: u64,
    pub average_cu_utilization: f64,
    pub total_threads: usize,
    pub total_blocks: usize,
    /// Instructions per millisecond.
    pub throughput: f64,
}

/// Device-wide metrics at simulation end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceMetrics {
    pub total_cycles: u64,
    pub total_instructions: u64,
    pub total_memory_ops: u64,
    pub total_execution_time_ms: f64,
    pub average_utilization: f64,
    pub total_workloads_executed: usize,
}

// ---------------------------------------------------------------------------
// PerformanceAnalyzer
// ---------------------------------------------------------------------------

/// Collects workload rows during a run and the device summary at the end.
pub struct PerformanceAnalyzer {
    workload_metrics: Mutex<Vec<WorkloadMetrics>>,
    device_metrics: Mutex<DeviceMetrics>,
    sim_start: Mutex<Option<Instant>>,
    sim_end: Mutex<Option<Instant>>,
}

impl PerformanceAnalyzer {
    pub fn new() -> Self {
        PerformanceAnalyzer {
            workload_metrics: Mutex::new(Vec::new()),
            device_metrics: Mutex::new(DeviceMetrics::default()),
            sim_start: Mutex::new(None),
            sim_end: Mutex::new(None),
        }
    }

    /// Records one row for a completed workload, aggregating the (cumulative)
    /// counters of every compute unit at this instant.
    pub fn record_workload_metrics(
        &self,
        workload: &Workload,
        compute_units: &[Arc<ComputeUnit>],
        memory_controller: &MemoryController,
    ) {
        let mut instructions = 0u64;
        let mut cycles = 0u64;
        let mut total_utilization = 0.0;
        for cu in compute_units {
            instructions += cu.instructions_executed();
            cycles += cu.cycles_executed();
            total_utilization += cu.utilization();
        }
        let average_cu_utilization = if compute_units.is_empty() {
            0.0
        } else {
            total_utilization / compute_units.len() as f64
        };

        let execution_time_ms = workload.execution_time_ms();
        let throughput = if execution_time_ms > 0.0 {
            instructions as f64 / execution_time_ms
        } else {
            0.0
        };

        self.workload_metrics.lock().push(WorkloadMetrics {
            workload_name: workload.name().to_string(),
            workload_type: workload.workload_type(),
            execution_time_ms,
            instructions_executed: instructions,
            memory_operations: memory_controller.total_memory_ops(),
            cycles_executed: cycles,
            average_cu_utilization,
            total_threads: workload.config().total_threads(),
            total_blocks: workload.config().total_blocks(),
            throughput,
        });
    }

    /// Records the device summary. Called once when the device stops.
    pub fn record_device_metrics(
        &self,
        compute_units: &[Arc<ComputeUnit>],
        memory_controller: &MemoryController,
    ) {
        let mut metrics = self.device_metrics.lock();
        metrics.total_cycles = 0;
        metrics.total_instructions = 0;
        let mut total_utilization = 0.0;
        for cu in compute_units {
            metrics.total_cycles += cu.cycles_executed();
            metrics.total_instructions += cu.instructions_executed();
            total_utilization += cu.utilization();
        }
        metrics.average_utilization = if compute_units.is_empty() {
            0.0
        } else {
            total_utilization / compute_units.len() as f64
        };
        metrics.total_memory_ops = memory_controller.total_memory_ops();
        metrics.total_execution_time_ms = self.total_simulation_time_ms();
        metrics.total_workloads_executed = self.workload_metrics.lock().len();
    }

    pub fn start_simulation(&self) {
        *self.sim_start.lock() = Some(Instant::now());
    }

    pub fn end_simulation(&self) {
        *self.sim_end.lock() = Some(Instant::now());
    }

    /// Wall-clock span between `start_simulation` and `end_simulation`
    /// in milliseconds; zero while either stamp is missing.
    pub fn total_simulation_time_ms(&self) -> f64 {
        let start = match *self.sim_start.lock() {
            Some(t) => t,
            None => return 0.0,
        };
        let end = match *self.sim_end.lock() {
            Some(t) => t,
            None => return 0.0,
        };
        end.duration_since(start).as_secs_f64() * 1000.0
    }

    pub fn workload_metrics(&self) -> Vec<WorkloadMetrics> {
        self.workload_metrics.lock().clone()
    }

    pub fn device_metrics(&self) -> DeviceMetrics {
        self.device_metrics.lock().clone()
    }

    // -----------------------------------------------------------------------
    // Analysis
    // -----------------------------------------------------------------------

    pub fn average_throughput(&self) -> f64 {
        let rows = self.workload_metrics.lock();
        if rows.is_empty() {
            return 0.0;
        }
        rows.iter().map(|m| m.throughput).sum::<f64>() / rows.len() as f64
    }

    pub fn average_workload_time_ms(&self) -> f64 {
        let rows = self.workload_metrics.lock();
        if rows.is_empty() {
            return 0.0;
        }
        rows.iter().map(|m| m.execution_time_ms).sum::<f64>() / rows.len() as f64
    }

    pub fn fastest_workload(&self) -> Option<WorkloadMetrics> {
        let rows = self.workload_metrics.lock();
        rows.iter()
            .min_by(|a, b| a.execution_time_ms.total_cmp(&b.execution_time_ms))
            .cloned()
    }

    pub fn slowest_workload(&self) -> Option<WorkloadMetrics> {
        let rows = self.workload_metrics.lock();
        rows.iter()
            .max_by(|a, b| a.execution_time_ms.total_cmp(&b.execution_time_ms))
            .cloned()
    }

    // -----------------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------------

    pub fn print_summary(&self) {
        let metrics = self.device_metrics();
        println!("\n========================================");
        println!("      PERFORMANCE SUMMARY");
        println!("========================================\n");
        println!(
            "Total Simulation Time: {:.2} ms",
            metrics.total_execution_time_ms
        );
        println!("Workloads Executed: {}", metrics.total_workloads_executed);
        println!("Total Instructions: {}", metrics.total_instructions);
        println!("Total Memory Operations: {}", metrics.total_memory_ops);
        println!(
            "Average Device Utilization: {:.2}%",
            metrics.average_utilization
        );
        println!(
            "Average Throughput: {:.2} instr/ms",
            self.average_throughput()
        );
        println!("\n========================================\n");
    }

    pub fn print_detailed_report(&self) {
        self.print_summary();
        println!("WORKLOAD DETAILS:");
        println!("----------------------------------------");
        for m in self.workload_metrics.lock().iter() {
            println!("\nWorkload: {}", m.workload_name);
            println!("  Execution Time: {:.2} ms", m.execution_time_ms);
            println!("  Instructions: {}", m.instructions_executed);
            println!("  Memory Ops: {}", m.memory_operations);
            println!("  Threads: {}", m.total_threads);
            println!("  Blocks: {}", m.total_blocks);
            println!("  Avg CU Utilization: {:.2}%", m.average_cu_utilization);
            println!("  Throughput: {:.2} instr/ms", m.throughput);
        }
        println!("\n========================================");
    }

    /// Writes the per-workload rows as CSV. The type column carries the
    /// workload-kind ordinal; floats keep two fractional digits.
    pub fn export_to_csv(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let mut out = String::new();
        out.push_str(
            "Workload,Type,Execution_Time_ms,Instructions,Memory_Ops,Threads,Blocks,Utilization_%,Throughput_instr_ms\n",
        );
        for m in self.workload_metrics.lock().iter() {
            let _ = writeln!(
                out,
                "{},{},{:.2},{},{},{},{},{:.2},{:.2}",
                m.workload_name,
                m.workload_type as u8,
                m.execution_time_ms,
                m.instructions_executed,
                m.memory_operations,
                m.total_threads,
                m.total_blocks,
                m.average_cu_utilization,
                m.throughput,
            );
        }
        std::fs::write(path, out)?;
        Ok(())
    }

    pub fn reset(&self) {
        self.workload_metrics.lock().clear();
        *self.device_metrics.lock() = DeviceMetrics::default();
        *self.sim_start.lock() = None;
        *self.sim_end.lock() = None;
    }
}

impl Default for PerformanceAnalyzer {
    fn default() -> Self {
        PerformanceAnalyzer::new()
    }
}

// ---------------------------------------------------------------------------
// SchedulerComparison
// ---------------------------------------------------------------------------

/// Lines up one analyzer per scheduling policy over the same workload mix.
/// Keyed by scheduler name; iteration (and reports) follow name order.
#[derive(Default)]
pub struct SchedulerComparison {
    analyzers: BTreeMap<String, Arc<PerformanceAnalyzer>>,
}

impl SchedulerComparison {
    pub fn new() -> Self {
        SchedulerComparison {
            analyzers: BTreeMap::new(),
        }
    }

    pub fn add_analyzer(&mut self, scheduler_name: impl Into<String>, analyzer: Arc<PerformanceAnalyzer>) {
        self.analyzers.insert(scheduler_name.into(), analyzer);
    }

    /// The scheduler with the smallest positive total execution time.
    pub fn best_scheduler(&self) -> Option<String> {
        let mut best: Option<(&str, f64)> = None;
        for (name, analyzer) in &self.analyzers {
            let time = analyzer.device_metrics().total_execution_time_ms;
            if time <= 0.0 {
                continue;
            }
            match best {
                Some((_, t)) if t <= time => {}
                _ => best = Some((name, time)),
            }
        }
        best.map(|(name, _)| name.to_string())
    }

    pub fn print_comparison(&self) {
        println!("\n========================================");
        println!("   SCHEDULER COMPARISON");
        println!("========================================\n");
        println!(
            "{:<20}{:<15}{:<15}{:<15}",
            "Scheduler", "Total Time(ms)", "Avg Util(%)", "Throughput"
        );
        println!("----------------------------------------");
        for (name, analyzer) in &self.analyzers {
            let metrics = analyzer.device_metrics();
            println!(
                "{:<20}{:<15.2}{:<15.2}{:<15.2}",
                name,
                metrics.total_execution_time_ms,
                metrics.average_utilization,
                analyzer.average_throughput(),
            );
        }
        println!(
            "\nBest Scheduler: {}",
            self.best_scheduler().unwrap_or_else(|| "None".to_string())
        );
        println!("========================================\n");
    }

    pub fn export_comparison_csv(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let mut out = String::new();
        out.push_str(
            "Scheduler,Total_Time_ms,Avg_Utilization_%,Avg_Throughput,Total_Instructions,Total_Memory_Ops\n",
        );
        for (name, analyzer) in &self.analyzers {
            let metrics = analyzer.device_metrics();
            let _ = writeln!(
                out,
                "{},{:.2},{:.2},{:.2},{},{}",
                name,
                metrics.total_execution_time_ms,
                metrics.average_utilization,
                analyzer.average_throughput(),
                metrics.total_instructions,
                metrics.total_memory_ops,
            );
        }
        std::fs::write(path, out)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Live snapshot
// ---------------------------------------------------------------------------

/// Progress snapshot written after every workload so external dashboards
/// can poll the device while it runs.
#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct LiveSnapshot {
    /// "idle" | "running" | "complete"
    pub status: String,
    pub workload_name: String,
    pub scheduler_name: String,
    /// Total blocks in the current workload's grid
    pub blocks_total: usize,
    /// Active block count per compute unit — index = core id
    pub cu_active_blocks: Vec<usize>,
    pub total_cycles: u64,
    pub total_instructions: u64,
    pub total_memory_ops: u64,
    pub workloads_completed: usize,
    /// Unix timestamp in ms when this snapshot was written
    pub timestamp_ms: u64,
}

/// Atomically write a snapshot to `path` (tmp file + rename so a polling
/// reader never sees a torn write). Failures are ignored: observability
/// must not perturb the run.
pub fn write_snapshot_to(path: &str, snapshot: &LiveSnapshot) {
    if let Ok(json) = serde_json::to_string(snapshot) {
        let tmp = format!("{path}.tmp");
        if std::fs::write(&tmp, &json).is_ok() {
            let _ = std::fs::rename(&tmp, path);
        }
    }
}

pub fn write_snapshot(snapshot: &LiveSnapshot) {
    write_snapshot_to(SNAPSHOT_PATH, snapshot);
}

/// Read the latest snapshot. `None` if none has been written yet or the
/// file cannot be parsed.
pub fn read_snapshot_from(path: &str) -> Option<LiveSnapshot> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

pub fn read_snapshot() -> Option<LiveSnapshot> {
    read_snapshot_from(SNAPSHOT_PATH)
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
