use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use warpsim::device::{DeviceConfig, GpuDevice};
use warpsim::metrics::SchedulerComparison;
use warpsim::scheduler::SchedulingAlgorithm;
use warpsim::workload::Workload;

/// Streaming-multiprocessor device simulator
#[derive(Parser, Debug)]
#[command(name = "warpsim", version, about, long_about = None)]
struct Args {
    /// Number of compute units to simulate
    #[arg(short = 'c', long, default_value_t = 16)]
    compute_units: usize,

    /// Verbosity level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a small workload mix under the FIFO scheduler
    Basic,
    /// Run the same workload mix under every scheduler and compare
    Compare,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose);

    match args.command {
        Command::Basic => run_basic(args.compute_units),
        Command::Compare => run_comparison(args.compute_units),
    }

    Ok(())
}

fn setup_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn device_with(compute_units: usize) -> GpuDevice {
    GpuDevice::new(DeviceConfig {
        num_compute_units: compute_units,
        ..DeviceConfig::default()
    })
}

fn run_basic(compute_units: usize) {
    let device = device_with(compute_units);
    device.print_device_info();

    device.submit_workload(Workload::matrix_multiply(512, 512, 512));
    device.submit_workload(Workload::vector_add(1024 * 1024));
    device.submit_workload(Workload::reduction(1024 * 1024));

    device.start();
    device.wait_for_completion();

    let analyzer = device.performance_analyzer();
    analyzer.print_detailed_report();
    if let Err(e) = analyzer.export_to_csv("basic_simulation_results.csv") {
        error!("failed to export workload metrics: {e}");
    }
}

/// The comparison mix: a few kernels with deliberately spread priorities
/// and sizes so the policies actually diverge.
fn submit_comparison_mix(device: &GpuDevice) {
    let mut small_matmul = Workload::matrix_multiply(256, 256, 256);
    small_matmul.set_priority(3);
    device.submit_workload(small_matmul);

    let mut large_matmul = Workload::matrix_multiply(512, 512, 512);
    large_matmul.set_priority(1);
    device.submit_workload(large_matmul);

    let mut conv = Workload::convolution(1, 32, 128, 128);
    conv.set_priority(2);
    device.submit_workload(conv);

    let mut vecadd = Workload::vector_add(512 * 1024);
    vecadd.set_priority(2);
    device.submit_workload(vecadd);

    let mut reduction = Workload::reduction(256 * 1024);
    reduction.set_priority(3);
    device.submit_workload(reduction);
}

fn run_comparison(compute_units: usize) {
    let mut comparison = SchedulerComparison::new();

    for algorithm in SchedulingAlgorithm::ALL {
        println!("\nTesting {} scheduler...", algorithm.name());

        let device = device_with(compute_units);
        device.set_scheduler(algorithm.build());
        submit_comparison_mix(&device);

        device.start();
        device.wait_for_completion();

        comparison.add_analyzer(
            algorithm.name(),
            std::sync::Arc::clone(device.performance_analyzer()),
        );
    }

    comparison.print_comparison();
    if let Err(e) = comparison.export_comparison_csv("scheduler_comparison.csv") {
        error!("failed to export comparison: {e}");
    }
}
