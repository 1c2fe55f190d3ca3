pub mod compute_unit;
pub mod device;
pub mod memory;
pub mod metrics;
pub mod scheduler;
pub mod types;
pub mod warp;
pub mod workload;
