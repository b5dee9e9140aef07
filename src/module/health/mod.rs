//! Health aggregation
//!
//! On-demand and periodic polling of running modules' health probes.

pub mod aggregator;
pub mod monitor;

pub use aggregator::{HealthAggregator, ModuleHealth, SystemHealth};
pub use monitor::{HealthMonitor, HealthMonitorHandle};
