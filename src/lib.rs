//! Module Kernel - discovery, ordering and supervision of pluggable modules
//!
//! This crate hosts independently developed modules inside one process. It
//! finds them on disk, persists what it knows about them, starts them in
//! dependency order and keeps an eye on their health.
//!
//! ## Components
//!
//! 1. Registry: durable module rows plus an append-only event log
//! 2. Discoverer: `module.toml` scanning under configured roots
//! 3. Resolver: deterministic topological load order with cycle detection
//! 4. Orchestrator: per-module lifecycle state machine
//! 5. Health aggregator: concurrent probes into one system summary
//!
//! ## Design Principles
//!
//! 1. **One kernel per process**: construct [`ModuleKernel`] once and pass it around
//! 2. **Failures stay local**: a module's failed hook never takes its neighbors down
//! 3. **Deterministic**: the same module set always yields the same load order

pub mod config;
pub mod kernel;
pub mod module;
pub mod storage;
pub mod utils;

pub use config::{BootstrapPolicy, KernelConfig};
pub use kernel::{ModuleKernel, ModuleStatusView};
pub use module::{
    BootstrapReport, HealthReport, HealthStatus, KernelError, Module, ModuleContext,
    ModuleDescriptor, ModuleError, ModuleExports, ModuleStatus, ModuleType, SystemHealth,
};

/// Kernel result type
pub type Result<T> = std::result::Result<T, KernelError>;
