//! Module system
//!
//! - **Registry**: durable module rows and an append-only event log
//! - **Discovery**: `module.toml` scanning and implementation loading
//! - **Dependencies**: deterministic load ordering with cycle detection
//! - **Manager**: per-module lifecycle state machine with single-flight operations
//! - **Health**: on-demand and periodic aggregation of module probes

pub mod error;
pub mod health;
pub mod loader;
pub mod manager;
pub mod registry;
pub mod traits;
pub mod validation;

pub use error::{KernelError, LifecyclePhase};
pub use health::{HealthAggregator, HealthMonitor, HealthMonitorHandle, ModuleHealth, SystemHealth};
pub use loader::{ModuleLoader, StaticModuleLoader};
pub use manager::{BootstrapPlan, BootstrapReport, ModuleInstance, ModuleManager};
pub use registry::{
    DependencyResolution, ModuleDependencies, ModuleDescriptor, ModuleDiscovery, ModuleEvent,
    ModuleEventType, ModuleRecord, ModuleRegistry, ModuleRuntimeState,
};
pub use traits::{
    HealthReport, HealthStatus, Module, ModuleContext, ModuleError, ModuleExports, ModuleStatus,
    ModuleType,
};
pub use validation::{ManifestValidator, ValidationResult};
