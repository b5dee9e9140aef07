//! Module registry and discovery
//!
//! Durable module records, manifest discovery and dependency resolution.

pub mod dependencies;
pub mod discovery;
pub mod manifest;
pub mod records;
pub mod store;

pub use dependencies::{DependencyResolution, ModuleDependencies};
pub use discovery::{DiscoveredModule, DiscoveryScan, ModuleDiscovery};
pub use manifest::ModuleManifest;
pub use records::{
    ModuleDescriptor, ModuleEvent, ModuleEventType, ModuleRecord, ModuleRuntimeState,
};
pub use store::ModuleRegistry;
