//! Module loading system
//!
//! Resolves a descriptor's `path` into a live module implementation.

pub mod loader;

pub use loader::{ModuleFactory, ModuleLoader, StaticModuleLoader};
