//! Module loader implementation
//!
//! Modules are compiled into the host and registered as factories keyed by
//! the `path` their manifest declares. The kernel only sees the
//! `ModuleLoader` trait, so other strategies (subprocesses, plugins) can be
//! slotted in without touching the orchestrator.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::module::error::{KernelError, Result};
use crate::module::registry::records::ModuleDescriptor;
use crate::module::traits::{Module, ModuleError};

/// Builds a fresh module instance for a descriptor
pub type ModuleFactory =
    Arc<dyn Fn(&ModuleDescriptor) -> std::result::Result<Arc<dyn Module>, ModuleError> + Send + Sync>;

/// Turns a descriptor into a live module implementation
pub trait ModuleLoader: Send + Sync {
    /// Load the implementation for `descriptor`
    ///
    /// A missing or failing implementation is a `Discovery` error.
    fn load(&self, descriptor: &ModuleDescriptor) -> Result<Arc<dyn Module>>;
}

/// Compiled-in registry of module factories
#[derive(Default, Clone)]
pub struct StaticModuleLoader {
    factories: HashMap<String, ModuleFactory>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a locator (a manifest `path` or module name)
    pub fn register<F>(&mut self, locator: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ModuleDescriptor) -> std::result::Result<Arc<dyn Module>, ModuleError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(locator.into(), Arc::new(factory));
        self
    }

    /// Builder-style `register`
    pub fn with_factory<F>(mut self, locator: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ModuleDescriptor) -> std::result::Result<Arc<dyn Module>, ModuleError>
            + Send
            + Sync
            + 'static,
    {
        self.register(locator, factory);
        self
    }

    pub fn contains(&self, locator: &str) -> bool {
        self.factories.contains_key(locator)
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load(&self, descriptor: &ModuleDescriptor) -> Result<Arc<dyn Module>> {
        // Exact path first, then the bare module name
        let factory = self
            .factories
            .get(&descriptor.path)
            .or_else(|| self.factories.get(&descriptor.name))
            .ok_or_else(|| {
                KernelError::discovery(
                    &descriptor.path,
                    format!("no implementation registered for module '{}'", descriptor.name),
                )
            })?;

        debug!(module = %descriptor.name, path = %descriptor.path, "Loading module implementation");
        factory(descriptor).map_err(|e| {
            KernelError::discovery(
                &descriptor.path,
                format!("failed to construct module '{}': {}", descriptor.name, e),
            )
        })
    }
}
