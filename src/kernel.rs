//! Module kernel facade
//!
//! Owns one registry, orchestrator, discovery scanner and health aggregator.
//! Construct it once at startup and pass it where it is needed.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::KernelConfig;
use crate::module::error::{KernelError, LifecyclePhase, Result};
use crate::module::health::{HealthAggregator, HealthMonitor, HealthMonitorHandle, SystemHealth};
use crate::module::loader::ModuleLoader;
use crate::module::manager::{BootstrapPlan, BootstrapReport, ModuleManager};
use crate::module::registry::{
    DependencyResolution, DiscoveredModule, ModuleDependencies, ModuleDescriptor, ModuleDiscovery,
    ModuleEvent, ModuleRecord, ModuleRegistry,
};
use crate::module::traits::{
    HealthReport, HealthStatus, Module, ModuleContext, ModuleExports, ModuleStatus, ModuleType,
};
use crate::module::validation::ManifestValidator;
use crate::storage::database::Database;
use crate::storage::open_storage;

/// Administrative view of one module: `{status, last_error}` plus identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStatusView {
    pub name: String,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    pub enabled: bool,
    pub status: ModuleStatus,
    pub health: HealthStatus,
    pub last_error: Option<String>,
}

/// The module kernel
pub struct ModuleKernel {
    config: KernelConfig,
    registry: Arc<ModuleRegistry>,
    manager: ModuleManager,
    aggregator: HealthAggregator,
    discovery: ModuleDiscovery,
    loader: Arc<dyn ModuleLoader>,
    validator: ManifestValidator,
    /// Modules present in this process: registered or found by the last scan
    present: Mutex<BTreeSet<String>>,
    /// `config.toml` contents of discovered modules
    discovered_configs: Mutex<HashMap<String, HashMap<String, String>>>,
    resolution: Mutex<Option<DependencyResolution>>,
    monitor: Mutex<Option<HealthMonitorHandle>>,
    cancel: CancellationToken,
}

impl ModuleKernel {
    /// Create a kernel, opening the configured registry storage
    pub fn new(config: KernelConfig, loader: Arc<dyn ModuleLoader>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| KernelError::Config(e.to_string()))?;
        let db = open_storage(&config.storage.data_dir, config.storage.backend.into())
            .map_err(KernelError::storage)?;
        Self::with_database(config, db, loader)
    }

    /// Create a kernel over an already opened database
    pub fn with_database(
        config: KernelConfig,
        db: Arc<dyn Database>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| KernelError::Config(e.to_string()))?;

        let registry = Arc::new(ModuleRegistry::new(db)?);
        let manager = ModuleManager::new(
            Arc::clone(&registry),
            config.bootstrap.hook_timeout(),
            config.health.probe_timeout(),
        );
        let aggregator = HealthAggregator::new(manager.clone(), config.health.probe_timeout());
        let discovery = ModuleDiscovery::new(&config.modules.roots);

        Ok(Self {
            config,
            registry,
            manager,
            aggregator,
            discovery,
            loader,
            validator: ManifestValidator::new(),
            present: Mutex::new(BTreeSet::new()),
            discovered_configs: Mutex::new(HashMap::new()),
            resolution: Mutex::new(None),
            monitor: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn manager(&self) -> &ModuleManager {
        &self.manager
    }

    /// Register a core module; its implementation is loaded from `path` at bootstrap
    pub fn register_core_module<I, S>(
        &self,
        name: &str,
        path: &str,
        dependencies: I,
    ) -> Result<ModuleRecord>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let descriptor = ModuleDescriptor::core(name, path, dependencies);
        self.validator
            .validate_descriptor(&descriptor)
            .into_result(format!("core module {}", name))?;
        let record = self.registry.upsert(&descriptor)?;
        lock(&self.present).insert(name.to_string());
        Ok(record)
    }

    /// Register a module with a ready-made implementation
    pub fn register_module(&self, descriptor: ModuleDescriptor, module: Arc<dyn Module>) -> Result<()> {
        self.validator
            .validate_descriptor(&descriptor)
            .into_result(format!("module {}", descriptor.name))?;
        let context = self.context_for(&descriptor.name);
        let name = descriptor.name.clone();
        self.manager.register(descriptor, module, context)?;
        lock(&self.present).insert(name);
        Ok(())
    }

    /// Scan the configured roots and upsert every valid candidate
    ///
    /// Invalid candidates are logged and excluded. The enabled allow-list
    /// applies only when a module is installed for the first time.
    pub fn scan_for_modules(&self) -> Result<Vec<DiscoveredModule>> {
        let scan = self.discovery.discover_modules()?;

        for module in &scan.modules {
            let mut descriptor = module.descriptor();
            if !self.config.modules.is_allowed(&descriptor.name) {
                descriptor.enabled = false;
            }
            self.registry.upsert_discovered(&descriptor)?;
            lock(&self.present).insert(descriptor.name.clone());
            lock(&self.discovered_configs).insert(descriptor.name.clone(), module.config.clone());
        }
        Ok(scan.modules)
    }

    /// Discover, order, initialize and start the enabled modules
    ///
    /// Discovery and resolution errors abort before any hook runs. A strict
    /// module failure stops whatever was started and returns the error.
    pub async fn bootstrap(&self) -> Result<BootstrapReport> {
        info!("Bootstrapping module kernel");
        self.scan_for_modules()?;

        let present = lock(&self.present).clone();
        let mut descriptors = Vec::new();
        for record in self.registry.get_enabled()? {
            if !present.contains(record.name()) {
                warn!(
                    module = %record.name(),
                    phase = "discover",
                    "Module is enabled but no longer present, skipping"
                );
                continue;
            }
            if !self.manager.is_registered(record.name()) {
                let module = self.loader.load(&record.descriptor).map_err(|e| {
                    error!(module = %record.name(), phase = "discover", "{}", e);
                    e
                })?;
                let context = self.context_for(record.name());
                self.manager
                    .register(record.descriptor.clone(), module, context)?;
            }
            descriptors.push(record.descriptor);
        }

        let resolution = ModuleDependencies::resolve(&descriptors).map_err(|e| {
            error!(phase = %LifecyclePhase::Resolve, "{}", e);
            e
        })?;
        info!("Module load order: {:?}", resolution.load_order);

        let auto_start = resolution.required_by(
            descriptors
                .iter()
                .filter(|d| d.auto_start)
                .map(|d| d.name.as_str()),
        );
        let plan = BootstrapPlan::new(&resolution)
            .with_auto_start(auto_start)
            .with_parallel(self.config.bootstrap.parallel)
            .with_policies(self.config.bootstrap.policies.clone());
        *lock(&self.resolution) = Some(resolution);

        let report = self.manager.bootstrap(&plan).await;
        if let Some(e) = &report.aborted {
            error!("Bootstrap aborted, stopping started modules: {}", e);
            self.manager.stop_all().await;
            return Err(e.clone());
        }

        if self.config.health.enabled {
            self.start_health_monitor();
        }
        Ok(report)
    }

    /// Last load order computed by `bootstrap`
    pub fn load_order(&self) -> Option<Vec<String>> {
        lock(&self.resolution).as_ref().map(|r| r.load_order.clone())
    }

    /// Handle to a registered module implementation
    pub fn get_module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.manager.module(name)
    }

    pub fn get_exports(&self, name: &str) -> Option<ModuleExports> {
        self.manager.exports(name)
    }

    /// Enabled module rows, ordered by name
    pub fn get_enabled_modules(&self) -> Result<Vec<ModuleRecord>> {
        self.registry.get_enabled()
    }

    pub fn enable_module(&self, name: &str) -> Result<ModuleRecord> {
        self.registry.set_enabled(name, true)
    }

    /// Stop the module if it is running, then flip its flag
    ///
    /// Running dependents are left alone, but logged. If the stop fails the
    /// flag is not changed.
    pub async fn disable_module(&self, name: &str) -> Result<ModuleRecord> {
        self.registry.get_by_name(name)?;

        if self.manager.status(name) == Some(ModuleStatus::Running) {
            let dependents: Vec<String> = self
                .manager
                .running_modules()
                .into_iter()
                .filter(|m| {
                    self.manager
                        .descriptor(m)
                        .is_some_and(|d| d.dependencies.iter().any(|dep| dep == name))
                })
                .collect();
            if !dependents.is_empty() {
                warn!(
                    module = %name,
                    "Disabling module while dependents are running: {:?}",
                    dependents
                );
            }
            self.manager.stop(name).await?;
        }
        self.registry.set_enabled(name, false)
    }

    pub async fn initialize(&self, name: &str) -> Result<()> {
        self.manager.initialize(name).await
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        self.manager.start(name).await
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        self.manager.stop(name).await
    }

    /// Stop then start a module
    pub async fn restart_module(&self, name: &str) -> Result<()> {
        info!(module = %name, "Restarting module");
        self.manager.stop(name).await?;
        self.manager.start(name).await
    }

    pub async fn health_check(&self, name: &str) -> Result<HealthReport> {
        self.manager.health_check(name).await
    }

    pub async fn check_all(&self) -> SystemHealth {
        self.aggregator.check_all().await
    }

    /// Start periodic health polling; false if it is already running
    pub fn start_health_monitor(&self) -> bool {
        let mut monitor = lock(&self.monitor);
        if monitor.as_ref().is_some_and(HealthMonitorHandle::is_running) {
            return false;
        }
        let handle = HealthMonitor::new(self.aggregator.clone(), self.config.health.interval())
            .spawn(self.cancel.child_token());
        *monitor = Some(handle);
        true
    }

    /// Most recent summary from the periodic monitor
    pub fn latest_health(&self) -> Option<SystemHealth> {
        lock(&self.monitor).as_ref().and_then(HealthMonitorHandle::latest)
    }

    /// Per-module status for administrative surfaces
    pub fn status(&self) -> Result<Vec<ModuleStatusView>> {
        Ok(self
            .registry
            .get_all()?
            .into_iter()
            .map(|record| {
                let runtime = self
                    .manager
                    .state(record.name())
                    .unwrap_or_else(|| record.runtime.clone());
                ModuleStatusView {
                    name: record.descriptor.name.clone(),
                    module_type: record.descriptor.module_type,
                    enabled: record.descriptor.enabled,
                    status: runtime.status,
                    health: runtime.health_status,
                    last_error: runtime.last_error,
                }
            })
            .collect())
    }

    pub fn events(&self, name: &str) -> Result<Vec<ModuleEvent>> {
        self.registry.events_for(name)
    }

    /// Live stream of registry events
    pub fn subscribe(&self) -> broadcast::Receiver<ModuleEvent> {
        self.registry.subscribe()
    }

    /// Cancel health polling, stop running modules in reverse start order
    /// and flush the registry
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down module kernel");
        let monitor = lock(&self.monitor).take();
        self.cancel.cancel();
        if let Some(handle) = monitor {
            handle.shutdown().await;
        }

        let errors = self.manager.stop_all().await;
        if !errors.is_empty() {
            warn!("{} modules failed to stop cleanly", errors.len());
        }
        self.registry.flush()
    }

    fn context_for(&self, name: &str) -> ModuleContext {
        let mut config = lock(&self.discovered_configs)
            .get(name)
            .cloned()
            .unwrap_or_default();
        if let Some(overrides) = self.config.modules.module_configs.get(name) {
            config.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        ModuleContext::new(name, self.config.modules.data_dir.join(name), config)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
