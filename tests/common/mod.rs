//! Test utilities for kernel tests
//!
//! Call-counting stub modules, manifest writers and kernel fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use module_kernel::config::KernelConfig;
use module_kernel::module::loader::StaticModuleLoader;
use module_kernel::module::registry::ModuleRegistry;
use module_kernel::module::{
    HealthReport, Module, ModuleContext, ModuleDescriptor, ModuleError, ModuleExports,
    ModuleManager, ModuleType,
};
use module_kernel::ModuleKernel;

/// Shared record of hook calls, as `"<hook>:<module>"`
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Calls of one hook, in order, as module names
pub fn calls_of(log: &CallLog, hook: &str) -> Vec<String> {
    let prefix = format!("{}:", hook);
    calls(log)
        .into_iter()
        .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
        .collect()
}

/// Module whose hooks count calls and fail on demand
pub struct StubModule {
    pub name: String,
    log: CallLog,
    pub inits: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub probes: AtomicUsize,
    pub fail_init: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    pub hang_start: AtomicBool,
    pub unhealthy: AtomicBool,
    pub probe_error: AtomicBool,
    pub probe_panic: AtomicBool,
    pub hang_probe: AtomicBool,
    pub init_delay: Mutex<Duration>,
    pub probe_delay: Mutex<Duration>,
    pub context: Mutex<Option<ModuleContext>>,
}

impl StubModule {
    pub fn new(name: &str, log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
            inits: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            fail_init: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            hang_start: AtomicBool::new(false),
            unhealthy: AtomicBool::new(false),
            probe_error: AtomicBool::new(false),
            probe_panic: AtomicBool::new(false),
            hang_probe: AtomicBool::new(false),
            init_delay: Mutex::new(Duration::ZERO),
            probe_delay: Mutex::new(Duration::ZERO),
            context: Mutex::new(None),
        })
    }

    pub fn set(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn received_context(&self) -> Option<ModuleContext> {
        self.context.lock().unwrap().clone()
    }

    fn record(&self, hook: &str) {
        self.log.lock().unwrap().push(format!("{}:{}", hook, self.name));
    }
}

#[async_trait]
impl Module for StubModule {
    async fn initialize(&self, context: ModuleContext) -> Result<(), ModuleError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        self.record("initialize");
        *self.context.lock().unwrap() = Some(context);
        let delay = *self.init_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(ModuleError::InitializationError(format!(
                "{} could not open its store",
                self.name
            )));
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), ModuleError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.record("start");
        if self.hang_start.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ModuleError::OperationError(format!("{} port in use", self.name)));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ModuleError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.record("stop");
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(ModuleError::OperationError(format!("{} refused to stop", self.name)));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthReport, ModuleError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.probe_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.hang_probe.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.probe_panic.load(Ordering::SeqCst) {
            panic!("{} probe exploded", self.name);
        }
        if self.probe_error.load(Ordering::SeqCst) {
            return Err(ModuleError::Unavailable(format!("{} backend unreachable", self.name)));
        }
        if self.unhealthy.load(Ordering::SeqCst) {
            return Ok(HealthReport::unhealthy(format!("{} queue backlog", self.name)));
        }
        Ok(HealthReport::healthy())
    }

    fn exports(&self) -> ModuleExports {
        let mut exports = ModuleExports::new();
        exports.insert("name".to_string(), serde_json::json!(self.name));
        exports
    }
}

/// Loader serving the given stubs by module name
pub fn loader_for(modules: &[Arc<StubModule>]) -> StaticModuleLoader {
    let mut loader = StaticModuleLoader::new();
    for module in modules {
        let module = Arc::clone(module);
        loader.register(module.name.clone(), move |_: &ModuleDescriptor| {
            Ok(Arc::clone(&module) as Arc<dyn Module>)
        });
    }
    loader
}

/// Write `<root>/<name>/module.toml`; `extra` is appended as top-level keys
pub fn write_manifest(root: &Path, name: &str, deps: &[&str], extra: &str) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    let deps: Vec<String> = deps.iter().map(|d| format!("\"{}\"", d)).collect();
    let manifest = format!(
        "name = \"{}\"\nversion = \"1.0.0\"\ndependencies = [{}]\n{}\n",
        name,
        deps.join(", "),
        extra
    );
    std::fs::write(dir.join("module.toml"), manifest).unwrap();
    dir
}

/// Isolated directories plus a config pointing at them
pub struct KernelFixture {
    pub temp_dir: TempDir,
    pub modules_dir: PathBuf,
    pub config: KernelConfig,
    pub log: CallLog,
}

impl KernelFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let modules_dir = temp_dir.path().join("modules");
        std::fs::create_dir_all(&modules_dir).unwrap();

        let mut config = KernelConfig::default();
        config.modules.roots = vec![modules_dir.clone()];
        config.modules.data_dir = temp_dir.path().join("data");
        config.storage.data_dir = temp_dir.path().join("registry");
        config.health.enabled = false;
        config.bootstrap.hook_timeout_secs = 5;
        config.health.probe_timeout_secs = 1;

        Self {
            temp_dir,
            modules_dir,
            config,
            log: new_log(),
        }
    }

    /// Write a manifest and return a stub for it
    pub fn module(&self, name: &str, deps: &[&str]) -> Arc<StubModule> {
        self.module_with(name, deps, "")
    }

    pub fn module_with(&self, name: &str, deps: &[&str], extra: &str) -> Arc<StubModule> {
        write_manifest(&self.modules_dir, name, deps, extra);
        StubModule::new(name, &self.log)
    }

    pub fn kernel(&self, modules: &[Arc<StubModule>]) -> ModuleKernel {
        ModuleKernel::new(self.config.clone(), Arc::new(loader_for(modules))).unwrap()
    }
}

/// Orchestrator over an in-memory registry with short bounds
pub fn test_manager(hook_timeout: Duration, probe_timeout: Duration) -> ModuleManager {
    let registry = Arc::new(ModuleRegistry::in_memory().unwrap());
    ModuleManager::new(registry, hook_timeout, probe_timeout)
}

/// Register a stub as an extension with the given dependencies
pub fn add_stub(manager: &ModuleManager, module: &Arc<StubModule>, deps: &[&str]) {
    let descriptor = ModuleDescriptor::new(
        module.name.clone(),
        "1.0.0",
        ModuleType::Extension,
        module.name.clone(),
    )
    .with_dependencies(deps.iter().copied());
    manager
        .register(
            descriptor,
            Arc::clone(module) as Arc<dyn Module>,
            ModuleContext::new(&module.name, "/tmp/module-kernel-tests", Default::default()),
        )
        .unwrap();
}
