//! Module manager for orchestrating module lifecycles
//!
//! Drives every registered module through
//! `Pending -> Initializing -> Stopped -> Running -> Stopping -> Stopped`
//! and persists each transition through the registry.
//!
//! Operations on one module are single-flight: at most one lifecycle
//! operation runs per module. A concurrent call of the same operation joins
//! the in-flight one and sees its outcome; a call of a different operation
//! waits for it to finish and then re-checks its own preconditions.
//! Different modules never block each other.

use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::BootstrapPolicy;
use crate::module::error::{KernelError, LifecyclePhase, Result};
use crate::module::registry::records::{
    ModuleDescriptor, ModuleEvent, ModuleEventType, ModuleRuntimeState,
};
use crate::module::registry::{DependencyResolution, ModuleRegistry};
use crate::module::traits::{
    HealthReport, HealthStatus, Module, ModuleContext, ModuleExports, ModuleStatus, ModuleType,
};
use crate::utils::{current_timestamp, log_error, with_custom_timeout};

type Flight = Shared<BoxFuture<'static, Result<()>>>;

/// The lifecycle operation currently running on a module
struct FlightSlot {
    phase: LifecyclePhase,
    id: u64,
    future: Flight,
}

/// A registered module: descriptor, live implementation and runtime state
pub struct ModuleInstance {
    descriptor: ModuleDescriptor,
    module: Arc<dyn Module>,
    context: ModuleContext,
    state: Mutex<ModuleRuntimeState>,
    flight: Mutex<Option<FlightSlot>>,
}

impl ModuleInstance {
    fn new(descriptor: ModuleDescriptor, module: Arc<dyn Module>, context: ModuleContext) -> Self {
        Self {
            descriptor,
            module,
            context,
            state: Mutex::new(ModuleRuntimeState::default()),
            flight: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    pub fn module_type(&self) -> ModuleType {
        self.descriptor.module_type
    }

    /// Handle to the live implementation
    pub fn module(&self) -> Arc<dyn Module> {
        Arc::clone(&self.module)
    }

    pub fn exports(&self) -> ModuleExports {
        self.module.exports()
    }

    /// Snapshot of the runtime state
    pub fn state(&self) -> ModuleRuntimeState {
        self.lock_state().clone()
    }

    pub fn status(&self) -> ModuleStatus {
        self.lock_state().status
    }

    fn lock_state(&self) -> MutexGuard<'_, ModuleRuntimeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_flight(&self) -> MutexGuard<'_, Option<FlightSlot>> {
        self.flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_flight(&self, id: u64) {
        let mut slot = self.lock_flight();
        if slot.as_ref().is_some_and(|f| f.id == id) {
            *slot = None;
        }
    }
}

/// What bootstrap should do with a resolved load order
#[derive(Debug, Clone, Default)]
pub struct BootstrapPlan {
    /// Modules to bring up, dependencies first
    pub load_order: Vec<String>,
    /// Load order grouped into concurrently startable waves
    pub waves: Vec<Vec<String>>,
    /// Modules to start after initialization; the rest are only initialized
    pub auto_start: BTreeSet<String>,
    /// Start each wave concurrently instead of one module at a time
    pub parallel: bool,
    /// Per-type overrides of the default policy
    pub policies: HashMap<ModuleType, BootstrapPolicy>,
}

impl BootstrapPlan {
    /// Plan that initializes and starts every module of the resolution
    pub fn new(resolution: &DependencyResolution) -> Self {
        Self {
            load_order: resolution.load_order.clone(),
            waves: resolution.waves(),
            auto_start: resolution.load_order.iter().cloned().collect(),
            parallel: false,
            policies: HashMap::new(),
        }
    }

    pub fn with_auto_start(mut self, auto_start: BTreeSet<String>) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_policies(mut self, policies: HashMap<ModuleType, BootstrapPolicy>) -> Self {
        self.policies = policies;
        self
    }

    pub fn policy_for(&self, module_type: ModuleType) -> BootstrapPolicy {
        self.policies
            .get(&module_type)
            .copied()
            .unwrap_or_else(|| BootstrapPolicy::default_for(module_type))
    }
}

/// Outcome of a bootstrap run
#[derive(Debug, Clone, Default)]
pub struct BootstrapReport {
    /// Modules whose initialization succeeded, in completion order
    pub initialized: Vec<String>,
    /// Modules that reached `Running`
    pub started: Vec<String>,
    /// Modules that failed, with the error each one reported
    pub failed: Vec<(String, KernelError)>,
    /// Modules never attempted because a strict failure aborted bootstrap
    pub skipped: Vec<String>,
    /// The strict failure that aborted bootstrap
    pub aborted: Option<KernelError>,
}

impl BootstrapReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.aborted.is_none()
    }

    pub fn failure_of(&self, name: &str) -> Option<&KernelError> {
        self.failed.iter().find(|(n, _)| n == name).map(|(_, e)| e)
    }
}

struct BringUp {
    name: String,
    initialized: bool,
    started: bool,
    error: Option<KernelError>,
}

struct ManagerInner {
    instances: RwLock<HashMap<String, Arc<ModuleInstance>>>,
    registry: Arc<ModuleRegistry>,
    hook_timeout: Duration,
    probe_timeout: Duration,
    next_flight_id: AtomicU64,
    /// Running modules in the order they reached `Running`
    start_order: Mutex<Vec<String>>,
}

/// Module manager coordinates all registered modules
#[derive(Clone)]
pub struct ModuleManager {
    inner: Arc<ManagerInner>,
}

impl ModuleManager {
    /// Create a new module manager
    pub fn new(registry: Arc<ModuleRegistry>, hook_timeout: Duration, probe_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                instances: RwLock::new(HashMap::new()),
                registry,
                hook_timeout,
                probe_timeout,
                next_flight_id: AtomicU64::new(1),
                start_order: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.inner.registry
    }

    pub fn hook_timeout(&self) -> Duration {
        self.inner.hook_timeout
    }

    pub fn probe_timeout(&self) -> Duration {
        self.inner.probe_timeout
    }

    /// Admit a module implementation in `Pending` state
    ///
    /// Replacing an implementation is only allowed while the current one has
    /// never been initialized.
    pub fn register(
        &self,
        descriptor: ModuleDescriptor,
        module: Arc<dyn Module>,
        context: ModuleContext,
    ) -> Result<()> {
        let name = descriptor.name.clone();
        {
            let instances = self.read_instances();
            if let Some(existing) = instances.get(&name) {
                let status = existing.status();
                if status != ModuleStatus::Pending {
                    return Err(KernelError::InvalidStateTransition {
                        module: name,
                        phase: LifecyclePhase::Discover,
                        status,
                        reason: "module is already registered and initialized".to_string(),
                    });
                }
            }
        }

        // A fresh instance starts from Pending whatever the row last recorded
        let record = self.inner.registry.upsert(&descriptor)?;
        if record.runtime != ModuleRuntimeState::default() {
            let event = ModuleEvent::new(&name, ModuleEventType::ConfigChanged, "runtime state reset")
                .with_data(serde_json::json!({ "previous_status": record.runtime.status }));
            self.inner
                .registry
                .update_runtime(&name, &ModuleRuntimeState::default(), Some(event))?;
        }

        let instance = Arc::new(ModuleInstance::new(descriptor, module, context));
        self.write_instances().insert(name.clone(), instance);
        debug!(module = %name, "Module registered with orchestrator");
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.read_instances().contains_key(name)
    }

    /// Handle to a registered module
    pub fn instance(&self, name: &str) -> Result<Arc<ModuleInstance>> {
        self.read_instances()
            .get(name)
            .cloned()
            .ok_or_else(|| KernelError::NotFound(name.to_string()))
    }

    pub fn module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.instance(name).ok().map(|i| i.module())
    }

    pub fn exports(&self, name: &str) -> Option<ModuleExports> {
        self.instance(name).ok().map(|i| i.exports())
    }

    pub fn state(&self, name: &str) -> Option<ModuleRuntimeState> {
        self.instance(name).ok().map(|i| i.state())
    }

    pub fn status(&self, name: &str) -> Option<ModuleStatus> {
        self.instance(name).ok().map(|i| i.status())
    }

    pub fn descriptor(&self, name: &str) -> Option<ModuleDescriptor> {
        self.instance(name).ok().map(|i| i.descriptor().clone())
    }

    /// Registered module names, sorted
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_instances().keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of modules currently `Running`, sorted
    pub fn running_modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .read_instances()
            .values()
            .filter(|i| i.status() == ModuleStatus::Running)
            .map(|i| i.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Run the module's `initialize` hook
    ///
    /// Succeeds immediately if the module is already initialized. From
    /// `Error` the hook runs again; that is the only way out of `Error`.
    pub async fn initialize(&self, name: &str) -> Result<()> {
        match self.run(name, LifecyclePhase::Initialize).await {
            Err(KernelError::AlreadyInitialized(module)) => {
                debug!(module = %module, phase = "initialize", "Module already initialized");
                Ok(())
            }
            other => other,
        }
    }

    /// Start an initialized module whose dependencies are all running
    pub async fn start(&self, name: &str) -> Result<()> {
        self.run(name, LifecyclePhase::Start).await
    }

    /// Stop a running module; a no-op for modules that are not running
    pub async fn stop(&self, name: &str) -> Result<()> {
        self.run(name, LifecyclePhase::Stop).await
    }

    /// Probe a module's health with the configured probe timeout
    pub async fn health_check(&self, name: &str) -> Result<HealthReport> {
        self.probe(name, self.inner.probe_timeout).await
    }

    /// Probe a module's health
    ///
    /// Never changes lifecycle status. A module that is not running is
    /// unhealthy without its probe being invoked. Probe errors, panics and
    /// timeouts all yield an unhealthy report rather than an error.
    pub async fn probe(&self, name: &str, timeout: Duration) -> Result<HealthReport> {
        let instance = self.instance(name)?;
        let status = instance.status();
        if status != ModuleStatus::Running {
            return Ok(HealthReport::unhealthy(format!("module is {}", status)));
        }

        let outcome = with_custom_timeout(
            AssertUnwindSafe(instance.module.health_check()).catch_unwind(),
            timeout,
        )
        .await;
        let report = match outcome {
            Err(_) => HealthReport::unhealthy(format!("health check timed out after {:?}", timeout)),
            Ok(Err(panic)) => HealthReport::unhealthy(format!(
                "health check panicked: {}",
                panic_message(panic.as_ref())
            )),
            Ok(Ok(Err(e))) => HealthReport::unhealthy(e.to_string()),
            Ok(Ok(Ok(report))) => report,
        };

        if !report.healthy {
            warn!(
                module = %name,
                phase = "health_check",
                "Module unhealthy: {}",
                report.message.as_deref().unwrap_or("no message")
            );
        }
        self.record_health(&instance, &report);
        Ok(report)
    }

    /// Initialize and start modules according to `plan`
    ///
    /// A failure is recorded and bootstrap continues, unless the module's
    /// policy is `Strict`, in which case the remaining modules are skipped.
    pub async fn bootstrap(&self, plan: &BootstrapPlan) -> BootstrapReport {
        let mut report = BootstrapReport::default();
        let mut aborted = false;

        if plan.parallel {
            for wave in &plan.waves {
                if aborted {
                    report.skipped.extend(wave.iter().cloned());
                    continue;
                }
                let outcomes = join_all(wave.iter().map(|name| self.bring_up(name, plan))).await;
                for outcome in outcomes {
                    aborted |= self.absorb(&mut report, outcome, plan);
                }
            }
        } else {
            for name in &plan.load_order {
                if aborted {
                    report.skipped.push(name.clone());
                    continue;
                }
                let outcome = self.bring_up(name, plan).await;
                aborted = self.absorb(&mut report, outcome, plan);
            }
        }

        info!(
            "Bootstrap finished: {} initialized, {} started, {} failed, {} skipped",
            report.initialized.len(),
            report.started.len(),
            report.failed.len(),
            report.skipped.len()
        );
        report
    }

    /// Stop every running module, most recently started first
    ///
    /// Failures are logged and returned; they never stop the sweep.
    pub async fn stop_all(&self) -> Vec<KernelError> {
        let order: Vec<String> = {
            let started = self.lock_start_order();
            started.iter().rev().cloned().collect()
        };

        let mut errors = Vec::new();
        for name in order.iter().chain(self.running_modules().iter()) {
            if self.status(name) != Some(ModuleStatus::Running) {
                continue;
            }
            if let Err(e) = self.stop(name).await {
                errors.push(e);
            }
        }
        errors
    }

    async fn bring_up(&self, name: &str, plan: &BootstrapPlan) -> BringUp {
        let mut outcome = BringUp {
            name: name.to_string(),
            initialized: false,
            started: false,
            error: None,
        };

        // Left running by an earlier bootstrap or an explicit start
        if self.status(name) == Some(ModuleStatus::Running) {
            debug!(module = %name, "Module already running");
            outcome.initialized = true;
            outcome.started = true;
            return outcome;
        }

        if let Err(e) = self.initialize(name).await {
            outcome.error = Some(e);
            return outcome;
        }
        outcome.initialized = true;

        if plan.auto_start.contains(name) {
            match self.start(name).await {
                Ok(()) => outcome.started = true,
                Err(e) => outcome.error = Some(e),
            }
        }
        outcome
    }

    /// Fold one module's outcome into the report; true if bootstrap must abort
    fn absorb(&self, report: &mut BootstrapReport, outcome: BringUp, plan: &BootstrapPlan) -> bool {
        if outcome.initialized {
            report.initialized.push(outcome.name.clone());
        }
        if outcome.started {
            report.started.push(outcome.name.clone());
        }
        let Some(error) = outcome.error else {
            return false;
        };

        let policy = self
            .descriptor(&outcome.name)
            .map(|d| plan.policy_for(d.module_type))
            .unwrap_or(BootstrapPolicy::Strict);
        report.failed.push((outcome.name.clone(), error.clone()));

        match policy {
            BootstrapPolicy::Strict => {
                error!(module = %outcome.name, "Strict module failed, aborting bootstrap: {}", error);
                report.aborted = Some(error);
                true
            }
            BootstrapPolicy::BestEffort => {
                warn!(module = %outcome.name, "Module failed, continuing bootstrap: {}", error);
                false
            }
        }
    }

    /// Join or start the flight for `phase` on `name`
    async fn run(&self, name: &str, phase: LifecyclePhase) -> Result<()> {
        let instance = self.instance(name)?;
        loop {
            let (flight, joined) = {
                let mut slot = instance.lock_flight();
                match slot.as_ref() {
                    Some(current) => (current.future.clone(), current.phase == phase),
                    None => {
                        let id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
                        let future = self
                            .clone()
                            .execute(Arc::clone(&instance), phase, id)
                            .boxed()
                            .shared();
                        *slot = Some(FlightSlot {
                            phase,
                            id,
                            future: future.clone(),
                        });
                        (future, true)
                    }
                }
            };

            if joined {
                return flight.await;
            }
            debug!(module = %name, phase = %phase, "Waiting for in-flight operation");
            let _ = flight.await;
        }
    }

    async fn execute(self, instance: Arc<ModuleInstance>, phase: LifecyclePhase, id: u64) -> Result<()> {
        let result = match phase {
            LifecyclePhase::Initialize => self.do_initialize(&instance).await,
            LifecyclePhase::Start => self.do_start(&instance).await,
            LifecyclePhase::Stop => self.do_stop(&instance).await,
            other => Err(KernelError::InvalidStateTransition {
                module: instance.name().to_string(),
                phase: other,
                status: instance.status(),
                reason: "not a lifecycle operation".to_string(),
            }),
        };
        instance.clear_flight(id);
        result
    }

    async fn do_initialize(&self, instance: &ModuleInstance) -> Result<()> {
        let name = instance.name();
        let phase = LifecyclePhase::Initialize;
        match instance.status() {
            ModuleStatus::Pending | ModuleStatus::Error => {}
            ModuleStatus::Stopped | ModuleStatus::Running | ModuleStatus::Stopping => {
                return Err(KernelError::AlreadyInitialized(name.to_string()));
            }
            status @ ModuleStatus::Initializing => {
                return Err(invalid(name, phase, status, "an operation is already in progress"));
            }
        }

        info!(module = %name, phase = %phase, "Initializing module");
        self.transition(instance, |s| s.status = ModuleStatus::Initializing, None);

        let context = instance.context.clone();
        match self.call_hook(name, phase, instance.module.initialize(context)).await {
            Ok(()) => {
                self.transition(
                    instance,
                    |s| {
                        s.status = ModuleStatus::Stopped;
                        s.last_error = None;
                    },
                    Some(ModuleEvent::new(name, ModuleEventType::Stopped, "module initialized")),
                );
                info!(module = %name, phase = %phase, "Module initialized");
                Ok(())
            }
            Err(e) => {
                self.fail(instance, phase, &e, ModuleStatus::Error);
                Err(e)
            }
        }
    }

    async fn do_start(&self, instance: &ModuleInstance) -> Result<()> {
        let name = instance.name();
        let phase = LifecyclePhase::Start;
        let status = instance.status();
        if status != ModuleStatus::Stopped {
            let reason = match status {
                ModuleStatus::Running => "module is already running",
                ModuleStatus::Pending | ModuleStatus::Error => "module must be initialized first",
                _ => "an operation is already in progress",
            };
            return Err(self.reject(name, phase, status, reason));
        }

        for dep in &instance.descriptor.dependencies {
            let dep_status = self.status(dep);
            if dep_status != Some(ModuleStatus::Running) {
                let reason = match dep_status {
                    Some(s) => format!("dependency '{}' is {}", dep, s),
                    None => format!("dependency '{}' is not registered", dep),
                };
                return Err(self.reject(name, phase, status, reason));
            }
        }

        info!(module = %name, phase = %phase, "Starting module");
        self.transition(instance, |s| s.status = ModuleStatus::Initializing, None);

        match self.call_hook(name, phase, instance.module.start()).await {
            Ok(()) => {
                self.transition(
                    instance,
                    |s| {
                        s.status = ModuleStatus::Running;
                        s.last_error = None;
                        s.last_started_at = Some(current_timestamp());
                    },
                    Some(ModuleEvent::new(name, ModuleEventType::Started, "module started")),
                );
                self.lock_start_order().push(name.to_string());
                info!(module = %name, phase = %phase, "Module started");
                Ok(())
            }
            Err(e) => {
                // A hook error leaves the module startable again; a hung hook does not
                let rollback = match e {
                    KernelError::HookTimeout { .. } => ModuleStatus::Error,
                    _ => ModuleStatus::Stopped,
                };
                self.fail(instance, phase, &e, rollback);
                Err(e)
            }
        }
    }

    async fn do_stop(&self, instance: &ModuleInstance) -> Result<()> {
        let name = instance.name();
        let phase = LifecyclePhase::Stop;
        match instance.status() {
            ModuleStatus::Running => {}
            ModuleStatus::Stopped | ModuleStatus::Pending | ModuleStatus::Error => {
                debug!(module = %name, phase = %phase, "Module not running, nothing to stop");
                return Ok(());
            }
            status => {
                return Err(self.reject(name, phase, status, "an operation is already in progress"));
            }
        }

        info!(module = %name, phase = %phase, "Stopping module");
        self.transition(instance, |s| s.status = ModuleStatus::Stopping, None);
        self.lock_start_order().retain(|n| n != name);

        match self.call_hook(name, phase, instance.module.stop()).await {
            Ok(()) => {
                self.transition(
                    instance,
                    |s| {
                        s.status = ModuleStatus::Stopped;
                        s.health_status = HealthStatus::Unknown;
                        s.last_stopped_at = Some(current_timestamp());
                    },
                    Some(ModuleEvent::new(name, ModuleEventType::Stopped, "module stopped")),
                );
                info!(module = %name, phase = %phase, "Module stopped");
                Ok(())
            }
            Err(e) => {
                self.fail(instance, phase, &e, ModuleStatus::Error);
                Err(e)
            }
        }
    }

    /// Await a hook under the hook timeout, containing errors and panics
    async fn call_hook<F>(&self, name: &str, phase: LifecyclePhase, hook: F) -> Result<()>
    where
        F: Future<Output = std::result::Result<(), crate::module::traits::ModuleError>> + Send,
    {
        let timeout = self.inner.hook_timeout;
        match with_custom_timeout(AssertUnwindSafe(hook).catch_unwind(), timeout).await {
            Err(_) => Err(KernelError::HookTimeout {
                module: name.to_string(),
                phase,
                timeout,
            }),
            Ok(Err(panic)) => Err(KernelError::HookExecution {
                module: name.to_string(),
                phase,
                message: format!("hook panicked: {}", panic_message(panic.as_ref())),
            }),
            Ok(Ok(Err(e))) => Err(KernelError::HookExecution {
                module: name.to_string(),
                phase,
                message: e.to_string(),
            }),
            Ok(Ok(Ok(()))) => Ok(()),
        }
    }

    /// Record a failed operation: status, `last_error` and an `error` event
    fn fail(&self, instance: &ModuleInstance, phase: LifecyclePhase, e: &KernelError, status: ModuleStatus) {
        let name = instance.name();
        error!(module = %name, phase = %phase, "{}", e);
        let message = e.to_string();
        let event = ModuleEvent::new(name, ModuleEventType::Error, message.clone())
            .with_data(serde_json::json!({ "phase": phase, "status": status }));
        self.transition(
            instance,
            |s| {
                s.status = status;
                s.last_error = Some(message);
            },
            Some(event),
        );
    }

    fn reject(
        &self,
        name: &str,
        phase: LifecyclePhase,
        status: ModuleStatus,
        reason: impl Into<String>,
    ) -> KernelError {
        let e = invalid(name, phase, status, reason);
        warn!(module = %name, phase = %phase, "{}", e);
        e
    }

    fn record_health(&self, instance: &ModuleInstance, report: &HealthReport) {
        let name = instance.name();
        let health = report.status();
        let mut state = instance.lock_state();
        // A stop may have landed while the probe was in flight
        if state.status != ModuleStatus::Running {
            debug!(module = %name, "Module left Running during health check, result dropped");
            return;
        }
        let changed = state.health_status != health;
        state.health_status = health;
        state.last_health_check = Some(current_timestamp());

        // Only transitions are worth an audit row; periodic probes would flood the log
        let event = changed.then(|| {
            ModuleEvent::new(
                name,
                ModuleEventType::HealthCheck,
                report.message.clone().unwrap_or_else(|| health.to_string()),
            )
            .with_data(serde_json::json!({ "health_status": health }))
        });
        log_error(
            || self.inner.registry.update_runtime(name, &*state, event),
            "Failed to persist module health",
        );
    }

    /// Apply a state change and persist it while holding the state lock
    fn transition(
        &self,
        instance: &ModuleInstance,
        update: impl FnOnce(&mut ModuleRuntimeState),
        event: Option<ModuleEvent>,
    ) {
        let mut state = instance.lock_state();
        update(&mut *state);
        log_error(
            || self.inner.registry.update_runtime(instance.name(), &*state, event),
            "Failed to persist module state",
        );
    }

    fn read_instances(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ModuleInstance>>> {
        self.inner.instances.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_instances(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<ModuleInstance>>> {
        self.inner.instances.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_start_order(&self) -> MutexGuard<'_, Vec<String>> {
        self.inner.start_order.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn invalid(
    name: &str,
    phase: LifecyclePhase,
    status: ModuleStatus,
    reason: impl Into<String>,
) -> KernelError {
    KernelError::InvalidStateTransition {
        module: name.to_string(),
        phase,
        status,
        reason: reason.into(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
