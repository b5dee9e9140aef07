//! Persisted module records and audit events

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::module::traits::{HealthStatus, ModuleStatus, ModuleType};

/// Shortest module name the kernel accepts
pub const MIN_MODULE_NAME_LEN: usize = 2;

/// Longest module name the kernel accepts
pub const MAX_MODULE_NAME_LEN: usize = 64;

fn default_true() -> bool {
    true
}

/// Identity and static metadata of a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Unique module name
    pub name: String,
    /// Semver-like version string
    pub version: String,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    /// Locator the loader resolves into an implementation
    pub path: String,
    /// Names of required modules, in declaration order
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

impl ModuleDescriptor {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        module_type: ModuleType,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            module_type,
            path: path.into(),
            dependencies: Vec::new(),
            enabled: true,
            auto_start: true,
        }
    }

    /// Descriptor for a statically registered core module
    ///
    /// Core modules ship with the host, so they carry the host's version.
    pub fn core<I, S>(name: impl Into<String>, path: impl Into<String>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(name, env!("CARGO_PKG_VERSION"), ModuleType::Core, path)
            .with_dependencies(dependencies)
    }

    /// Set dependencies, dropping repeats while keeping first-seen order
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut deps: Vec<String> = Vec::new();
        for dep in dependencies {
            let dep = dep.into();
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        self.dependencies = deps;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    /// True if the metadata (everything but `enabled`) differs
    pub(crate) fn metadata_differs(&self, other: &ModuleDescriptor) -> bool {
        self.version != other.version
            || self.module_type != other.module_type
            || self.path != other.path
            || self.dependencies != other.dependencies
            || self.auto_start != other.auto_start
    }
}

/// Mutable runtime state of a module, owned by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModuleRuntimeState {
    pub status: ModuleStatus,
    pub health_status: HealthStatus,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_started_at: Option<u64>,
    #[serde(default)]
    pub last_stopped_at: Option<u64>,
    #[serde(default)]
    pub last_health_check: Option<u64>,
}

/// A `modules` row: descriptor, persisted runtime columns and bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    #[serde(flatten)]
    pub descriptor: ModuleDescriptor,
    #[serde(flatten)]
    pub runtime: ModuleRuntimeState,
    #[serde(default)]
    pub discovered_at: Option<u64>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl ModuleRecord {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn is_enabled(&self) -> bool {
        self.descriptor.enabled
    }
}

/// Kind of audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleEventType {
    Discovered,
    Installed,
    Started,
    Stopped,
    Error,
    HealthCheck,
    ConfigChanged,
}

impl fmt::Display for ModuleEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModuleEventType::Discovered => "discovered",
            ModuleEventType::Installed => "installed",
            ModuleEventType::Started => "started",
            ModuleEventType::Stopped => "stopped",
            ModuleEventType::Error => "error",
            ModuleEventType::HealthCheck => "health_check",
            ModuleEventType::ConfigChanged => "config_changed",
        })
    }
}

/// Append-only audit record (`module_events` row)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEvent {
    /// Assigned by the registry on append
    pub id: u64,
    pub module_name: String,
    pub event_type: ModuleEventType,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Assigned by the registry on append
    pub created_at: u64,
}

impl ModuleEvent {
    pub fn new(
        module_name: impl Into<String>,
        event_type: ModuleEventType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            module_name: module_name.into(),
            event_type,
            message: message.into(),
            data: serde_json::Value::Null,
            created_at: 0,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
