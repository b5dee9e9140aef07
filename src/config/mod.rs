//! Kernel configuration
//!
//! Loaded from TOML. Every section and field has a default, so an empty file
//! (or no file at all) yields a working in-memory kernel.
//!
//! ```toml
//! [modules]
//! roots = ["modules", "/opt/agent/modules"]
//! enabled_modules = ["auth", "tasks"]
//!
//! [modules.module_configs.tasks]
//! workers = "4"
//!
//! [bootstrap]
//! parallel = true
//! hook_timeout_secs = 10
//!
//! [bootstrap.policies]
//! service = "strict"
//!
//! [storage]
//! backend = "redb"
//! data_dir = "data"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::module::traits::ModuleType;
use crate::storage::database::DatabaseBackend;
use crate::utils::{env_int, env_opt, DEFAULT_HOOK_TIMEOUT, DEFAULT_PROBE_TIMEOUT};

/// Overrides `storage.data_dir` and `modules.data_dir`
pub const ENV_DATA_DIR: &str = "MODKERNEL_DATA_DIR";

/// Overrides `bootstrap.hook_timeout_secs`
pub const ENV_HOOK_TIMEOUT_SECS: &str = "MODKERNEL_HOOK_TIMEOUT_SECS";

fn default_true() -> bool {
    true
}

fn default_module_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("modules")]
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_hook_timeout_secs() -> u64 {
    DEFAULT_HOOK_TIMEOUT.as_secs()
}

fn default_interval_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    DEFAULT_PROBE_TIMEOUT.as_secs()
}

/// Kernel configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelConfig {
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

/// Module discovery and per-module settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModulesConfig {
    /// Directories scanned for `<name>/module.toml`, in priority order
    #[serde(default = "default_module_roots")]
    pub roots: Vec<PathBuf>,

    /// Base directory for per-module data (`<data_dir>/<module>`)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// If set, only these discovered modules are enabled on first install
    #[serde(default)]
    pub enabled_modules: Option<Vec<String>>,

    /// Per-module overrides merged over each module's `config.toml`
    #[serde(default)]
    pub module_configs: HashMap<String, HashMap<String, String>>,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            roots: default_module_roots(),
            data_dir: default_data_dir(),
            enabled_modules: None,
            module_configs: HashMap::new(),
        }
    }
}

impl ModulesConfig {
    /// Whether the allow-list (if any) admits `name`
    pub fn is_allowed(&self, name: &str) -> bool {
        self.enabled_modules
            .as_ref()
            .map_or(true, |allowed| allowed.iter().any(|n| n == name))
    }
}

/// What happens to bootstrap when a module fails to come up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPolicy {
    /// Abort bootstrap
    Strict,
    /// Record the failure; dependents fail their dependency check and
    /// independent modules continue
    BestEffort,
}

impl BootstrapPolicy {
    /// Strict for core modules, best-effort for everything else
    pub fn default_for(module_type: ModuleType) -> Self {
        match module_type {
            ModuleType::Core => BootstrapPolicy::Strict,
            _ => BootstrapPolicy::BestEffort,
        }
    }
}

/// Bootstrap sequencing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Start independent modules of one dependency wave concurrently
    #[serde(default)]
    pub parallel: bool,

    /// Bound on each initialize/start/stop hook
    #[serde(default = "default_hook_timeout_secs")]
    pub hook_timeout_secs: u64,

    /// Per-type policy overrides
    #[serde(default)]
    pub policies: HashMap<ModuleType, BootstrapPolicy>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            parallel: false,
            hook_timeout_secs: default_hook_timeout_secs(),
            policies: HashMap::new(),
        }
    }
}

impl BootstrapConfig {
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hook_timeout_secs)
    }
}

/// Health polling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Start the periodic monitor after bootstrap
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Bound on each module's health probe
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Registry storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendConfig {
    /// Process-local, nothing survives a restart
    #[default]
    Memory,
    Redb,
    Sled,
}

impl From<StorageBackendConfig> for DatabaseBackend {
    fn from(backend: StorageBackendConfig) -> Self {
        match backend {
            StorageBackendConfig::Memory => DatabaseBackend::Memory,
            StorageBackendConfig::Redb => DatabaseBackend::Redb,
            StorageBackendConfig::Sled => DatabaseBackend::Sled,
        }
    }
}

/// Registry storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendConfig,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendConfig::default(),
            data_dir: default_data_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g., "info", "module_kernel=debug"); `RUST_LOG` wins
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

impl KernelConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: KernelConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply `MODKERNEL_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = env_opt(ENV_DATA_DIR) {
            debug!("{} overrides data directories: {}", ENV_DATA_DIR, dir);
            self.storage.data_dir = PathBuf::from(&dir);
            self.modules.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env_int::<u64>(ENV_HOOK_TIMEOUT_SECS) {
            debug!("{} overrides hook timeout: {}s", ENV_HOOK_TIMEOUT_SECS, secs);
            self.bootstrap.hook_timeout_secs = secs;
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bootstrap.hook_timeout_secs == 0 {
            return Err(anyhow::anyhow!("bootstrap.hook_timeout_secs must be greater than 0"));
        }
        if self.health.probe_timeout_secs == 0 {
            return Err(anyhow::anyhow!("health.probe_timeout_secs must be greater than 0"));
        }
        if self.health.enabled && self.health.interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "health.interval_secs must be greater than 0 when health monitoring is enabled"
            ));
        }
        if let Some(allowed) = &self.modules.enabled_modules {
            if let Some(empty) = allowed.iter().find(|n| n.trim().is_empty()) {
                return Err(anyhow::anyhow!(
                    "modules.enabled_modules contains an empty name: {:?}",
                    empty
                ));
            }
        }
        Ok(())
    }
}
