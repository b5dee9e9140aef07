//! Module system traits and interfaces
//!
//! Defines the contract every module implements and the small value types the
//! kernel and modules exchange.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Kind of module, used to pick the bootstrap policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    /// Statically registered, required for baseline operation
    Core,
    /// Discovered, optional, independently toggleable
    Extension,
    /// Long-lived service exposed to other modules
    Service,
    /// Background worker
    Daemon,
    /// Plugin attached to another module
    Plugin,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Core => "core",
            ModuleType::Extension => "extension",
            ModuleType::Service => "service",
            ModuleType::Daemon => "daemon",
            ModuleType::Plugin => "plugin",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "core" => Ok(ModuleType::Core),
            "extension" => Ok(ModuleType::Extension),
            "service" => Ok(ModuleType::Service),
            "daemon" => Ok(ModuleType::Daemon),
            "plugin" => Ok(ModuleType::Plugin),
            other => Err(format!("unknown module type: {}", other)),
        }
    }
}

/// Module lifecycle status
///
/// `Stopped` means initialized and ready to start; a module that was never
/// initialized is `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    #[default]
    Pending,
    Initializing,
    Stopped,
    Running,
    Stopping,
    Error,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Pending => "pending",
            ModuleStatus::Initializing => "initializing",
            ModuleStatus::Stopped => "stopped",
            ModuleStatus::Running => "running",
            ModuleStatus::Stopping => "stopping",
            ModuleStatus::Error => "error",
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known health of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        })
    }
}

/// Result of a health probe: `{healthy, message?}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthReport {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            message: None,
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: Some(message.into()),
        }
    }

    pub fn status(&self) -> HealthStatus {
        if self.healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}

/// Values a module publishes for other subsystems to consume
pub type ModuleExports = BTreeMap<String, serde_json::Value>;

/// Module trait that all modules must implement
///
/// Hooks take `&self`: the kernel shares one instance between concurrent
/// callers, so modules keep mutable state behind their own locks.
#[async_trait]
pub trait Module: Send + Sync {
    /// Prepare the module for operation
    ///
    /// Runs at most once per process lifetime unless it fails, in which case
    /// a fresh `initialize` call retries it.
    async fn initialize(&self, context: ModuleContext) -> Result<(), ModuleError>;

    /// Begin the module's main processing
    async fn start(&self) -> Result<(), ModuleError>;

    /// Graceful shutdown of a running module
    async fn stop(&self) -> Result<(), ModuleError>;

    /// Report operational status; must not change lifecycle state
    async fn health_check(&self) -> Result<HealthReport, ModuleError>;

    /// Values exported to other subsystems
    fn exports(&self) -> ModuleExports {
        ModuleExports::new()
    }
}

/// Context handed to a module's `initialize` hook
#[derive(Debug, Clone, Default)]
pub struct ModuleContext {
    /// Module name
    pub module_name: String,
    /// Directory the module may use for its own state
    pub data_dir: PathBuf,
    /// Flattened configuration (from `config.toml` plus host overrides)
    pub config: HashMap<String, String>,
}

impl ModuleContext {
    pub fn new(
        module_name: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        config: HashMap<String, String>,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            data_dir: data_dir.into(),
            config,
        }
    }

    /// Get a configuration value
    pub fn get_config(&self, key: &str) -> Option<&String> {
        self.config.get(key)
    }

    /// Get a configuration value with default
    pub fn get_config_or(&self, key: &str, default: &str) -> String {
        self.config
            .get(key)
            .map(|s| s.as_str())
            .unwrap_or(default)
            .to_string()
    }
}

/// Errors raised by module implementations
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Module initialization failed: {0}")]
    InitializationError(String),

    #[error("Module operation failed: {0}")]
    OperationError(String),

    #[error("Module unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for ModuleError {
    fn from(e: serde_json::Error) -> Self {
        ModuleError::SerializationError(e.to_string())
    }
}

impl From<anyhow::Error> for ModuleError {
    fn from(e: anyhow::Error) -> Self {
        ModuleError::OperationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_type_round_trips_through_str() {
        for ty in [
            ModuleType::Core,
            ModuleType::Extension,
            ModuleType::Service,
            ModuleType::Daemon,
            ModuleType::Plugin,
        ] {
            assert_eq!(ty.as_str().parse::<ModuleType>().unwrap(), ty);
        }
        assert!("kernel".parse::<ModuleType>().is_err());
    }

    #[test]
    fn test_health_report_status() {
        assert_eq!(HealthReport::healthy().status(), HealthStatus::Healthy);
        let report = HealthReport::unhealthy("db unreachable");
        assert_eq!(report.status(), HealthStatus::Unhealthy);
        assert_eq!(report.message.as_deref(), Some("db unreachable"));
    }

    #[test]
    fn test_context_config_lookup() {
        let mut config = HashMap::new();
        config.insert("pool.size".to_string(), "8".to_string());
        let ctx = ModuleContext::new("db", "/tmp/db", config);
        assert_eq!(ctx.get_config("pool.size").map(String::as_str), Some("8"));
        assert_eq!(ctx.get_config_or("pool.timeout", "30"), "30");
    }
}
