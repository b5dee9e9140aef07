//! Module manifest parsing
//!
//! Handles parsing `module.toml` manifests and the optional `config.toml`
//! sitting next to them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::module::error::{KernelError, Result};
use crate::module::registry::records::ModuleDescriptor;
use crate::module::traits::ModuleType;

fn default_true() -> bool {
    true
}

fn default_module_type() -> ModuleType {
    ModuleType::Extension
}

/// Module manifest (module.toml structure)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Module name
    pub name: String,
    /// Module version (semantic versioning)
    pub version: String,
    /// Module kind; discovered modules are extensions unless stated
    #[serde(rename = "type", default = "default_module_type")]
    pub module_type: ModuleType,
    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,
    /// Locator handed to the loader; defaults to the module name
    #[serde(default)]
    pub path: Option<String>,
    /// Names of required modules
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

impl ModuleManifest {
    /// Load manifest from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let location = path.as_ref().display().to_string();
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            KernelError::discovery(&location, format!("failed to read manifest: {}", e))
        })?;
        Self::from_toml_str(&contents)
            .map_err(|reason| KernelError::discovery(location, reason))
    }

    /// Parse manifest TOML
    pub fn from_toml_str(contents: &str) -> std::result::Result<Self, String> {
        toml::from_str(contents).map_err(|e| format!("failed to parse manifest TOML: {}", e))
    }

    /// Locator the loader should resolve
    pub fn entry_path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }

    /// Convert to the registry's descriptor
    pub fn to_descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor::new(
            self.name.clone(),
            self.version.clone(),
            self.module_type,
            self.entry_path(),
        )
        .with_dependencies(self.dependencies.iter().cloned())
        .with_enabled(self.enabled)
        .with_auto_start(self.auto_start)
    }
}

/// Load a module's `config.toml` as dot-notation key/value pairs
///
/// A missing file yields an empty map; a malformed one is a discovery error.
pub fn load_module_config<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
    let path = path.as_ref();
    let mut config = HashMap::new();
    if !path.exists() {
        return Ok(config);
    }

    let location = path.display().to_string();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        KernelError::discovery(&location, format!("failed to read config: {}", e))
    })?;
    let value: toml::Value = toml::from_str(&contents).map_err(|e| {
        KernelError::discovery(&location, format!("failed to parse config TOML: {}", e))
    })?;
    flatten_toml_value(String::new(), &value, &mut config);
    Ok(config)
}

/// Flatten nested TOML into dot-notation keys (`[pool] size = 8` -> `pool.size`)
fn flatten_toml_value(prefix: String, value: &toml::Value, result: &mut HashMap<String, String>) {
    use toml::Value;

    match value {
        Value::Table(table) => {
            for (key, val) in table {
                let new_prefix = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_toml_value(new_prefix, val, result);
            }
        }
        _ if prefix.is_empty() => {}
        Value::String(s) => {
            result.insert(prefix, s.clone());
        }
        Value::Integer(i) => {
            result.insert(prefix, i.to_string());
        }
        Value::Float(f) => {
            result.insert(prefix, f.to_string());
        }
        Value::Boolean(b) => {
            result.insert(prefix, b.to_string());
        }
        Value::Datetime(dt) => {
            result.insert(prefix, dt.to_string());
        }
        Value::Array(arr) => {
            let values: Vec<String> = arr
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    _ => v.to_string(),
                })
                .collect();
            result.insert(prefix, values.join(","));
        }
    }
}
