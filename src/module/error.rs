//! Kernel error taxonomy
//!
//! `KernelError` is `Clone` so that one failed in-flight lifecycle operation can
//! hand the same error to every caller that joined it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::module::traits::ModuleStatus;

/// Lifecycle phase an error or event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    Discover,
    Resolve,
    Initialize,
    Start,
    Stop,
    HealthCheck,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Discover => "discover",
            LifecyclePhase::Resolve => "resolve",
            LifecyclePhase::Initialize => "initialize",
            LifecyclePhase::Start => "start",
            LifecyclePhase::Stop => "stop",
            LifecyclePhase::HealthCheck => "health_check",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kernel errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// Module artifact missing or malformed
    #[error("Discovery failed for {location}: {reason}")]
    Discovery { location: String, reason: String },

    /// A module requires a module absent from the enabled set
    #[error("Module '{module}' depends on '{dependency}', which is not registered or not enabled")]
    UnresolvedDependency { module: String, dependency: String },

    /// The dependency graph contains a cycle
    #[error("Cyclic dependency between modules: {}", .members.join(", "))]
    CyclicDependency { members: Vec<String> },

    /// Operation not allowed from the module's current status
    #[error("Module '{module}' cannot {phase} while {status}: {reason}")]
    InvalidStateTransition {
        module: String,
        phase: LifecyclePhase,
        status: ModuleStatus,
        reason: String,
    },

    /// A module hook returned an error or panicked
    #[error("Module '{module}' failed during {phase}: {message}")]
    HookExecution {
        module: String,
        phase: LifecyclePhase,
        message: String,
    },

    /// A module hook did not finish within the configured bound
    #[error("Module '{module}' {phase} hook timed out after {timeout:?}")]
    HookTimeout {
        module: String,
        phase: LifecyclePhase,
        timeout: Duration,
    },

    /// Benign; callers of `initialize` never see it
    #[error("Module '{0}' is already initialized")]
    AlreadyInitialized(String),

    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KernelError {
    /// Name of the module the error is attributed to, if any
    pub fn module(&self) -> Option<&str> {
        match self {
            KernelError::UnresolvedDependency { module, .. }
            | KernelError::InvalidStateTransition { module, .. }
            | KernelError::HookExecution { module, .. }
            | KernelError::HookTimeout { module, .. } => Some(module),
            KernelError::AlreadyInitialized(module) | KernelError::NotFound(module) => {
                Some(module)
            }
            _ => None,
        }
    }

    pub(crate) fn discovery(location: impl Into<String>, reason: impl Into<String>) -> Self {
        KernelError::Discovery {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn storage(e: impl fmt::Display) -> Self {
        KernelError::Storage(e.to_string())
    }
}

/// Kernel result type
pub type Result<T> = std::result::Result<T, KernelError>;
