//! System-wide health summary
//!
//! The aggregator only reads orchestrator state: probes go through
//! `ModuleManager::probe`, which never changes a module's lifecycle status.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::module::manager::ModuleManager;
use crate::module::traits::HealthReport;
use crate::utils::current_timestamp;

/// Per-module entry of a health summary: `{healthy, message?}`
pub type ModuleHealth = HealthReport;

/// Result of one aggregation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemHealth {
    /// AND of every module entry; true when nothing is running
    pub overall_healthy: bool,
    pub modules: BTreeMap<String, ModuleHealth>,
    /// Unix seconds
    pub checked_at: u64,
}

impl SystemHealth {
    pub fn unhealthy_modules(&self) -> Vec<&str> {
        self.modules
            .iter()
            .filter(|(_, h)| !h.healthy)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Polls every running module's health probe
#[derive(Clone)]
pub struct HealthAggregator {
    manager: ModuleManager,
    probe_timeout: Duration,
}

impl HealthAggregator {
    pub fn new(manager: ModuleManager, probe_timeout: Duration) -> Self {
        Self {
            manager,
            probe_timeout,
        }
    }

    /// Probe all running modules concurrently
    pub async fn check_all(&self) -> SystemHealth {
        let running = self.manager.running_modules();
        debug!("Checking health of {} running modules", running.len());

        let probes = running.iter().map(|name| async move {
            let report = match self.manager.probe(name, self.probe_timeout).await {
                Ok(report) => report,
                // Unregistered between listing and probing
                Err(e) => HealthReport::unhealthy(e.to_string()),
            };
            (name.clone(), report)
        });
        let modules: BTreeMap<String, ModuleHealth> = join_all(probes).await.into_iter().collect();

        let overall_healthy = modules.values().all(|h| h.healthy);
        if !overall_healthy {
            warn!(
                "System unhealthy: {} of {} modules failing",
                modules.values().filter(|h| !h.healthy).count(),
                modules.len()
            );
        }

        SystemHealth {
            overall_healthy,
            modules,
            checked_at: current_timestamp(),
        }
    }
}
