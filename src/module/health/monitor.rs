//! Periodic health monitoring
//!
//! Runs `HealthAggregator::check_all` on an interval until cancelled and
//! publishes each summary on a watch channel.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::module::health::aggregator::{HealthAggregator, SystemHealth};

/// Interval-driven health poller
pub struct HealthMonitor {
    aggregator: HealthAggregator,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(aggregator: HealthAggregator, interval: Duration) -> Self {
        Self {
            aggregator,
            interval,
        }
    }

    /// Spawn the polling task; it stops when `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> HealthMonitorHandle {
        let (tx, rx) = watch::channel(None);
        let token = cancel.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            info!("Starting health monitor (interval {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let health = self.aggregator.check_all().await;
                        if !health.overall_healthy {
                            warn!("Unhealthy modules: {:?}", health.unhealthy_modules());
                        }
                        if tx.send(Some(health)).is_err() {
                            debug!("Health monitor has no listeners left");
                        }
                    }
                }
            }
            info!("Health monitor stopped");
        });

        HealthMonitorHandle { cancel, task, rx }
    }
}

/// Handle to a running health monitor
pub struct HealthMonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    rx: watch::Receiver<Option<SystemHealth>>,
}

impl HealthMonitorHandle {
    /// Most recent summary, if a pass has completed
    pub fn latest(&self) -> Option<SystemHealth> {
        self.rx.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the poller and wait for it to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Health monitor task ended abnormally: {}", e);
        }
    }
}
