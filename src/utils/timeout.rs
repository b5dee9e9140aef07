//! Timeout utilities for module hooks
//!
//! Every lifecycle hook and health probe runs under a bound so a hung module
//! cannot stall the kernel. Both defaults can be overridden through
//! `BootstrapConfig::hook_timeout_secs` and `HealthConfig::probe_timeout_secs`.

use std::time::Duration;
use tokio::time::timeout;

/// Default bound for `initialize`, `start` and `stop` hooks
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound for a single health probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Execute operation with custom timeout
pub async fn with_custom_timeout<F, T>(
    operation: F,
    duration: Duration,
) -> Result<T, tokio::time::error::Elapsed>
where
    F: std::future::Future<Output = T>,
{
    timeout(duration, operation).await
}
