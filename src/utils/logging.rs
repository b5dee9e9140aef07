//! Logging initialization for hosts embedding the kernel
//!
//! The kernel itself only emits `tracing` events with `module` and `phase`
//! fields; installing a subscriber is left to the host. These helpers give a
//! host the usual setup:
//! - `RUST_LOG` takes precedence over any configured filter
//! - falls back to the config filter, then to `"info"`
//! - human-readable output on stderr, JSON behind the `json-logging` feature
//!
//! # Usage
//! ```rust,no_run
//! use module_kernel::utils::init_logging;
//!
//! init_logging(Some("module_kernel=debug"));
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Resolve the effective filter: `RUST_LOG`, then config, then `"info"`
fn build_filter(filter: Option<&str>) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    match filter {
        Some(f) => EnvFilter::try_new(f).unwrap_or_else(|e| {
            eprintln!("Invalid log filter '{}': {}, using \"info\"", f, e);
            EnvFilter::new("info")
        }),
        None => EnvFilter::new("info"),
    }
}

/// Initialize human-readable logging
///
/// Returns `false` if a global subscriber was already installed (for example
/// by an earlier test), in which case the call has no effect.
pub fn init_logging(filter: Option<&str>) -> bool {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(build_filter(filter))
        .try_init()
        .is_ok()
}

/// Initialize logging with JSON output (for log aggregation systems)
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) -> bool {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(build_filter(filter))
        .try_init()
        .is_ok()
}

/// Initialize logging from the `[logging]` section of `KernelConfig`
pub fn init_logging_from_config(config: Option<&LoggingConfig>) -> bool {
    let filter = config.and_then(|c| c.filter.as_deref());

    if config.map(|c| c.json_format).unwrap_or(false) {
        #[cfg(feature = "json-logging")]
        {
            return init_json_logging(filter);
        }
        #[cfg(not(feature = "json-logging"))]
        {
            // Fall back to regular logging if json-logging feature not enabled
            tracing::warn!("json_format requested but json-logging feature is disabled");
            return init_logging(filter);
        }
    }
    init_logging(filter)
}
