//! Shared helpers: logging setup, timeouts, time and environment access

pub mod env;
pub mod error;
pub mod logging;
pub mod time;
pub mod timeout;

// Re-export commonly used items
pub use env::{env_int, env_opt};
pub use error::log_error;
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config};
pub use time::current_timestamp;
pub use timeout::{with_custom_timeout, DEFAULT_HOOK_TIMEOUT, DEFAULT_PROBE_TIMEOUT};
