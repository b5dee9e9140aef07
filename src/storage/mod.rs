//! Storage layer for the module registry
//!
//! The kernel persists through the `Database`/`Tree` traits only; the engine
//! behind them is chosen by configuration.

pub mod database;

use anyhow::Result;
use database::{create_database, fallback_backend, Database, DatabaseBackend};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Open the registry database
///
/// If a durable backend fails to open and the other durable backend is
/// compiled in, falls back to it.
pub fn open_storage<P: AsRef<Path>>(data_dir: P, backend: DatabaseBackend) -> Result<Arc<dyn Database>> {
    match create_database(data_dir.as_ref(), backend) {
        Ok(db) => {
            info!("Opened {:?} registry storage", backend);
            Ok(Arc::from(db))
        }
        Err(e) => {
            if let Some(fallback) = fallback_backend(backend) {
                warn!(
                    "Failed to initialize {:?} backend: {}. Falling back to {:?}.",
                    backend, e, fallback
                );
                Ok(Arc::from(create_database(data_dir, fallback)?))
            } else {
                Err(anyhow::anyhow!(
                    "Failed to initialize {:?} backend: {}. No fallback backend available.",
                    backend,
                    e
                ))
            }
        }
    }
}
