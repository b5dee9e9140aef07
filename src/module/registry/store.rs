//! Durable module registry
//!
//! Stores one `ModuleRecord` per module name in the `modules` tree and an
//! append-only `ModuleEvent` log in the `module_events` tree. Rows are never
//! deleted; disabling a module only flips its flag.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::module::error::{KernelError, Result};
use crate::module::registry::records::{
    ModuleDescriptor, ModuleEvent, ModuleEventType, ModuleRecord, ModuleRuntimeState,
};
use crate::module::traits::{HealthStatus, ModuleStatus};
use crate::storage::database::{
    Database, MemoryDatabase, Tree, WriteBatch, MODULES_TREE, MODULE_EVENTS_TREE,
};
use crate::utils::current_timestamp;

/// Capacity of the live event channel; slow subscribers observe `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Registry of known modules backed by the storage collaborator
pub struct ModuleRegistry {
    db: Arc<dyn Database>,
    modules: Box<dyn Tree>,
    events: Box<dyn Tree>,
    /// Serializes read-modify-write cycles on module rows
    write_lock: Mutex<()>,
    next_event_id: AtomicU64,
    event_tx: broadcast::Sender<ModuleEvent>,
}

impl ModuleRegistry {
    /// Open the registry over an existing database
    ///
    /// Rows a previous process left `Running`, `Initializing` or `Stopping`
    /// describe modules that no longer run; they are reset to `Pending`.
    pub fn new(db: Arc<dyn Database>) -> Result<Self> {
        let modules = db.open_tree(MODULES_TREE).map_err(KernelError::storage)?;
        let events = db
            .open_tree(MODULE_EVENTS_TREE)
            .map_err(KernelError::storage)?;

        let mut last_id = 0u64;
        for item in events.iter() {
            let (key, _) = item.map_err(KernelError::storage)?;
            if let Ok(bytes) = <[u8; 8]>::try_from(key.as_slice()) {
                last_id = last_id.max(u64::from_be_bytes(bytes));
            }
        }

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        debug!("Module registry opened, next event id {}", last_id + 1);

        let registry = Self {
            db,
            modules,
            events,
            write_lock: Mutex::new(()),
            next_event_id: AtomicU64::new(last_id + 1),
            event_tx,
        };
        registry.recover_stale_runtime()?;
        Ok(registry)
    }

    /// Registry over a process-local database
    pub fn in_memory() -> Result<Self> {
        Self::new(Arc::new(MemoryDatabase::new()))
    }

    /// Insert or update a module row
    ///
    /// Updates metadata on re-registration while keeping `created_at`, the
    /// runtime columns and the stored `enabled` flag.
    pub fn upsert(&self, descriptor: &ModuleDescriptor) -> Result<ModuleRecord> {
        self.upsert_inner(descriptor, false)
    }

    /// Upsert a module found by a discovery scan
    ///
    /// Stamps `discovered_at` and appends a `discovered` event the first time
    /// the scan sees the module.
    pub fn upsert_discovered(&self, descriptor: &ModuleDescriptor) -> Result<ModuleRecord> {
        self.upsert_inner(descriptor, true)
    }

    fn upsert_inner(&self, descriptor: &ModuleDescriptor, discovered: bool) -> Result<ModuleRecord> {
        let _guard = self.lock();
        let now = current_timestamp();
        let mut pending_events = Vec::new();

        let (record, changed) = match self.read_record(&descriptor.name)? {
            None => {
                let record = ModuleRecord {
                    descriptor: descriptor.clone(),
                    runtime: ModuleRuntimeState::default(),
                    discovered_at: discovered.then_some(now),
                    created_at: now,
                    updated_at: now,
                };
                if discovered {
                    pending_events.push(ModuleEvent::new(
                        &descriptor.name,
                        ModuleEventType::Discovered,
                        "module discovered",
                    ));
                }
                pending_events.push(
                    ModuleEvent::new(&descriptor.name, ModuleEventType::Installed, "module installed")
                        .with_data(serde_json::json!({
                            "version": descriptor.version,
                            "type": descriptor.module_type,
                            "dependencies": descriptor.dependencies,
                        })),
                );
                info!(
                    module = %descriptor.name,
                    version = %descriptor.version,
                    "Registered module"
                );
                (record, true)
            }
            Some(mut record) => {
                let mut changed = false;
                if record.descriptor.metadata_differs(descriptor) {
                    pending_events.push(
                        ModuleEvent::new(
                            &descriptor.name,
                            ModuleEventType::ConfigChanged,
                            "module metadata updated",
                        )
                        .with_data(serde_json::json!({
                            "previous_version": record.descriptor.version,
                            "version": descriptor.version,
                        })),
                    );
                    let enabled = record.descriptor.enabled;
                    record.descriptor = descriptor.clone();
                    record.descriptor.enabled = enabled;
                    changed = true;
                }
                if discovered && record.discovered_at.is_none() {
                    record.discovered_at = Some(now);
                    pending_events.push(ModuleEvent::new(
                        &descriptor.name,
                        ModuleEventType::Discovered,
                        "module discovered",
                    ));
                    changed = true;
                }
                if changed {
                    record.updated_at = now;
                }
                (record, changed)
            }
        };

        if changed {
            self.commit(Some(&record), pending_events, now)?;
        }
        Ok(record)
    }

    /// All module rows, ordered by name
    pub fn get_all(&self) -> Result<Vec<ModuleRecord>> {
        let mut records = Vec::new();
        for item in self.modules.iter() {
            let (_, value) = item.map_err(KernelError::storage)?;
            records.push(decode_record(&value)?);
        }
        // Backends iterate in key order already; keep the contract explicit
        records.sort_by(|a, b| a.descriptor.name.cmp(&b.descriptor.name));
        Ok(records)
    }

    /// Enabled module rows, ordered by name
    pub fn get_enabled(&self) -> Result<Vec<ModuleRecord>> {
        Ok(self
            .get_all()?
            .into_iter()
            .filter(ModuleRecord::is_enabled)
            .collect())
    }

    /// Fetch a module row, failing with `NotFound` for unknown names
    pub fn get_by_name(&self, name: &str) -> Result<ModuleRecord> {
        self.read_record(name)?
            .ok_or_else(|| KernelError::NotFound(name.to_string()))
    }

    /// Flip the enabled flag, appending a `config_changed` event on change
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<ModuleRecord> {
        let _guard = self.lock();
        let mut record = self
            .read_record(name)?
            .ok_or_else(|| KernelError::NotFound(name.to_string()))?;
        if record.descriptor.enabled == enabled {
            return Ok(record);
        }

        let now = current_timestamp();
        record.descriptor.enabled = enabled;
        record.updated_at = now;
        let message = if enabled { "module enabled" } else { "module disabled" };
        self.commit(
            Some(&record),
            vec![ModuleEvent::new(name, ModuleEventType::ConfigChanged, message)
                .with_data(serde_json::json!({ "enabled": enabled }))],
            now,
        )?;
        info!(module = %name, enabled, "Module {}", if enabled { "enabled" } else { "disabled" });
        Ok(record)
    }

    /// Persist runtime columns, appending `event` in the same transaction
    ///
    /// Completed transitions always carry an event. Writes without one are
    /// reserved for in-flight statuses (`Initializing`, `Stopping`) and for
    /// repeated health probes that did not change `health_status`; the event
    /// of the transition that follows closes them out.
    pub fn update_runtime(
        &self,
        name: &str,
        runtime: &ModuleRuntimeState,
        event: Option<ModuleEvent>,
    ) -> Result<()> {
        let _guard = self.lock();
        let mut record = self
            .read_record(name)?
            .ok_or_else(|| KernelError::NotFound(name.to_string()))?;
        let now = current_timestamp();
        record.runtime = runtime.clone();
        record.updated_at = now;
        self.commit(Some(&record), event.into_iter().collect(), now)?;
        Ok(())
    }

    /// Append an event for a known module; returns it with id and timestamp
    pub fn record_event(&self, event: ModuleEvent) -> Result<ModuleEvent> {
        let _guard = self.lock();
        if !self
            .modules
            .contains_key(event.module_name.as_bytes())
            .map_err(KernelError::storage)?
        {
            return Err(KernelError::NotFound(event.module_name));
        }
        let mut appended = self.commit(None, vec![event], current_timestamp())?;
        appended
            .pop()
            .ok_or_else(|| KernelError::Storage("event was not appended".to_string()))
    }

    /// Events of one module, oldest first
    pub fn events_for(&self, name: &str) -> Result<Vec<ModuleEvent>> {
        Ok(self
            .events()?
            .into_iter()
            .filter(|e| e.module_name == name)
            .collect())
    }

    /// The whole event log, oldest first
    pub fn events(&self) -> Result<Vec<ModuleEvent>> {
        let mut events = Vec::new();
        for item in self.events.iter() {
            let (_, value) = item.map_err(KernelError::storage)?;
            let event: ModuleEvent = serde_json::from_slice(&value)
                .map_err(|e| KernelError::Storage(format!("corrupt event row: {}", e)))?;
            events.push(event);
        }
        Ok(events)
    }

    /// Live stream of events appended after the call
    pub fn subscribe(&self) -> broadcast::Receiver<ModuleEvent> {
        self.event_tx.subscribe()
    }

    /// Flush pending writes to the storage engine
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(KernelError::storage)
    }

    /// Reset rows whose status only made sense inside the process that wrote it
    fn recover_stale_runtime(&self) -> Result<()> {
        let _guard = self.lock();
        for mut record in self.get_all()? {
            let previous = record.runtime.status;
            if !matches!(
                previous,
                ModuleStatus::Running | ModuleStatus::Initializing | ModuleStatus::Stopping
            ) {
                continue;
            }

            warn!(
                module = %record.name(),
                "Module was {} when the registry was last closed, resetting to pending",
                previous
            );
            let now = current_timestamp();
            record.runtime.status = ModuleStatus::Pending;
            record.runtime.health_status = HealthStatus::Unknown;
            record.runtime.last_stopped_at = Some(now);
            record.updated_at = now;
            let event = ModuleEvent::new(
                record.name(),
                ModuleEventType::Stopped,
                "module was not stopped cleanly",
            )
            .with_data(serde_json::json!({ "previous_status": previous }));
            self.commit(Some(&record), vec![event], now)?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_record(&self, name: &str) -> Result<Option<ModuleRecord>> {
        match self
            .modules
            .get(name.as_bytes())
            .map_err(KernelError::storage)?
        {
            Some(bytes) => Ok(Some(decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write a module row and append events as one storage transaction
    ///
    /// Subscribers are only notified once the transaction has committed.
    fn commit(
        &self,
        record: Option<&ModuleRecord>,
        events: Vec<ModuleEvent>,
        now: u64,
    ) -> Result<Vec<ModuleEvent>> {
        let mut batch = WriteBatch::new();
        if let Some(record) = record {
            let bytes = serde_json::to_vec(record)
                .map_err(|e| KernelError::Storage(format!("failed to encode module row: {}", e)))?;
            batch.insert(MODULES_TREE, record.descriptor.name.as_bytes(), bytes);
        }

        let mut appended = Vec::with_capacity(events.len());
        for mut event in events {
            event.id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
            event.created_at = now;
            let bytes = serde_json::to_vec(&event)
                .map_err(|e| KernelError::Storage(format!("failed to encode event: {}", e)))?;
            batch.insert(MODULE_EVENTS_TREE, event.id.to_be_bytes(), bytes);
            appended.push(event);
        }

        self.db.apply_batch(&batch).map_err(KernelError::storage)?;

        for event in &appended {
            debug!(
                module = %event.module_name,
                event = %event.event_type,
                "{}",
                event.message
            );
            // No receivers is fine
            let _ = self.event_tx.send(event.clone());
        }
        Ok(appended)
    }
}

fn decode_record(bytes: &[u8]) -> Result<ModuleRecord> {
    serde_json::from_slice(bytes)
        .map_err(|e| KernelError::Storage(format!("corrupt module row: {}", e)))
}
