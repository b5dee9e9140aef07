//! Registry tests
//!
//! Module rows, the append-only event log and persistence across reopen.

use std::sync::Arc;
use tempfile::TempDir;

use module_kernel::module::{
    KernelError, ModuleDescriptor, ModuleEvent, ModuleEventType, ModuleRegistry, ModuleType,
};
use module_kernel::storage::database::DatabaseBackend;
use module_kernel::storage::open_storage;

fn descriptor(name: &str, version: &str) -> ModuleDescriptor {
    ModuleDescriptor::new(name, version, ModuleType::Extension, name)
}

fn event_types(registry: &ModuleRegistry, name: &str) -> Vec<ModuleEventType> {
    registry
        .events_for(name)
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect()
}

#[test]
fn test_upsert_is_idempotent() {
    let registry = ModuleRegistry::in_memory().unwrap();
    let first = registry.upsert(&descriptor("auth", "1.0.0")).unwrap();
    let second = registry.upsert(&descriptor("auth", "1.0.0")).unwrap();

    assert_eq!(first, second);
    assert_eq!(registry.get_all().unwrap().len(), 1);
    assert_eq!(event_types(&registry, "auth"), vec![ModuleEventType::Installed]);
}

#[test]
fn test_metadata_change_keeps_enabled_flag() {
    let registry = ModuleRegistry::in_memory().unwrap();
    registry.upsert(&descriptor("auth", "1.0.0")).unwrap();
    registry.set_enabled("auth", false).unwrap();

    let record = registry
        .upsert(&descriptor("auth", "1.1.0").with_dependencies(["db"]))
        .unwrap();
    assert_eq!(record.descriptor.version, "1.1.0");
    assert_eq!(record.descriptor.dependencies, vec!["db"]);
    assert!(!record.descriptor.enabled);

    let events = registry.events_for("auth").unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.event_type, ModuleEventType::ConfigChanged);
    assert_eq!(last.data["previous_version"], "1.0.0");
}

#[test]
fn test_discovered_rows_are_stamped_once() {
    let registry = ModuleRegistry::in_memory().unwrap();
    let record = registry.upsert_discovered(&descriptor("cron", "0.2.0")).unwrap();
    let stamped = record.discovered_at.unwrap();
    let again = registry.upsert_discovered(&descriptor("cron", "0.2.0")).unwrap();

    assert_eq!(again.discovered_at, Some(stamped));
    assert_eq!(
        event_types(&registry, "cron"),
        vec![ModuleEventType::Discovered, ModuleEventType::Installed]
    );
}

#[test]
fn test_set_enabled_logs_only_changes() {
    let registry = ModuleRegistry::in_memory().unwrap();
    registry.upsert(&descriptor("webhooks", "1.0.0")).unwrap();

    registry.set_enabled("webhooks", true).unwrap();
    registry.set_enabled("webhooks", false).unwrap();
    registry.set_enabled("webhooks", false).unwrap();

    let changes: Vec<ModuleEvent> = registry
        .events_for("webhooks")
        .unwrap()
        .into_iter()
        .filter(|e| e.event_type == ModuleEventType::ConfigChanged)
        .collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].message, "module disabled");
    assert!(registry.get_enabled().unwrap().is_empty());

    assert_eq!(
        registry.set_enabled("ghost", true).unwrap_err(),
        KernelError::NotFound("ghost".to_string())
    );
}

#[test]
fn test_rows_are_ordered_by_name() {
    let registry = ModuleRegistry::in_memory().unwrap();
    for name in ["tasks", "auth", "db"] {
        registry.upsert(&descriptor(name, "1.0.0")).unwrap();
    }
    let names: Vec<String> = registry
        .get_all()
        .unwrap()
        .into_iter()
        .map(|r| r.descriptor.name)
        .collect();
    assert_eq!(names, vec!["auth", "db", "tasks"]);
}

#[test]
fn test_events_need_a_known_module() {
    let registry = ModuleRegistry::in_memory().unwrap();
    let err = registry
        .record_event(ModuleEvent::new("ghost", ModuleEventType::Error, "boom"))
        .unwrap_err();
    assert_eq!(err, KernelError::NotFound("ghost".to_string()));

    registry.upsert(&descriptor("db", "1.0.0")).unwrap();
    let event = registry
        .record_event(
            ModuleEvent::new("db", ModuleEventType::Error, "disk full")
                .with_data(serde_json::json!({ "free_bytes": 0 })),
        )
        .unwrap();
    assert!(event.id > 0);
    assert!(event.created_at > 0);
    assert_eq!(registry.events().unwrap().last().unwrap(), &event);
}

#[tokio::test]
async fn test_subscribers_see_appended_events() {
    let registry = ModuleRegistry::in_memory().unwrap();
    let mut rx = registry.subscribe();
    registry.upsert(&descriptor("db", "1.0.0")).unwrap();

    let event = rx.recv().await.unwrap();
    assert_eq!(event.module_name, "db");
    assert_eq!(event.event_type, ModuleEventType::Installed);
}

#[allow(dead_code)]
fn reopen_keeps_rows_and_event_ids(backend: DatabaseBackend) {
    let tmp = TempDir::new().unwrap();
    let last_id = {
        let registry = ModuleRegistry::new(open_storage(tmp.path(), backend).unwrap()).unwrap();
        registry.upsert(&descriptor("db", "1.0.0")).unwrap();
        registry.set_enabled("db", false).unwrap();
        registry.flush().unwrap();
        registry.events().unwrap().last().unwrap().id
    };

    let registry = ModuleRegistry::new(open_storage(tmp.path(), backend).unwrap()).unwrap();
    let record = registry.get_by_name("db").unwrap();
    assert!(!record.descriptor.enabled);

    registry.set_enabled("db", true).unwrap();
    let events = registry.events().unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events.last().unwrap().id, last_id + 1);
}

#[cfg(feature = "redb")]
#[test]
fn test_redb_registry_survives_reopen() {
    reopen_keeps_rows_and_event_ids(DatabaseBackend::Redb);
}

#[cfg(feature = "sled")]
#[test]
fn test_sled_registry_survives_reopen() {
    reopen_keeps_rows_and_event_ids(DatabaseBackend::Sled);
}

#[test]
fn test_memory_backend_is_shared_between_handles() {
    let db = open_storage("unused", DatabaseBackend::Memory).unwrap();
    let a = ModuleRegistry::new(Arc::clone(&db)).unwrap();
    a.upsert(&descriptor("db", "1.0.0")).unwrap();
    let b = ModuleRegistry::new(db).unwrap();
    assert!(b.get_by_name("db").is_ok());
}
