//! Kernel integration tests
//!
//! Drive the whole pipeline: discovery on a temp directory, registry rows,
//! dependency ordering, bootstrap policies, administrative operations and
//! shutdown.

mod common;

use common::*;
use std::sync::Arc;

use module_kernel::module::{
    HealthStatus, KernelError, ModuleEventType, ModuleStatus, ModuleType,
};
use module_kernel::storage::database::{Database, MemoryDatabase};
use module_kernel::{BootstrapPolicy, ModuleKernel};

#[tokio::test]
async fn test_bootstrap_starts_in_dependency_order() {
    let fixture = KernelFixture::new();
    let tasks = fixture.module("tasks", &["auth", "db"]);
    let auth = fixture.module("auth", &["db"]);
    let db = fixture.module("db", &[]);
    let kernel = fixture.kernel(&[tasks, auth, db]);

    let report = kernel.bootstrap().await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.started, vec!["db", "auth", "tasks"]);
    assert_eq!(calls_of(&fixture.log, "start"), vec!["db", "auth", "tasks"]);
    assert_eq!(
        kernel.load_order(),
        Some(vec!["db".to_string(), "auth".to_string(), "tasks".to_string()])
    );

    for view in kernel.status().unwrap() {
        assert_eq!(view.status, ModuleStatus::Running, "{}", view.name);
        assert_eq!(view.module_type, ModuleType::Extension);
        assert!(view.enabled);
    }
    assert!(kernel.get_module("auth").is_some());
    assert_eq!(kernel.get_exports("auth").unwrap()["name"], "auth");
}

#[tokio::test]
async fn test_parallel_bootstrap_respects_waves() {
    let mut fixture = KernelFixture::new();
    fixture.config.bootstrap.parallel = true;
    let modules = vec![
        fixture.module("db", &[]),
        fixture.module("cache", &[]),
        fixture.module("auth", &["db", "cache"]),
        fixture.module("tasks", &["auth"]),
    ];
    let kernel = fixture.kernel(&modules);

    let report = kernel.bootstrap().await.unwrap();
    assert!(report.is_success());
    let starts = calls_of(&fixture.log, "start");
    let position = |name: &str| starts.iter().position(|s| s == name).unwrap();
    assert!(position("auth") > position("db"));
    assert!(position("auth") > position("cache"));
    assert!(position("tasks") > position("auth"));
}

#[tokio::test]
async fn test_cycle_fails_before_any_hook() {
    let fixture = KernelFixture::new();
    let modules = vec![
        fixture.module("alpha", &["beta"]),
        fixture.module("beta", &["alpha"]),
        fixture.module("gamma", &[]),
    ];
    let kernel = fixture.kernel(&modules);

    let err = kernel.bootstrap().await.unwrap_err();
    assert_eq!(
        err,
        KernelError::CyclicDependency {
            members: vec!["alpha".to_string(), "beta".to_string()]
        }
    );
    assert!(calls(&fixture.log).is_empty());
}

#[tokio::test]
async fn test_missing_dependency_fails_before_any_hook() {
    let fixture = KernelFixture::new();
    let auth = fixture.module("auth", &["db"]);
    let kernel = fixture.kernel(&[auth]);

    let err = kernel.bootstrap().await.unwrap_err();
    assert_eq!(
        err,
        KernelError::UnresolvedDependency {
            module: "auth".to_string(),
            dependency: "db".to_string(),
        }
    );
    assert!(calls(&fixture.log).is_empty());
}

#[tokio::test]
async fn test_missing_implementation_is_a_discovery_error() {
    let fixture = KernelFixture::new();
    fixture.module("orphan", &[]);
    let kernel = fixture.kernel(&[]);

    let err = kernel.bootstrap().await.unwrap_err();
    assert!(matches!(err, KernelError::Discovery { .. }));
}

#[tokio::test]
async fn test_malformed_manifest_is_excluded_not_fatal() {
    let fixture = KernelFixture::new();
    let db = fixture.module("db", &[]);
    let broken = fixture.modules_dir.join("broken");
    std::fs::create_dir_all(&broken).unwrap();
    std::fs::write(broken.join("module.toml"), "name = [\n").unwrap();
    let kernel = fixture.kernel(&[db]);

    let report = kernel.bootstrap().await.unwrap();
    assert_eq!(report.started, vec!["db"]);
    assert!(kernel.registry().get_by_name("broken").is_err());
}

#[tokio::test]
async fn test_disable_running_module_leaves_dependents_running() {
    let fixture = KernelFixture::new();
    let modules = vec![
        fixture.module("db", &[]),
        fixture.module("auth", &["db"]),
        fixture.module("tasks", &["auth", "db"]),
    ];
    let kernel = fixture.kernel(&modules);
    kernel.bootstrap().await.unwrap();

    let record = kernel.disable_module("auth").await.unwrap();
    assert!(!record.descriptor.enabled);
    assert_eq!(kernel.manager().status("auth"), Some(ModuleStatus::Stopped));
    assert_eq!(kernel.manager().status("tasks"), Some(ModuleStatus::Running));

    let enabled: Vec<String> = kernel
        .get_enabled_modules()
        .unwrap()
        .into_iter()
        .map(|r| r.descriptor.name)
        .collect();
    assert_eq!(enabled, vec!["db", "tasks"]);

    let events = kernel.events("auth").unwrap();
    assert!(events
        .iter()
        .any(|e| e.event_type == ModuleEventType::ConfigChanged && e.message == "module disabled"));
    assert!(events
        .iter()
        .any(|e| e.event_type == ModuleEventType::Stopped && e.message == "module stopped"));

    // The disabled module no longer satisfies its dependents
    let err = kernel.bootstrap().await.unwrap_err();
    assert_eq!(
        err,
        KernelError::UnresolvedDependency {
            module: "tasks".to_string(),
            dependency: "auth".to_string(),
        }
    );

    kernel.enable_module("auth").unwrap();
    kernel.start("auth").await.unwrap();
    assert_eq!(kernel.manager().status("auth"), Some(ModuleStatus::Running));
}

#[tokio::test]
async fn test_second_bootstrap_keeps_running_modules() {
    let fixture = KernelFixture::new();
    let cron = fixture.module("cron", &[]);
    let db = StubModule::new("db", &fixture.log);
    let audit = StubModule::new("audit", &fixture.log);
    let kernel = fixture.kernel(&[cron.clone(), db.clone(), audit.clone()]);
    kernel
        .register_core_module("db", "builtin/db", Vec::<&str>::new())
        .unwrap();

    kernel.bootstrap().await.unwrap();
    // A module that shows up later is brought up by the next bootstrap
    write_manifest(&fixture.modules_dir, "audit", &["db"], "");
    let report = kernel.bootstrap().await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.started, vec!["cron", "db", "audit"]);
    for module in [&cron, &db] {
        assert_eq!(StubModule::count(&module.inits), 1, "{}", module.name);
        assert_eq!(StubModule::count(&module.starts), 1, "{}", module.name);
        assert_eq!(StubModule::count(&module.stops), 0, "{}", module.name);
    }
    assert_eq!(StubModule::count(&audit.starts), 1);
    for view in kernel.status().unwrap() {
        assert_eq!(view.status, ModuleStatus::Running, "{}", view.name);
    }
}

#[tokio::test]
async fn test_modules_left_running_by_a_crash_are_reset() {
    let fixture = KernelFixture::new();
    let db_stub = fixture.module("db", &[]);
    let storage: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
    let kernel_for = |storage: &Arc<dyn Database>| {
        ModuleKernel::with_database(
            fixture.config.clone(),
            Arc::clone(storage),
            Arc::new(loader_for(&[db_stub.clone()])),
        )
        .unwrap()
    };

    {
        let kernel = kernel_for(&storage);
        kernel.bootstrap().await.unwrap();
        kernel.health_check("db").await.unwrap();
        // Dropped without shutdown
    }

    let kernel = kernel_for(&storage);
    let views = kernel.status().unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].status, ModuleStatus::Pending);
    assert_eq!(views[0].health, HealthStatus::Unknown);
    let last = kernel.events("db").unwrap().pop().unwrap();
    assert_eq!(last.event_type, ModuleEventType::Stopped);
    assert_eq!(last.message, "module was not stopped cleanly");

    kernel.bootstrap().await.unwrap();
    assert_eq!(kernel.manager().status("db"), Some(ModuleStatus::Running));
    assert_eq!(StubModule::count(&db_stub.inits), 2);
}

#[tokio::test]
async fn test_strict_core_failure_aborts_and_unwinds() {
    let fixture = KernelFixture::new();
    let cron = fixture.module("cron", &[]);
    let web = fixture.module("web", &["db"]);
    let db = StubModule::new("db", &fixture.log);
    StubModule::set(&db.fail_init);
    let kernel = fixture.kernel(&[cron.clone(), web.clone(), db.clone()]);
    kernel
        .register_core_module("db", "builtin/db", Vec::<&str>::new())
        .unwrap();

    let err = kernel.bootstrap().await.unwrap_err();
    assert!(matches!(err, KernelError::HookExecution { ref module, .. } if module == "db"));

    // cron came up before db failed and is unwound; web is never touched
    assert_eq!(StubModule::count(&cron.stops), 1);
    assert_eq!(kernel.manager().status("cron"), Some(ModuleStatus::Stopped));
    assert_eq!(StubModule::count(&web.inits), 0);
    assert_eq!(kernel.manager().status("web"), Some(ModuleStatus::Pending));
}

#[tokio::test]
async fn test_best_effort_failure_isolates_dependents() {
    let fixture = KernelFixture::new();
    let db = fixture.module("db", &[]);
    StubModule::set(&db.fail_start);
    let modules = vec![db, fixture.module("auth", &["db"]), fixture.module("cron", &[])];
    let kernel = fixture.kernel(&modules);

    let report = kernel.bootstrap().await.unwrap();
    assert!(!report.is_success());
    assert!(report.aborted.is_none());
    assert!(matches!(
        report.failure_of("db"),
        Some(KernelError::HookExecution { .. })
    ));
    assert!(matches!(
        report.failure_of("auth"),
        Some(KernelError::InvalidStateTransition { .. })
    ));
    assert_eq!(report.started, vec!["cron"]);

    let status: Vec<(String, ModuleStatus)> = kernel
        .status()
        .unwrap()
        .into_iter()
        .map(|v| (v.name, v.status))
        .collect();
    assert_eq!(
        status,
        vec![
            ("auth".to_string(), ModuleStatus::Stopped),
            ("cron".to_string(), ModuleStatus::Running),
            ("db".to_string(), ModuleStatus::Stopped),
        ]
    );
    let db_view = kernel
        .status()
        .unwrap()
        .into_iter()
        .find(|v| v.name == "db")
        .unwrap();
    assert!(db_view.last_error.unwrap().contains("port in use"));
}

#[tokio::test]
async fn test_policy_override_makes_extensions_strict() {
    let mut fixture = KernelFixture::new();
    fixture
        .config
        .bootstrap
        .policies
        .insert(ModuleType::Extension, BootstrapPolicy::Strict);
    let db = fixture.module("db", &[]);
    StubModule::set(&db.fail_init);
    let later = fixture.module("later", &["db"]);
    let kernel = fixture.kernel(&[db, later.clone()]);

    assert!(kernel.bootstrap().await.is_err());
    assert_eq!(StubModule::count(&later.inits), 0);
}

#[tokio::test]
async fn test_auto_start_pulls_in_required_modules() {
    let fixture = KernelFixture::new();
    let modules = vec![
        fixture.module_with("db", &[], "auto_start = false"),
        fixture.module("auth", &["db"]),
        fixture.module_with("reports", &[], "auto_start = false"),
    ];
    let kernel = fixture.kernel(&modules);

    let report = kernel.bootstrap().await.unwrap();
    assert_eq!(report.initialized, vec!["db", "auth", "reports"]);
    assert_eq!(report.started, vec!["db", "auth"]);
    assert_eq!(kernel.manager().status("db"), Some(ModuleStatus::Running));
    assert_eq!(kernel.manager().status("auth"), Some(ModuleStatus::Running));
    assert_eq!(kernel.manager().status("reports"), Some(ModuleStatus::Stopped));
}

#[tokio::test]
async fn test_allow_list_applies_on_first_install() {
    let mut fixture = KernelFixture::new();
    fixture.config.modules.enabled_modules = Some(vec!["db".to_string()]);
    let modules = vec![fixture.module("db", &[]), fixture.module("webhooks", &[])];
    let kernel = fixture.kernel(&modules);

    let report = kernel.bootstrap().await.unwrap();
    assert_eq!(report.started, vec!["db"]);
    let webhooks = kernel.registry().get_by_name("webhooks").unwrap();
    assert!(!webhooks.descriptor.enabled);
    assert!(webhooks.discovered_at.is_some());
    assert!(!kernel.manager().is_registered("webhooks"));
}

#[tokio::test]
async fn test_context_merges_module_config_and_overrides() {
    let mut fixture = KernelFixture::new();
    fixture
        .config
        .modules
        .module_configs
        .entry("tasks".to_string())
        .or_default()
        .insert("workers".to_string(), "8".to_string());
    let tasks = fixture.module("tasks", &[]);
    std::fs::write(
        fixture.modules_dir.join("tasks").join("config.toml"),
        "workers = 2\n\n[queue]\nname = \"default\"\n",
    )
    .unwrap();
    let kernel = fixture.kernel(&[tasks.clone()]);
    kernel.bootstrap().await.unwrap();

    let context = tasks.received_context().unwrap();
    assert_eq!(context.module_name, "tasks");
    assert_eq!(context.data_dir, fixture.config.modules.data_dir.join("tasks"));
    assert_eq!(context.get_config("workers").map(String::as_str), Some("8"));
    assert_eq!(context.get_config_or("queue.name", "none"), "default");
}

#[tokio::test]
async fn test_register_module_with_live_instance() {
    let fixture = KernelFixture::new();
    let kernel = fixture.kernel(&[]);
    let metrics = StubModule::new("metrics", &fixture.log);
    let descriptor = module_kernel::ModuleDescriptor::new(
        "metrics",
        "0.3.0",
        ModuleType::Service,
        "builtin/metrics",
    );
    kernel
        .register_module(descriptor, Arc::clone(&metrics) as Arc<dyn module_kernel::Module>)
        .unwrap();

    let report = kernel.bootstrap().await.unwrap();
    assert_eq!(report.started, vec!["metrics"]);
    assert_eq!(StubModule::count(&metrics.inits), 1);

    let invalid = module_kernel::ModuleDescriptor::new("x", "1", ModuleType::Plugin, "");
    assert!(matches!(
        kernel.register_module(invalid, metrics).unwrap_err(),
        KernelError::Discovery { .. }
    ));
}

#[tokio::test]
async fn test_restart_and_health() {
    let fixture = KernelFixture::new();
    let db = fixture.module("db", &[]);
    let kernel = fixture.kernel(&[db.clone()]);
    kernel.bootstrap().await.unwrap();

    kernel.restart_module("db").await.unwrap();
    assert_eq!(StubModule::count(&db.starts), 2);
    assert_eq!(StubModule::count(&db.stops), 1);

    StubModule::set(&db.unhealthy);
    let health = kernel.check_all().await;
    assert!(!health.overall_healthy);
    let report = kernel.health_check("db").await.unwrap();
    assert!(!report.healthy);
    assert_eq!(kernel.manager().status("db"), Some(ModuleStatus::Running));
}

#[tokio::test]
async fn test_shutdown_stops_in_reverse_start_order() {
    let mut fixture = KernelFixture::new();
    fixture.config.health.enabled = true;
    fixture.config.health.interval_secs = 1;
    let modules = vec![
        fixture.module("db", &[]),
        fixture.module("auth", &["db"]),
        fixture.module("tasks", &["auth"]),
    ];
    let kernel = fixture.kernel(&modules);
    kernel.bootstrap().await.unwrap();
    assert!(!kernel.start_health_monitor());

    kernel.shutdown().await.unwrap();
    assert_eq!(calls_of(&fixture.log, "stop"), vec!["tasks", "auth", "db"]);
    assert!(kernel.manager().running_modules().is_empty());
}

#[tokio::test]
async fn test_event_stream_sees_lifecycle() {
    let fixture = KernelFixture::new();
    let db = fixture.module("db", &[]);
    let kernel = fixture.kernel(&[db]);
    let mut events = kernel.subscribe();

    kernel.bootstrap().await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event.event_type);
    }
    assert_eq!(
        seen,
        vec![
            ModuleEventType::Discovered,
            ModuleEventType::Installed,
            ModuleEventType::Stopped,
            ModuleEventType::Started,
        ]
    );
}

#[cfg(feature = "redb")]
#[tokio::test]
async fn test_registry_survives_restart() {
    let mut fixture = KernelFixture::new();
    fixture.config.storage.backend = module_kernel::config::StorageBackendConfig::Redb;

    {
        let db = fixture.module("db", &[]);
        let kernel = fixture.kernel(&[db]);
        kernel.bootstrap().await.unwrap();
        kernel.disable_module("db").await.unwrap();
        kernel.shutdown().await.unwrap();
    }

    let db = StubModule::new("db", &fixture.log);
    let kernel = fixture.kernel(&[db.clone()]);
    let views = kernel.status().unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].status, ModuleStatus::Stopped);
    assert!(!views[0].enabled);

    let kinds: Vec<ModuleEventType> = kernel
        .events("db")
        .unwrap()
        .into_iter()
        .map(|e| e.event_type)
        .collect();
    assert!(kinds.contains(&ModuleEventType::Started));
    assert!(kinds.contains(&ModuleEventType::ConfigChanged));

    // Disabled rows stay disabled across rescans
    let report = kernel.bootstrap().await.unwrap();
    assert!(report.started.is_empty());
    assert_eq!(StubModule::count(&db.inits), 0);
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut fixture = KernelFixture::new();
    fixture.config.bootstrap.hook_timeout_secs = 0;
    let result = ModuleKernel::new(fixture.config.clone(), Arc::new(loader_for(&[])));
    assert!(matches!(result, Err(KernelError::Config(_))));
}
