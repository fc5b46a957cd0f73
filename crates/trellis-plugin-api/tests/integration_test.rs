//! Integration tests for trellis-plugin-api.
//!
//! These tests cover:
//! - A plugin wiring itself into hooks, events and services via its context
//! - Capability-scoped host services and their denial stand-ins
//! - Cross-plugin service import gated on the exporter's status

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use trellis_plugin_api::{
    Event, HookContext, HostServices, LocalFileSystem, MemoryCache, MetricsRecorder, Plugin,
    PluginContext, PluginStatus, PluginStatusSource, Registries, ServiceRegistry,
};
use trellis_runtime::{Capability, CapabilitySet, HookKind, RuntimeError};

// ==============================================================================
// Test Fixtures
// ==============================================================================

/// A counter service other plugins can import.
struct Counter(Mutex<u64>);

impl Counter {
    fn bump(&self) -> u64 {
        let mut n = self.0.lock();
        *n += 1;
        *n
    }
}

/// A plugin that exports a counter and bumps it on every `tick` event.
#[derive(Default)]
struct TickPlugin {
    context: Option<Arc<PluginContext>>,
    counter: Option<Arc<Counter>>,
}

#[async_trait]
impl Plugin for TickPlugin {
    fn name(&self) -> &str {
        "ticker"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn initialize(&mut self, context: Arc<PluginContext>) -> anyhow::Result<()> {
        let counter = Arc::new(Counter(Mutex::new(0)));
        context.export_service("counter", counter.clone())?;

        let on_tick = Arc::clone(&counter);
        context.subscribe_event(
            "tick",
            Arc::new(move |_: &Event| {
                on_tick.bump();
                Ok(())
            }),
        );

        context.register_hook(
            HookKind::PreRequest,
            5,
            Arc::new(|ctx: &mut HookContext| {
                ctx.set("ticker", json!("was here"));
                Ok(())
            }),
        );

        self.counter = Some(counter);
        self.context = Some(context);
        Ok(())
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        if let Some(ctx) = &self.context {
            ctx.metrics().increment("starts");
        }
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct StatusTable(RwLock<HashMap<String, PluginStatus>>);

impl PluginStatusSource for StatusTable {
    fn plugin_status(&self, plugin: &str) -> Option<PluginStatus> {
        self.0.read().get(plugin).copied()
    }
}

fn registries_with_status(host: HostServices, status: Arc<StatusTable>) -> Registries {
    let mut registries = Registries::new(host);
    registries.services = Arc::new(ServiceRegistry::with_status_source(status));
    registries
}

fn context_for(registries: &Registries, plugin: &str, caps: &[&str]) -> Arc<PluginContext> {
    registries
        .permissions
        .set_permissions(plugin, &CapabilitySet::from_strings(caps));
    Arc::new(PluginContext::new(
        plugin,
        registries.clone(),
        HashMap::new(),
        Arc::new(MetricsRecorder::new()),
    ))
}

// ==============================================================================
// Lifecycle wiring
// ==============================================================================

#[tokio::test]
async fn test_plugin_wires_hooks_events_and_services() {
    let status = Arc::new(StatusTable::default());
    let registries = registries_with_status(HostServices::new(), status.clone());

    let mut ticker = TickPlugin::default();
    status
        .0
        .write()
        .insert("ticker".to_string(), PluginStatus::Loading);
    ticker
        .initialize(context_for(&registries, "ticker", &[]))
        .await
        .unwrap();
    status
        .0
        .write()
        .insert("ticker".to_string(), PluginStatus::Initialized);

    let consumer = context_for(&registries, "consumer", &[]);

    // Exported but not yet running.
    assert!(matches!(
        consumer.import_service_as::<Counter>("ticker", "counter"),
        Err(RuntimeError::PluginNotRunning(_))
    ));

    ticker.start().await.unwrap();
    status
        .0
        .write()
        .insert("ticker".to_string(), PluginStatus::Running);

    let counter = consumer
        .import_service_as::<Counter>("ticker", "counter")
        .unwrap();

    let report = consumer.publish_event("tick", json!({}));
    assert_eq!(report.delivered, 1);
    assert_eq!(counter.bump(), 2);

    let mut hook_ctx = HookContext::new(HookKind::PreRequest);
    registries
        .hooks
        .execute_hooks(HookKind::PreRequest, &mut hook_ctx)
        .unwrap();
    assert_eq!(hook_ctx.get("ticker"), Some(&json!("was here")));

    // Teardown as the host would do it.
    let (removed, _) = registries.services.unregister_all_with("ticker", || {
        status
            .0
            .write()
            .insert("ticker".to_string(), PluginStatus::Stopped)
    });
    assert_eq!(removed, 1);
    assert_eq!(registries.hooks.unregister_all("ticker"), 1);
    assert_eq!(registries.events.unsubscribe_all("ticker"), 1);

    assert!(consumer.import_service("ticker", "counter").is_err());
    assert_eq!(consumer.publish_event("tick", json!({})).delivered, 0);
}

// ==============================================================================
// Capability-scoped services
// ==============================================================================

#[tokio::test]
async fn test_database_denied_without_touching_a_connection() {
    let registries = Registries::new(HostServices::new());
    registries.permissions.set_permissions(
        "p",
        &CapabilitySet::from_iter([Capability::Cache]),
    );
    let ctx = Arc::new(PluginContext::new(
        "p",
        registries.clone(),
        HashMap::new(),
        Arc::new(MetricsRecorder::new()),
    ));

    assert!(registries
        .permissions
        .check_permission("p", &Capability::Database)
        .is_err());

    let err = ctx
        .database()
        .query("SELECT * FROM users", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::PermissionDenied { .. }));
}

#[tokio::test]
async fn test_filesystem_grant_and_revoke() {
    let temp_dir = TempDir::new().unwrap();
    let host = HostServices::new()
        .with_filesystem(Arc::new(LocalFileSystem::new(temp_dir.path())))
        .with_cache(Arc::new(MemoryCache::new()));
    let registries = Registries::new(host);
    let ctx = context_for(&registries, "writer", &["filesystem"]);

    ctx.filesystem().write("out/log.txt", b"line").await.unwrap();
    assert_eq!(ctx.filesystem().read("out/log.txt").await.unwrap(), b"line");
    assert!(temp_dir.path().join("out/log.txt").exists());

    registries
        .permissions
        .revoke_permission("writer", &Capability::Filesystem);
    assert!(!ctx.filesystem().exists("out/log.txt").await);
    assert!(ctx.filesystem().list("out").await.is_err());
    assert!(ctx.filesystem().read("out/log.txt").await.is_err());

    // Cache was never granted.
    assert_eq!(ctx.cache().get("anything").await, None);
    assert!(ctx.cache().set("k", json!(1), None).await.is_err());
}
