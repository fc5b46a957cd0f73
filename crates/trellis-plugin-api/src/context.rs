//! The per-plugin view of the host.

use crate::events::{Event, EventBus, EventHandler, PublishReport, SubscriptionId};
use crate::hooks::{HookHandler, HookSystem};
use crate::host::{
    Cache, ConfigStore, Database, Denied, FileSystem, HostServices, LogLevel, Network, Router,
};
use crate::metrics::MetricsRecorder;
use crate::middleware::{MiddlewareHandler, MiddlewareRegistry};
use crate::services::{ServiceHandle, ServiceRegistry};
use crate::storage::PluginStorage;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use trellis_runtime::{Capability, HookKind, PermissionChecker, RuntimeResult};

/// The shared registries every context points into.
#[derive(Clone)]
pub struct Registries {
    pub permissions: Arc<PermissionChecker>,
    pub hooks: Arc<HookSystem>,
    pub events: Arc<EventBus>,
    pub services: Arc<ServiceRegistry>,
    pub middleware: Arc<MiddlewareRegistry>,
    pub host: HostServices,
}

impl Registries {
    /// Fresh, empty registries around `host`.
    pub fn new(host: HostServices) -> Self {
        Self {
            permissions: Arc::new(PermissionChecker::new()),
            hooks: Arc::new(HookSystem::new()),
            events: Arc::new(EventBus::new()),
            services: Arc::new(ServiceRegistry::new()),
            middleware: Arc::new(MiddlewareRegistry::new()),
            host,
        }
    }
}

/// Everything a plugin can reach, scoped to that plugin.
///
/// Sensitive services are only handed out after a permission check. A plugin
/// without the capability gets a [`Denied`] stand-in instead.
pub struct PluginContext {
    plugin: String,
    registries: Registries,
    config: RwLock<HashMap<String, Value>>,
    storage: PluginStorage,
    metrics: Arc<MetricsRecorder>,
}

impl PluginContext {
    pub fn new(
        plugin: impl Into<String>,
        registries: Registries,
        config: HashMap<String, Value>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            plugin: plugin.into(),
            registries,
            config: RwLock::new(config),
            storage: PluginStorage::new(),
            metrics,
        }
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin
    }

    // ----- configuration -----

    /// The plugin's validated configuration.
    pub fn config(&self) -> HashMap<String, Value> {
        self.config.read().clone()
    }

    pub fn config_value(&self, key: &str) -> Option<Value> {
        self.config.read().get(key).cloned()
    }

    /// Replace the configuration. Called by the host after validation.
    pub fn replace_config(&self, config: HashMap<String, Value>) {
        *self.config.write() = config;
    }

    // ----- capability-scoped services -----

    /// Check a capability, logging an audit entry on denial.
    pub fn check_permission(&self, capability: &Capability) -> RuntimeResult<()> {
        self.registries
            .permissions
            .check_permission(&self.plugin, capability)
    }

    pub fn has_permission(&self, capability: &Capability) -> bool {
        self.registries
            .permissions
            .has_permission(&self.plugin, capability)
    }

    fn gate<S: ?Sized>(&self, capability: Capability, service: Option<&Arc<S>>) -> Result<Arc<S>, Denied> {
        if self.check_permission(&capability).is_err() {
            return Err(Denied::permission_denied(&self.plugin, capability));
        }
        service
            .cloned()
            .ok_or_else(|| Denied::unavailable(&self.plugin, capability))
    }

    pub fn database(&self) -> Arc<dyn Database> {
        match self.gate(Capability::Database, self.registries.host.database.as_ref()) {
            Ok(service) => service,
            Err(denied) => Arc::new(denied),
        }
    }

    pub fn cache(&self) -> Arc<dyn Cache> {
        match self.gate(Capability::Cache, self.registries.host.cache.as_ref()) {
            Ok(service) => service,
            Err(denied) => Arc::new(denied),
        }
    }

    pub fn config_store(&self) -> Arc<dyn ConfigStore> {
        match self.gate(Capability::Config, self.registries.host.config.as_ref()) {
            Ok(service) => service,
            Err(denied) => Arc::new(denied),
        }
    }

    pub fn router(&self) -> Arc<dyn Router> {
        match self.gate(Capability::Router, self.registries.host.router.as_ref()) {
            Ok(service) => service,
            Err(denied) => Arc::new(denied),
        }
    }

    pub fn filesystem(&self) -> Arc<dyn FileSystem> {
        match self.gate(Capability::Filesystem, self.registries.host.filesystem.as_ref()) {
            Ok(service) => service,
            Err(denied) => Arc::new(denied),
        }
    }

    pub fn network(&self) -> Arc<dyn Network> {
        match self.gate(Capability::Network, self.registries.host.network.as_ref()) {
            Ok(service) => service,
            Err(denied) => Arc::new(denied),
        }
    }

    // ----- hooks -----

    pub fn register_hook(&self, kind: HookKind, priority: i32, handler: HookHandler) {
        self.registries
            .hooks
            .register_hook(&self.plugin, kind, priority, handler);
    }

    pub fn unregister_hook(&self, kind: HookKind) -> usize {
        self.registries.hooks.unregister_hook(&self.plugin, kind)
    }

    // ----- events -----

    /// Publish an event with this plugin as its source.
    pub fn publish_event(&self, name: &str, payload: Value) -> PublishReport {
        let event = Event::new(name, payload).with_source(&self.plugin);
        self.registries.events.publish(&event)
    }

    pub fn subscribe_event(&self, name: &str, handler: EventHandler) -> SubscriptionId {
        self.registries.events.subscribe(&self.plugin, name, handler)
    }

    /// Remove one of this plugin's own subscriptions.
    pub fn unsubscribe_event(&self, id: SubscriptionId) -> bool {
        self.registries.events.unsubscribe_owned(&self.plugin, id)
    }

    // ----- services -----

    pub fn export_service(&self, name: &str, handle: ServiceHandle) -> RuntimeResult<()> {
        self.registries.services.export(&self.plugin, name, handle)
    }

    pub fn import_service(&self, plugin: &str, name: &str) -> RuntimeResult<ServiceHandle> {
        self.registries.services.import(plugin, name)
    }

    pub fn import_service_as<T>(&self, plugin: &str, name: &str) -> RuntimeResult<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.registries.services.import_as(plugin, name)
    }

    // ----- middleware -----

    /// Add a middleware step. Requires the router capability.
    pub fn register_middleware(
        &self,
        name: &str,
        priority: i32,
        handler: MiddlewareHandler,
    ) -> RuntimeResult<()> {
        self.check_permission(&Capability::Router)?;
        self.registries
            .middleware
            .register(&self.plugin, name, priority, handler);
        Ok(())
    }

    pub fn unregister_middleware(&self, name: &str) -> bool {
        self.registries.middleware.unregister(&self.plugin, name)
    }

    // ----- storage, metrics, logging -----

    pub fn storage(&self) -> &PluginStorage {
        &self.storage
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    /// Log a message on behalf of the plugin.
    pub fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => tracing::trace!(plugin = %self.plugin, "{}", message),
            LogLevel::Debug => tracing::debug!(plugin = %self.plugin, "{}", message),
            LogLevel::Info => tracing::info!(plugin = %self.plugin, "{}", message),
            LogLevel::Warn => tracing::warn!(plugin = %self.plugin, "{}", message),
            LogLevel::Error => tracing::error!(plugin = %self.plugin, "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{MemoryCache, MemoryConfig};
    use crate::host::DenialKind;
    use serde_json::json;
    use trellis_runtime::{CapabilitySet, RuntimeError};

    fn context(caps: &[&str]) -> (PluginContext, Registries) {
        let host = HostServices::new()
            .with_cache(Arc::new(MemoryCache::new()))
            .with_config(Arc::new(MemoryConfig::new()));
        let registries = Registries::new(host);
        registries
            .permissions
            .set_permissions("p", &CapabilitySet::from_strings(caps));
        let ctx = PluginContext::new(
            "p",
            registries.clone(),
            HashMap::from([("mode".to_string(), json!("fast"))]),
            Arc::new(MetricsRecorder::new()),
        );
        (ctx, registries)
    }

    #[tokio::test]
    async fn test_granted_cache_is_real() {
        let (ctx, _) = context(&["cache"]);
        let cache = ctx.cache();
        cache.set("k", json!(1), None).await.unwrap();
        assert_eq!(cache.get("k").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_database_denied_without_permission() {
        let (ctx, _) = context(&["cache"]);
        let err = ctx.database().query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, RuntimeError::PermissionDenied { .. }));
        assert!(!ctx.database().ping().await);
    }

    #[tokio::test]
    async fn test_granted_but_missing_service_is_unavailable() {
        let (ctx, _) = context(&["database"]);
        let err = ctx.database().execute("DELETE", &[]).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Unavailable { .. }));
    }

    #[test]
    fn test_unregistered_plugin_is_denied() {
        let registries = Registries::new(HostServices::new().with_config(Arc::new(MemoryConfig::new())));
        let ctx = PluginContext::new(
            "stranger",
            registries,
            HashMap::new(),
            Arc::new(MetricsRecorder::new()),
        );
        assert!(ctx.config_store().keys().is_empty());
        assert!(ctx.config_store().set("a", json!(1)).is_err());
        assert!(matches!(
            ctx.check_permission(&Capability::Config),
            Err(RuntimeError::NoPermissions(_))
        ));
    }

    #[test]
    fn test_gate_reports_kind() {
        let (ctx, registries) = context(&[]);
        let denied = ctx
            .gate(Capability::Cache, registries.host.cache.as_ref())
            .err()
            .unwrap();
        assert_eq!(denied.kind(), DenialKind::PermissionDenied);
    }

    #[test]
    fn test_middleware_requires_router() {
        let (ctx, registries) = context(&[]);
        let noop: MiddlewareHandler = Arc::new(|_: &mut crate::host::RequestContext| Ok(()));
        assert!(ctx.register_middleware("m", 0, noop.clone()).is_err());

        registries.permissions.grant_permission("p", &Capability::Router);
        ctx.register_middleware("m", 0, noop).unwrap();
        assert_eq!(registries.middleware.list().len(), 1);
        assert!(ctx.unregister_middleware("m"));
    }

    #[test]
    fn test_config_and_storage() {
        let (ctx, _) = context(&[]);
        assert_eq!(ctx.config_value("mode"), Some(json!("fast")));

        ctx.replace_config(HashMap::new());
        assert!(ctx.config().is_empty());

        ctx.storage().set("counter", json!(3));
        ctx.metrics().increment("calls");
        assert_eq!(ctx.storage().get("counter"), Some(json!(3)));
        assert_eq!(ctx.metrics().counter("calls"), 1);
    }

    #[test]
    fn test_events_carry_source() {
        let (ctx, registries) = context(&[]);
        let seen = Arc::new(RwLock::new(None));
        let sink = Arc::clone(&seen);
        let id = registries.events.subscribe(
            "other",
            "ping",
            Arc::new(move |event: &Event| {
                *sink.write() = event.source.clone();
                Ok(())
            }),
        );

        let report = ctx.publish_event("ping", json!({}));
        assert_eq!(report.delivered, 1);
        assert_eq!(seen.read().as_deref(), Some("p"));

        assert!(!ctx.unsubscribe_event(id));
    }
}
