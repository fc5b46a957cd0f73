//! Plugin manager: registration, ordering and lifecycle.

use super::table::{PluginEntry, PluginTable, SharedPlugin};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};
use trellis_plugin_api::{
    Event, ExternalPlugin, HookContext, HookErrorPolicy, HookSystem, HostServices, Plugin,
    PluginContext, PluginDescriptor, PluginMetrics, PluginStatus, PublishReport, Registries,
    ServiceRegistry,
};
use trellis_runtime::{
    Capability, CapabilitySet, Dependency, DependencyGraph, HookKind, PluginManifest, PluginPath,
    ProcessLoader, RuntimeError, RuntimeResult, Version, VersionConstraint,
};

/// Name used for the host in framework version mismatches.
const HOST_NAME: &str = "trellis";

/// Outcome of [`PluginManager::start_all`].
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Plugins that reached Running, in load order.
    pub started: Vec<String>,
    /// Plugins that failed, with the reason.
    pub failed: Vec<(String, RuntimeError)>,
}

impl LoadReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of [`PluginManager::stop_all`] and [`PluginManager::unload_all`].
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Plugins handled successfully, in shutdown order.
    pub completed: Vec<String>,
    pub failed: Vec<(String, RuntimeError)>,
}

impl ShutdownReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Information about a registered plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub status: PluginStatus,
    pub dependencies: Vec<Dependency>,
    pub capabilities: Vec<String>,
    pub services: Vec<String>,
    pub config: HashMap<String, Value>,
    pub loaded_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub error_at: Option<DateTime<Utc>>,
    pub metrics: PluginMetrics,
    pub is_process: bool,
}

/// Manager for Trellis plugins.
///
/// The plugin manager owns the plugin table and the dependency graph, drives
/// each plugin through its status state machine, and tears down everything a
/// plugin registered when it is unloaded.
///
/// Status moves strictly forward: Loading, Initialized, Running, Stopped. Any
/// failed lifecycle call moves the plugin to Error, which only re-registration
/// leaves.
pub struct PluginManager {
    registries: Registries,
    table: Arc<PluginTable>,
    graph: Mutex<DependencyGraph>,
    host_version: Option<String>,
}

impl PluginManager {
    /// Create a new plugin manager around the given host services.
    pub fn new(host: HostServices) -> Self {
        Self::with_hook_policy(host, HookErrorPolicy::default())
    }

    /// Create a manager whose hook passes follow `policy`.
    pub fn with_hook_policy(host: HostServices, policy: HookErrorPolicy) -> Self {
        let table = Arc::new(PluginTable::default());
        let mut registries = Registries::new(host);
        registries.hooks = Arc::new(HookSystem::with_policy(policy));
        registries.services = Arc::new(ServiceRegistry::with_status_source(table.clone()));

        Self {
            registries,
            table,
            graph: Mutex::new(DependencyGraph::new()),
            host_version: None,
        }
    }

    /// Check manifests' framework requirement against `version`.
    pub fn with_host_version(mut self, version: impl Into<String>) -> Self {
        self.host_version = Some(version.into());
        self
    }

    /// The registries shared with every plugin context.
    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    pub fn plugin_count(&self) -> usize {
        self.table.len()
    }

    // ----- registration -----

    /// Register a plugin with an explicit capability set.
    pub fn register(&self, plugin: Box<dyn Plugin>, capabilities: CapabilitySet) -> RuntimeResult<()> {
        let descriptor = PluginDescriptor::of(plugin.as_ref());
        let schema = plugin.config_schema();
        self.insert(PluginEntry::new(descriptor, plugin, schema, None), &capabilities)
    }

    /// Register a plugin described by a manifest.
    ///
    /// The manifest supplies dependencies, capabilities and, when the plugin
    /// declares none itself, the configuration schema.
    pub fn register_with_manifest(
        &self,
        plugin: Box<dyn Plugin>,
        manifest: PluginManifest,
    ) -> RuntimeResult<()> {
        manifest.validate()?;

        if plugin.name() != manifest.name || plugin.version() != manifest.version {
            return Err(RuntimeError::InvalidManifest(format!(
                "manifest describes {} v{} but the plugin reports {} v{}",
                manifest.name,
                manifest.version,
                plugin.name(),
                plugin.version()
            )));
        }

        if let Some(host) = &self.host_version {
            if !manifest.is_compatible_with(host) {
                return Err(RuntimeError::VersionMismatch {
                    plugin: manifest.name.clone(),
                    dependency: HOST_NAME.to_string(),
                    constraint: manifest
                        .framework
                        .as_ref()
                        .map(|f| f.version.clone())
                        .unwrap_or_default(),
                    found: host.clone(),
                });
            }
        }

        let schema = match plugin.config_schema() {
            schema if schema.is_empty() => manifest.config_schema()?,
            schema => schema,
        };
        let descriptor = PluginDescriptor::from_manifest(&manifest);
        let capabilities = manifest.capability_set();
        self.insert(
            PluginEntry::new(descriptor, plugin, schema, Some(manifest)),
            &capabilities,
        )
    }

    /// Register a discovered process plugin.
    ///
    /// The entry point is resolved against `base_dir`, or the plugin's own
    /// directory when none is given. `settings` are validated against the
    /// manifest's schema and handed to the process.
    pub fn register_discovered(
        &self,
        found: &PluginPath,
        base_dir: Option<&Path>,
        settings: HashMap<String, Value>,
    ) -> RuntimeResult<()> {
        let manifest = &found.manifest;
        let entry_point = manifest.entry_point.as_deref().ok_or_else(|| {
            RuntimeError::InvalidManifest(format!("Plugin '{}' has no entry_point", manifest.name))
        })?;

        let config = manifest.config_schema()?.validate(&settings)?;
        let loader = ProcessLoader::new(base_dir.unwrap_or(found.path.as_path()));
        let process = loader
            .load(entry_point, config.clone())?
            .with_name(&manifest.name);

        let plugin = ExternalPlugin::new(manifest.clone(), process)?;
        self.register_with_manifest(Box::new(plugin), manifest.clone())?;
        self.table.update(&manifest.name, |entry| entry.config = config);
        Ok(())
    }

    fn insert(&self, entry: PluginEntry, capabilities: &CapabilitySet) -> RuntimeResult<()> {
        let name = entry.descriptor.name.clone();
        let version = entry.descriptor.version.clone();
        if name.is_empty() {
            return Err(RuntimeError::InvalidManifest(
                "Plugin name cannot be empty".to_string(),
            ));
        }
        Version::parse(&version)?;
        for dep in &entry.descriptor.dependencies {
            VersionConstraint::parse(&dep.constraint)?;
        }

        let mut graph = self.graph.lock();
        match self.table.status(&name) {
            None => {}
            Some(PluginStatus::Error) => {
                debug!(plugin = %name, "Replacing failed plugin");
                self.purge(&name);
            }
            Some(_) => return Err(RuntimeError::DuplicatePlugin(name)),
        }

        self.registries
            .permissions
            .set_permissions(&name, capabilities);
        graph.add_node(&name, &version, entry.descriptor.dependencies.clone());
        self.table.insert(entry);

        info!(plugin = %name, version = %version, "Registered plugin");
        Ok(())
    }

    // ----- ordering -----

    /// Validate every dependency and return the load order.
    pub fn resolve(&self) -> RuntimeResult<Vec<String>> {
        self.graph.lock().resolve_dependencies()
    }

    /// Load order without validating versions. Fails only on cycles.
    pub fn load_order(&self) -> RuntimeResult<Vec<String>> {
        self.graph.lock().topological_sort()
    }

    /// Reverse load order. Falls back to reverse registration order when the
    /// graph has a cycle.
    fn shutdown_order(&self) -> Vec<String> {
        let graph = self.graph.lock();
        let mut order = graph
            .topological_sort()
            .unwrap_or_else(|_| graph.names().into_iter().map(String::from).collect());
        order.reverse();
        order
    }

    // ----- lifecycle -----

    /// Build the plugin's context and call `initialize`.
    pub async fn initialize_plugin(&self, name: &str) -> RuntimeResult<()> {
        let mut plugin = self
            .claim(name, PluginStatus::Initialized, "initialize")
            .await?;
        let (schema, config, metrics) = self
            .table
            .read(name, |e| {
                (
                    e.schema.clone(),
                    e.config.clone(),
                    Arc::clone(&e.metrics),
                )
            })
            .ok_or_else(|| RuntimeError::PluginNotFound(name.to_string()))?;

        let config = match schema.validate(&config) {
            Ok(config) => config,
            Err(err) => {
                self.record_failure(name, &err.to_string());
                return Err(err);
            }
        };

        let context = Arc::new(PluginContext::new(
            name,
            self.registries.clone(),
            config.clone(),
            metrics,
        ));

        let result = plugin.initialize(Arc::clone(&context)).await;
        match result {
            Ok(()) => {
                self.table.update(name, |entry| {
                    entry.status = PluginStatus::Initialized;
                    entry.config = config;
                    entry.context = Some(context);
                });
                info!(plugin = %name, "Plugin initialized");
                Ok(())
            }
            Err(err) => Err(self.lifecycle_failure(name, "initialize", err)),
        }
    }

    /// Start an initialized plugin once its required dependencies run.
    pub async fn start_plugin(&self, name: &str) -> RuntimeResult<()> {
        let mut plugin = self.claim(name, PluginStatus::Running, "start").await?;
        if let Some(dependency) = self.unmet_dependency(name, PluginStatus::is_running) {
            return Err(RuntimeError::MissingDependency {
                plugin: name.to_string(),
                dependency,
            });
        }

        let result = plugin.start().await;
        match result {
            Ok(()) => {
                self.table
                    .update(name, |entry| entry.status = PluginStatus::Running);
                info!(plugin = %name, "Plugin started");
                Ok(())
            }
            Err(err) => Err(self.lifecycle_failure(name, "start", err)),
        }
    }

    /// Initialize then start every registered plugin in load order.
    ///
    /// A cycle aborts the whole call. Any other failure is confined to the
    /// plugin it concerns and to the plugins that require it.
    pub async fn start_all(&self) -> RuntimeResult<LoadReport> {
        let order = self.load_order()?;
        let mut report = LoadReport::default();
        info!("Starting {} plugin(s)", order.len());

        for name in &order {
            if self.table.status(name) != Some(PluginStatus::Loading) {
                continue;
            }

            let validation = self.graph.lock().validate_node(name);
            let blocked = validation.err().or_else(|| {
                self.unmet_dependency(name, |status| status != PluginStatus::Error)
                    .map(|dependency| RuntimeError::MissingDependency {
                        plugin: name.clone(),
                        dependency,
                    })
            });
            if let Some(err) = blocked {
                warn!(plugin = %name, error = %err, "Plugin cannot be loaded");
                self.record_failure(name, &err.to_string());
                report.failed.push((name.clone(), err));
                continue;
            }

            if let Err(err) = self.initialize_plugin(name).await {
                report.failed.push((name.clone(), err));
            }
        }

        for name in &order {
            if self.table.status(name) != Some(PluginStatus::Initialized) {
                continue;
            }

            if let Some(dependency) = self.unmet_dependency(name, PluginStatus::is_running) {
                let err = RuntimeError::MissingDependency {
                    plugin: name.clone(),
                    dependency,
                };
                warn!(plugin = %name, error = %err, "Plugin cannot be started");
                self.record_failure(name, &err.to_string());
                report.failed.push((name.clone(), err));
                continue;
            }

            match self.start_plugin(name).await {
                Ok(()) => report.started.push(name.clone()),
                Err(err) => report.failed.push((name.clone(), err)),
            }
        }

        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "Plugin startup complete"
        );
        Ok(report)
    }

    /// Stop a running plugin.
    ///
    /// The status flip and the removal of its exported services happen in one
    /// critical section, so no import can reach a stopping plugin.
    pub async fn stop_plugin(&self, name: &str) -> RuntimeResult<()> {
        let mut plugin = self.claim(name, PluginStatus::Stopped, "stop").await?;

        let (removed, _) = self.registries.services.unregister_all_with(name, || {
            self.table
                .update(name, |entry| entry.status = PluginStatus::Stopped)
        });
        self.purge_callbacks(name);
        debug!(plugin = %name, services = removed, "Withdrew plugin registrations");

        let result = plugin.stop().await;
        match result {
            Ok(()) => {
                info!(plugin = %name, "Plugin stopped");
                Ok(())
            }
            Err(err) => Err(self.lifecycle_failure(name, "stop", err)),
        }
    }

    /// Stop every running plugin in reverse load order.
    pub async fn stop_all(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        for name in self.shutdown_order() {
            if !self.table.status(&name).is_some_and(PluginStatus::is_running) {
                continue;
            }
            match self.stop_plugin(&name).await {
                Ok(()) => report.completed.push(name),
                Err(err) => report.failed.push((name, err)),
            }
        }
        report
    }

    /// Remove a plugin entirely.
    ///
    /// Refused while a running plugin requires it. Otherwise the plugin is
    /// stopped if needed, cleaned up, and every hook, subscription, service,
    /// middleware and permission it owns is dropped along with its entry.
    pub async fn unload_plugin(&self, name: &str) -> RuntimeResult<()> {
        let status = self
            .table
            .status(name)
            .ok_or_else(|| RuntimeError::PluginNotFound(name.to_string()))?;

        let dependents = self.active_dependents(name);
        if !dependents.is_empty() {
            return Err(RuntimeError::DependentsActive {
                plugin: name.to_string(),
                dependents,
            });
        }

        if status.is_running() {
            if let Err(err) = self.stop_plugin(name).await {
                warn!(plugin = %name, error = %err, "Stop failed during unload");
            }
        }

        let (instance, initialized) = self
            .table
            .read(name, |e| (Arc::clone(&e.instance), e.context.is_some()))
            .ok_or_else(|| RuntimeError::PluginNotFound(name.to_string()))?;
        let cleanup = if initialized {
            instance.lock().await.cleanup().await
        } else {
            Ok(())
        };

        self.purge(name);
        self.registries.permissions.remove_plugin(name);
        self.table.remove(name);
        self.graph.lock().remove_node(name);
        info!(plugin = %name, "Plugin unloaded");

        cleanup.map_err(|err| {
            let message = format!("{err:#}");
            warn!(plugin = %name, error = %message, "Plugin cleanup failed");
            RuntimeError::LifecycleFailed {
                plugin: name.to_string(),
                phase: "cleanup".to_string(),
                message,
            }
        })
    }

    /// Unload every plugin in reverse load order.
    pub async fn unload_all(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        for name in self.shutdown_order() {
            match self.unload_plugin(&name).await {
                Ok(()) => report.completed.push(name),
                Err(err) => report.failed.push((name, err)),
            }
        }
        report
    }

    // ----- configuration and permissions -----

    /// Validate and apply new configuration.
    ///
    /// Defaults fill missing fields. An initialized plugin is told through
    /// `on_config_change`; if it rejects the change the previous
    /// configuration is restored.
    pub async fn update_config(
        &self,
        name: &str,
        values: HashMap<String, Value>,
    ) -> RuntimeResult<HashMap<String, Value>> {
        let (schema, previous, context, instance, status) = self
            .table
            .read(name, |e| {
                (
                    e.schema.clone(),
                    e.config.clone(),
                    e.context.clone(),
                    Arc::clone(&e.instance),
                    e.status,
                )
            })
            .ok_or_else(|| RuntimeError::PluginNotFound(name.to_string()))?;

        if status == PluginStatus::Error {
            return Err(RuntimeError::InvalidState {
                plugin: name.to_string(),
                action: "reconfigure".to_string(),
                status: status.to_string(),
            });
        }

        let resolved = schema.validate(&values)?;
        self.table
            .update(name, |entry| entry.config = resolved.clone());

        let Some(context) = context else {
            debug!(plugin = %name, "Stored configuration for uninitialized plugin");
            return Ok(resolved);
        };

        context.replace_config(resolved.clone());
        let result = instance.lock().await.on_config_change(&resolved).await;
        if let Err(err) = result {
            let message = format!("{err:#}");
            warn!(plugin = %name, error = %message, "Configuration change rejected");
            context.replace_config(previous.clone());
            self.table.update(name, |entry| entry.config = previous);
            return Err(RuntimeError::LifecycleFailed {
                plugin: name.to_string(),
                phase: "reconfigure".to_string(),
                message,
            });
        }

        info!(plugin = %name, "Plugin configuration updated");
        Ok(resolved)
    }

    /// Replace a registered plugin's capabilities.
    pub fn set_permissions(&self, name: &str, capabilities: &CapabilitySet) -> RuntimeResult<()> {
        self.require(name)?;
        self.registries
            .permissions
            .set_permissions(name, capabilities);
        Ok(())
    }

    pub fn grant_permission(&self, name: &str, capability: &Capability) -> RuntimeResult<()> {
        self.require(name)?;
        self.registries
            .permissions
            .grant_permission(name, capability);
        Ok(())
    }

    pub fn revoke_permission(&self, name: &str, capability: &Capability) -> RuntimeResult<()> {
        self.require(name)?;
        self.registries
            .permissions
            .revoke_permission(name, capability);
        Ok(())
    }

    // ----- host-side channels -----

    /// Run the handlers registered for `kind`.
    pub fn execute_hooks(&self, kind: HookKind, context: &mut HookContext) -> RuntimeResult<()> {
        self.registries.hooks.execute_hooks(kind, context)
    }

    /// Publish an event on behalf of the host.
    pub fn publish_event(&self, name: &str, payload: Value) -> PublishReport {
        self.registries.events.publish(&Event::new(name, payload))
    }

    // ----- queries -----

    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.table.status(name)
    }

    pub fn plugin_info(&self, name: &str) -> Option<PluginInfo> {
        let mut info = self.table.read(name, |e| PluginInfo {
            name: e.descriptor.name.clone(),
            version: e.descriptor.version.clone(),
            description: e.descriptor.description.clone(),
            author: e.descriptor.author.clone(),
            status: e.status,
            dependencies: e.descriptor.dependencies.clone(),
            capabilities: Vec::new(),
            services: Vec::new(),
            config: e.config.clone(),
            loaded_at: e.loaded_at,
            last_error: e.last_error.clone(),
            error_at: e.error_at,
            metrics: e.metrics.snapshot(),
            is_process: e.manifest.as_ref().is_some_and(|m| m.is_process_plugin()),
        })?;

        // Read outside the table lock; imports take services then table.
        info.capabilities = self
            .registries
            .permissions
            .get_permissions(name)
            .map(|set| set.iter().map(|c| c.to_string()).collect())
            .unwrap_or_default();
        info.services = self.registries.services.list_services(name);
        Some(info)
    }

    /// Every registered plugin, in registration order.
    pub fn list_plugins(&self) -> Vec<PluginInfo> {
        let names: Vec<String> = self
            .graph
            .lock()
            .names()
            .into_iter()
            .map(String::from)
            .collect();
        names.iter().filter_map(|n| self.plugin_info(n)).collect()
    }

    // ----- internals -----

    fn require(&self, name: &str) -> RuntimeResult<()> {
        if self.table.contains(name) {
            Ok(())
        } else {
            Err(RuntimeError::PluginNotFound(name.to_string()))
        }
    }

    fn instance(&self, name: &str) -> RuntimeResult<SharedPlugin> {
        self.table
            .read(name, |e| Arc::clone(&e.instance))
            .ok_or_else(|| RuntimeError::PluginNotFound(name.to_string()))
    }

    /// Lock the plugin instance, then check the transition under that lock.
    ///
    /// Lifecycle calls on one plugin are serialized by the instance mutex, so
    /// a caller that waited behind another sees the status it left behind.
    /// The entry must still hold the same instance once the lock is taken.
    async fn claim(
        &self,
        name: &str,
        next: PluginStatus,
        action: &str,
    ) -> RuntimeResult<OwnedMutexGuard<Box<dyn Plugin>>> {
        let instance = self.instance(name)?;
        let guard = Arc::clone(&instance).lock_owned().await;

        let current = self.table.read(name, |e| Arc::ptr_eq(&e.instance, &instance));
        if current != Some(true) {
            return Err(RuntimeError::PluginNotFound(name.to_string()));
        }
        self.expect_transition(name, next, action)?;
        Ok(guard)
    }

    fn expect_transition(&self, name: &str, next: PluginStatus, action: &str) -> RuntimeResult<()> {
        let status = self
            .table
            .status(name)
            .ok_or_else(|| RuntimeError::PluginNotFound(name.to_string()))?;
        if status.can_transition_to(next) {
            Ok(())
        } else {
            Err(RuntimeError::InvalidState {
                plugin: name.to_string(),
                action: action.to_string(),
                status: status.to_string(),
            })
        }
    }

    /// First required dependency whose status fails `ready`.
    fn unmet_dependency(&self, name: &str, ready: impl Fn(PluginStatus) -> bool) -> Option<String> {
        let dependencies = self
            .table
            .read(name, |e| e.descriptor.dependencies.clone())
            .unwrap_or_default();
        dependencies
            .into_iter()
            .filter(|d| !d.optional)
            .find(|d| !self.table.status(&d.name).is_some_and(&ready))
            .map(|d| d.name)
    }

    /// Running plugins with a required dependency on `name`.
    fn active_dependents(&self, name: &str) -> Vec<String> {
        let graph = self.graph.lock();
        graph
            .dependents(name)
            .into_iter()
            .filter(|node| {
                node.dependencies
                    .iter()
                    .any(|d| d.name == name && !d.optional)
            })
            .filter(|node| {
                self.table
                    .status(&node.name)
                    .is_some_and(PluginStatus::is_running)
            })
            .map(|node| node.name.clone())
            .collect()
    }

    fn lifecycle_failure(&self, name: &str, phase: &str, err: anyhow::Error) -> RuntimeError {
        let message = format!("{err:#}");
        error!(plugin = %name, phase, error = %message, "Plugin lifecycle call failed");
        self.record_failure(name, &message);
        RuntimeError::LifecycleFailed {
            plugin: name.to_string(),
            phase: phase.to_string(),
            message,
        }
    }

    /// Move a plugin to Error and withdraw everything it registered.
    fn record_failure(&self, name: &str, message: &str) {
        self.registries
            .services
            .unregister_all_with(name, || self.table.mark_error(name, message));
        self.purge_callbacks(name);
    }

    fn purge(&self, name: &str) {
        self.registries.services.unregister_all(name);
        self.purge_callbacks(name);
    }

    fn purge_callbacks(&self, name: &str) {
        let hooks = self.registries.hooks.unregister_all(name);
        let subscriptions = self.registries.events.unsubscribe_all(name);
        let middleware = self.registries.middleware.unregister_all(name);
        debug!(plugin = %name, hooks, subscriptions, middleware, "Purged plugin callbacks");
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new(HostServices::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Plugin for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn version(&self) -> &str {
            "1.0.0"
        }

        async fn initialize(&mut self, _context: Arc<PluginContext>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn start(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_new_plugin_manager() {
        let manager = PluginManager::default();
        assert_eq!(manager.plugin_count(), 0);
        assert!(manager.list_plugins().is_empty());
        assert_eq!(manager.registries().hooks.policy(), HookErrorPolicy::Abort);
    }

    #[test]
    fn test_duplicate_registration_is_refused() {
        let manager = PluginManager::default();
        manager
            .register(Box::new(Named("a")), CapabilitySet::new())
            .unwrap();
        assert!(matches!(
            manager.register(Box::new(Named("a")), CapabilitySet::new()),
            Err(RuntimeError::DuplicatePlugin(_))
        ));
        assert_eq!(manager.status("a"), Some(PluginStatus::Loading));
    }

    #[test]
    fn test_empty_name_is_refused() {
        let manager = PluginManager::default();
        assert!(manager
            .register(Box::new(Named("")), CapabilitySet::new())
            .is_err());
        assert_eq!(manager.plugin_count(), 0);
    }

    #[tokio::test]
    async fn test_lifecycle_calls_out_of_order() {
        let manager = PluginManager::default();
        manager
            .register(Box::new(Named("a")), CapabilitySet::new())
            .unwrap();

        assert!(matches!(
            manager.start_plugin("a").await,
            Err(RuntimeError::InvalidState { .. })
        ));
        assert!(matches!(
            manager.stop_plugin("a").await,
            Err(RuntimeError::InvalidState { .. })
        ));
        assert!(matches!(
            manager.initialize_plugin("ghost").await,
            Err(RuntimeError::PluginNotFound(_))
        ));
    }

    #[test]
    fn test_permissions_require_registration() {
        let manager = PluginManager::default();
        assert!(manager
            .grant_permission("ghost", &Capability::Cache)
            .is_err());
        assert!(!manager.registries().permissions.is_registered("ghost"));
    }
}
