//! Services exported by one plugin and imported by others.
//!
//! Lock order is services before plugin status: imports consult the
//! [`PluginStatusSource`] while holding the registry read lock, and
//! [`ServiceRegistry::unregister_all_with`] runs its closure under the write
//! lock. A status source must never call back into the registry.

use crate::plugin::PluginStatus;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use trellis_runtime::{RuntimeError, RuntimeResult};

/// An exported service.
pub type ServiceHandle = Arc<dyn Any + Send + Sync>;

/// Reports the lifecycle status of plugins to the registry.
pub trait PluginStatusSource: Send + Sync {
    fn plugin_status(&self, plugin: &str) -> Option<PluginStatus>;
}

/// Registry of exported services keyed by (plugin, service).
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, HashMap<String, ServiceHandle>>>,
    status: Option<Arc<dyn PluginStatusSource>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate imports on the exporter being `Running`.
    pub fn with_status_source(status: Arc<dyn PluginStatusSource>) -> Self {
        Self {
            services: RwLock::default(),
            status: Some(status),
        }
    }

    /// Export a service. An existing (plugin, service) pair is never replaced.
    pub fn export(&self, plugin: &str, service: &str, handle: ServiceHandle) -> RuntimeResult<()> {
        let mut services = self.services.write();
        let exports = services.entry(plugin.to_string()).or_default();
        if exports.contains_key(service) {
            return Err(RuntimeError::DuplicateService {
                plugin: plugin.to_string(),
                service: service.to_string(),
            });
        }
        exports.insert(service.to_string(), handle);
        debug!(plugin, service, "Exported service");
        Ok(())
    }

    /// Import a service exported by `plugin`.
    pub fn import(&self, plugin: &str, service: &str) -> RuntimeResult<ServiceHandle> {
        let services = self.services.read();

        if let Some(status) = &self.status {
            match status.plugin_status(plugin) {
                None => return Err(RuntimeError::PluginNotFound(plugin.to_string())),
                Some(PluginStatus::Running) => {}
                Some(_) => return Err(RuntimeError::PluginNotRunning(plugin.to_string())),
            }
        }

        let Some(exports) = services.get(plugin) else {
            return Err(match self.status {
                Some(_) => RuntimeError::ServiceNotFound {
                    plugin: plugin.to_string(),
                    service: service.to_string(),
                },
                None => RuntimeError::PluginNotFound(plugin.to_string()),
            });
        };

        exports
            .get(service)
            .cloned()
            .ok_or_else(|| RuntimeError::ServiceNotFound {
                plugin: plugin.to_string(),
                service: service.to_string(),
            })
    }

    /// Import a service and downcast it to `T`.
    pub fn import_as<T>(&self, plugin: &str, service: &str) -> RuntimeResult<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.import(plugin, service)?
            .downcast::<T>()
            .map_err(|_| RuntimeError::ServiceTypeMismatch {
                plugin: plugin.to_string(),
                service: service.to_string(),
            })
    }

    /// Remove one export.
    pub fn unregister(&self, plugin: &str, service: &str) -> bool {
        let mut services = self.services.write();
        let removed = services
            .get_mut(plugin)
            .and_then(|exports| exports.remove(service))
            .is_some();
        if services.get(plugin).is_some_and(HashMap::is_empty) {
            services.remove(plugin);
        }
        if removed {
            debug!(plugin, service, "Unregistered service");
        }
        removed
    }

    /// Remove every export of `plugin`.
    pub fn unregister_all(&self, plugin: &str) -> usize {
        self.unregister_all_with(plugin, || ()).0
    }

    /// Remove every export of `plugin`, running `f` first inside the same
    /// write-locked section.
    ///
    /// No import can observe the state between `f` and the purge.
    pub fn unregister_all_with<R>(&self, plugin: &str, f: impl FnOnce() -> R) -> (usize, R) {
        let mut services = self.services.write();
        let result = f();
        let removed = services.remove(plugin).map_or(0, |exports| exports.len());
        if removed > 0 {
            debug!(plugin, removed, "Unregistered all services");
        }
        (removed, result)
    }

    /// Service names exported by `plugin`, sorted.
    pub fn list_services(&self, plugin: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .get(plugin)
            .map(|exports| exports.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn has_service(&self, plugin: &str, service: &str) -> bool {
        self.services
            .read()
            .get(plugin)
            .is_some_and(|exports| exports.contains_key(service))
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let services = self.services.read();
        let mut exporters: Vec<&String> = services.keys().collect();
        exporters.sort();
        f.debug_struct("ServiceRegistry")
            .field("exporters", &exporters)
            .field("status_gated", &self.status.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeter(&'static str);

    struct Statuses(RwLock<HashMap<String, PluginStatus>>);

    impl PluginStatusSource for Statuses {
        fn plugin_status(&self, plugin: &str) -> Option<PluginStatus> {
            self.0.read().get(plugin).copied()
        }
    }

    #[test]
    fn test_export_and_import() {
        let registry = ServiceRegistry::new();
        registry
            .export("auth", "greeter", Arc::new(Greeter("hello")))
            .unwrap();

        let greeter = registry.import_as::<Greeter>("auth", "greeter").unwrap();
        assert_eq!(greeter.0, "hello");

        assert!(matches!(
            registry.import_as::<String>("auth", "greeter"),
            Err(RuntimeError::ServiceTypeMismatch { .. })
        ));
        assert!(matches!(
            registry.import("auth", "missing"),
            Err(RuntimeError::ServiceNotFound { .. })
        ));
        assert!(matches!(
            registry.import("nobody", "greeter"),
            Err(RuntimeError::PluginNotFound(_))
        ));
    }

    #[test]
    fn test_duplicate_export_keeps_first() {
        let registry = ServiceRegistry::new();
        registry.export("a", "svc", Arc::new(Greeter("first"))).unwrap();

        let err = registry
            .export("a", "svc", Arc::new(Greeter("second")))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateService { .. }));

        let svc = registry.import_as::<Greeter>("a", "svc").unwrap();
        assert_eq!(svc.0, "first");
    }

    #[test]
    fn test_import_after_unregister_all_fails() {
        let registry = ServiceRegistry::new();
        registry.export("a", "one", Arc::new(1u32)).unwrap();
        registry.export("a", "two", Arc::new(2u32)).unwrap();
        assert_eq!(registry.list_services("a"), vec!["one", "two"]);

        assert_eq!(registry.unregister_all("a"), 2);
        assert!(registry.import("a", "one").is_err());
        assert!(registry.list_services("a").is_empty());
    }

    #[test]
    fn test_unregister_single() {
        let registry = ServiceRegistry::new();
        registry.export("a", "one", Arc::new(1u32)).unwrap();
        assert!(registry.unregister("a", "one"));
        assert!(!registry.unregister("a", "one"));
        assert!(!registry.has_service("a", "one"));
    }

    #[test]
    fn test_import_gated_on_running_exporter() {
        let statuses = Arc::new(Statuses(RwLock::new(HashMap::from([(
            "db".to_string(),
            PluginStatus::Initialized,
        )]))));
        let registry = ServiceRegistry::with_status_source(statuses.clone());
        registry.export("db", "pool", Arc::new(5u8)).unwrap();

        assert!(matches!(
            registry.import("db", "pool"),
            Err(RuntimeError::PluginNotRunning(_))
        ));

        statuses
            .0
            .write()
            .insert("db".to_string(), PluginStatus::Running);
        assert_eq!(*registry.import_as::<u8>("db", "pool").unwrap(), 5);

        assert!(matches!(
            registry.import("ghost", "pool"),
            Err(RuntimeError::PluginNotFound(_))
        ));
    }

    #[test]
    fn test_unregister_all_with_runs_closure() {
        let statuses = Arc::new(Statuses(RwLock::new(HashMap::from([(
            "db".to_string(),
            PluginStatus::Running,
        )]))));
        let registry = ServiceRegistry::with_status_source(statuses.clone());
        registry.export("db", "pool", Arc::new(5u8)).unwrap();

        let (removed, previous) = registry.unregister_all_with("db", || {
            statuses
                .0
                .write()
                .insert("db".to_string(), PluginStatus::Stopped)
        });
        assert_eq!(removed, 1);
        assert_eq!(previous, Some(PluginStatus::Running));
        assert!(matches!(
            registry.import("db", "pool"),
            Err(RuntimeError::PluginNotRunning(_))
        ));
    }
}
