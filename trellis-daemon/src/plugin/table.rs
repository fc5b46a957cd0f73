//! The manager's plugin table.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use trellis_plugin_api::{
    MetricsRecorder, Plugin, PluginContext, PluginDescriptor, PluginStatus, PluginStatusSource,
};
use trellis_runtime::{ConfigSchema, PluginManifest};

/// A plugin instance shared between the table and in-flight lifecycle calls.
pub(crate) type SharedPlugin = Arc<tokio::sync::Mutex<Box<dyn Plugin>>>;

/// One registered plugin.
pub(crate) struct PluginEntry {
    pub descriptor: PluginDescriptor,
    pub status: PluginStatus,
    pub loaded_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub error_at: Option<DateTime<Utc>>,
    pub metrics: Arc<MetricsRecorder>,
    pub manifest: Option<PluginManifest>,
    pub schema: ConfigSchema,
    pub config: HashMap<String, Value>,
    pub instance: SharedPlugin,
    pub context: Option<Arc<PluginContext>>,
}

impl PluginEntry {
    pub fn new(
        descriptor: PluginDescriptor,
        instance: Box<dyn Plugin>,
        schema: ConfigSchema,
        manifest: Option<PluginManifest>,
    ) -> Self {
        let config = schema.defaults();
        Self {
            descriptor,
            status: PluginStatus::Loading,
            loaded_at: Utc::now(),
            last_error: None,
            error_at: None,
            metrics: Arc::new(MetricsRecorder::new()),
            manifest,
            schema,
            config,
            instance: Arc::new(tokio::sync::Mutex::new(instance)),
            context: None,
        }
    }
}

/// Registered plugins by name.
///
/// Entries are only ever touched through short closures; no lock is held
/// while a plugin runs.
#[derive(Default)]
pub(crate) struct PluginTable {
    entries: RwLock<HashMap<String, PluginEntry>>,
}

impl PluginTable {
    pub fn insert(&self, entry: PluginEntry) -> Option<PluginEntry> {
        self.entries
            .write()
            .insert(entry.descriptor.name.clone(), entry)
    }

    pub fn remove(&self, name: &str) -> Option<PluginEntry> {
        self.entries.write().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.entries.read().get(name).map(|e| e.status)
    }

    /// Read from an entry.
    pub fn read<R>(&self, name: &str, f: impl FnOnce(&PluginEntry) -> R) -> Option<R> {
        self.entries.read().get(name).map(f)
    }

    /// Mutate an entry.
    pub fn update<R>(&self, name: &str, f: impl FnOnce(&mut PluginEntry) -> R) -> Option<R> {
        self.entries.write().get_mut(name).map(f)
    }

    /// Record a failure: status becomes Error with message and timestamp.
    pub fn mark_error(&self, name: &str, message: &str) {
        self.update(name, |entry| {
            entry.status = PluginStatus::Error;
            entry.last_error = Some(message.to_string());
            entry.error_at = Some(Utc::now());
        });
    }
}

impl PluginStatusSource for PluginTable {
    fn plugin_status(&self, plugin: &str) -> Option<PluginStatus> {
        self.status(plugin)
    }
}
