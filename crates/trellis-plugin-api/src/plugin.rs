//! The plugin trait and lifecycle status.
//!
//! Plugins are trait objects; the host only ever sees `Box<dyn Plugin>`.

use crate::context::PluginContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use trellis_runtime::{ConfigSchema, Dependency, PluginManifest};

/// An extension module hosted by the plugin manager.
///
/// Lifecycle calls happen in order `initialize` → `start` → `stop` →
/// `cleanup`, each at most once per load. An error from any of them moves the
/// plugin to [`PluginStatus::Error`].
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// Plugin version, at least `major.minor`.
    fn version(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn author(&self) -> &str {
        ""
    }

    /// Plugins this one depends on.
    fn dependencies(&self) -> Vec<Dependency> {
        Vec::new()
    }

    /// Configuration fields the plugin accepts.
    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::default()
    }

    /// Receive the context. Hooks, subscriptions and exports are usually
    /// registered here.
    async fn initialize(&mut self, context: Arc<PluginContext>) -> anyhow::Result<()>;

    async fn start(&mut self) -> anyhow::Result<()>;

    async fn stop(&mut self) -> anyhow::Result<()>;

    /// Release resources before the plugin is dropped.
    async fn cleanup(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after the host validated and applied a new configuration.
    async fn on_config_change(&mut self, _config: &HashMap<String, Value>) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Lifecycle status of a plugin.
///
/// Progress is strictly forward. `Error` can be reached from any status and
/// ends the load attempt; the plugin has to be registered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Unloaded,
    Loading,
    Initialized,
    Running,
    Stopped,
    Error,
}

impl PluginStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: PluginStatus) -> bool {
        use PluginStatus::*;
        matches!(
            (self, next),
            (Unloaded, Loading)
                | (Loading, Initialized)
                | (Initialized, Running)
                | (Running, Stopped)
                | (_, Error)
        )
    }

    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a plugin: identity plus declared dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl PluginDescriptor {
    /// Describe a plugin instance.
    pub fn of(plugin: &dyn Plugin) -> Self {
        Self {
            name: plugin.name().to_string(),
            version: plugin.version().to_string(),
            description: plugin.description().to_string(),
            author: plugin.author().to_string(),
            dependencies: plugin.dependencies(),
        }
    }

    /// Describe a plugin from its manifest.
    pub fn from_manifest(manifest: &PluginManifest) -> Self {
        Self {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            description: manifest.description.clone(),
            author: manifest.author.clone(),
            dependencies: manifest.dependencies.clone(),
        }
    }
}
