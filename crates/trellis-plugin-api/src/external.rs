//! Plugins that run as external processes.

use crate::context::PluginContext;
use crate::plugin::Plugin;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;
use trellis_runtime::{ConfigSchema, Dependency, PluginManifest, ProcessPlugin, RuntimeResult};

/// Adapts a [`ProcessPlugin`] to the [`Plugin`] trait.
///
/// Starting spawns the process and stopping kills it. Metadata comes from the
/// plugin's manifest.
pub struct ExternalPlugin {
    manifest: PluginManifest,
    schema: ConfigSchema,
    process: ProcessPlugin,
    context: Option<Arc<PluginContext>>,
}

impl ExternalPlugin {
    pub fn new(manifest: PluginManifest, process: ProcessPlugin) -> RuntimeResult<Self> {
        let schema = manifest.config_schema()?;
        Ok(Self {
            manifest,
            schema,
            process,
            context: None,
        })
    }

    pub fn process(&self) -> &ProcessPlugin {
        &self.process
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }
}

#[async_trait]
impl Plugin for ExternalPlugin {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn version(&self) -> &str {
        &self.manifest.version
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    fn author(&self) -> &str {
        &self.manifest.author
    }

    fn dependencies(&self) -> Vec<Dependency> {
        self.manifest.dependencies.clone()
    }

    fn config_schema(&self) -> ConfigSchema {
        self.schema.clone()
    }

    async fn initialize(&mut self, context: Arc<PluginContext>) -> anyhow::Result<()> {
        self.context = Some(context);
        Ok(())
    }

    async fn start(&mut self) -> anyhow::Result<()> {
        let pid = self.process.spawn().await?;
        info!(plugin = %self.manifest.name, pid, "External plugin started");
        if let Some(ctx) = &self.context {
            ctx.metrics().set_gauge("pid", f64::from(pid));
        }
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.process.stop().await?;
        Ok(())
    }

    async fn cleanup(&mut self) -> anyhow::Result<()> {
        self.process.stop().await?;
        self.context = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Registries;
    use crate::host::HostServices;
    use crate::metrics::MetricsRecorder;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn manifest() -> PluginManifest {
        PluginManifest::from_yaml(
            "name: sleeper\nversion: \"1.0.0\"\ndescription: Sleeps\nauthor: t\nentry_point: run\nconfig:\n  delay:\n    type: duration\n    default: 5s\n",
        )
        .unwrap()
    }

    #[test]
    fn test_metadata_from_manifest() {
        let process = ProcessPlugin::new("sleeper", PathBuf::from("/nonexistent"), HashMap::new());
        let plugin = ExternalPlugin::new(manifest(), process).unwrap();
        assert_eq!(plugin.name(), "sleeper");
        assert_eq!(plugin.version(), "1.0.0");
        assert!(plugin.config_schema().get("delay").is_some());
    }

    #[tokio::test]
    async fn test_start_fails_for_missing_binary() {
        let process = ProcessPlugin::new("sleeper", PathBuf::from("/nonexistent/bin"), HashMap::new());
        let mut plugin = ExternalPlugin::new(manifest(), process).unwrap();

        let ctx = Arc::new(PluginContext::new(
            "sleeper",
            Registries::new(HostServices::new()),
            HashMap::new(),
            Arc::new(MetricsRecorder::new()),
        ));
        plugin.initialize(ctx).await.unwrap();
        assert!(plugin.start().await.is_err());
        plugin.stop().await.unwrap();
        assert!(plugin.process().is_stop_requested());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_and_stop_process() {
        let process = ProcessPlugin::new("sleeper", PathBuf::from("/bin/sh"), HashMap::new())
            .with_args(["-c", "sleep 30"]);
        let mut plugin = ExternalPlugin::new(manifest(), process).unwrap();
        let metrics = Arc::new(MetricsRecorder::new());
        let ctx = Arc::new(PluginContext::new(
            "sleeper",
            Registries::new(HostServices::new()),
            HashMap::new(),
            Arc::clone(&metrics),
        ));

        plugin.initialize(ctx).await.unwrap();
        plugin.start().await.unwrap();
        assert!(plugin.process().is_running().await);
        assert!(metrics.gauge("pid").is_some());

        plugin.stop().await.unwrap();
        assert!(!plugin.process().is_running().await);
        plugin.cleanup().await.unwrap();
    }
}
