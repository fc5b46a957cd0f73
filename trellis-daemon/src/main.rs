//! # trellis-daemon
//!
//! The Trellis plugin host.
//!
//! This daemon is responsible for:
//! - Discovering plugin manifests in the configured and well-known directories
//! - Resolving plugin dependencies into a load order
//! - Running each plugin with only the host capabilities it was granted
//! - Tearing plugins down in reverse order on shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      trellis-daemon                          │
//! │                                                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │  Discovery   │  │  Dependency  │  │  Permission  │      │
//! │  │  (manifests) │  │    Graph     │  │   Checker    │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │                                                              │
//! │  ┌────────────────────────────────────────────────────┐    │
//! │  │                  Plugin Manager                     │    │
//! │  │     hooks · events · services · middleware          │    │
//! │  └────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!           ┌──────────────────┼──────────────────┐
//!           ▼                  ▼                  ▼
//!      ┌─────────┐      ┌─────────────┐    ┌──────────┐
//!      │ Process │      │   Process   │    │  Process │
//!      │ plugin  │      │   plugin    │    │  plugin  │
//!      └─────────┘      └─────────────┘    └──────────┘
//! ```
//!
//! ## Configuration
//!
//! The daemon reads configuration from `$XDG_CONFIG_HOME/trellis/config.toml`.
//!
//! ## Running
//!
//! ```bash
//! # Start the daemon
//! cargo run --bin trellis-daemon
//!
//! # With debug logging
//! RUST_LOG=debug cargo run --bin trellis-daemon
//! ```

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trellis_daemon::config::Config;
use trellis_daemon::plugin::PluginManager;
use trellis_plugin_api::{
    HookContext, HostServices, HttpNetwork, LocalFileSystem, MemoryCache, MemoryConfig,
    RouteTable,
};
use trellis_runtime::{discover_plugins, HookKind};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before logging so its level can seed the filter
    let loaded = Config::load_default();
    let config = match &loaded {
        Ok(cfg) => cfg.clone(),
        Err(_) => Config::default(),
    };

    // Initialize logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.daemon.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting trellis-daemon v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Ok(_) => info!("Loaded configuration from default path"),
        Err(e) => warn!("Failed to load config, using defaults: {:#}", e),
    }

    // Host services plugins may be granted
    let files_root = config.filesystem_root()?;
    std::fs::create_dir_all(&files_root).with_context(|| {
        format!("Failed to create filesystem root: {}", files_root.display())
    })?;
    let host = HostServices::new()
        .with_cache(Arc::new(MemoryCache::new()))
        .with_config(Arc::new(MemoryConfig::new()))
        .with_router(Arc::new(RouteTable::new()))
        .with_filesystem(Arc::new(LocalFileSystem::new(files_root)))
        .with_network(Arc::new(HttpNetwork::new()));

    let manager = PluginManager::with_hook_policy(host, config.plugins.hook_error_policy)
        .with_host_version(config.daemon.host_version.clone());

    // Discover and register plugins
    let discovered = discover_plugins(&config.plugins.directories)?;
    for found in &discovered {
        let name = found.name();
        if config.is_disabled(name) {
            info!("Plugin {} is disabled, skipping", name);
            continue;
        }
        if !found.manifest.is_process_plugin() {
            warn!("Plugin {} has no entry_point, skipping", name);
            continue;
        }

        let settings = match config.settings_for(name) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Skipping plugin {}: {:#}", name, e);
                continue;
            }
        };

        if let Err(e) =
            manager.register_discovered(found, config.plugins.base_dir.as_deref(), settings)
        {
            warn!("Failed to register plugin {}: {}", name, e);
            continue;
        }

        if config.permissions.contains_key(name) {
            let capabilities =
                config.capabilities_for(name, &found.manifest.capability_set());
            manager.set_permissions(name, &capabilities)?;
        }
    }

    // Start everything in dependency order
    let report = manager.start_all().await?;
    for (name, err) in &report.failed {
        warn!("Plugin {} failed to load: {}", name, err);
    }
    for plugin in manager.list_plugins() {
        info!(
            "Plugin: {} v{} ({}) - capabilities: {:?}",
            plugin.name, plugin.version, plugin.status, plugin.capabilities
        );
    }

    let mut startup = HookContext::new(HookKind::Startup);
    if let Err(e) = manager.execute_hooks(HookKind::Startup, &mut startup) {
        warn!("Startup hooks failed: {}", e);
    }
    manager.publish_event("host.started", json!({ "plugins": report.started }));

    info!("Daemon startup complete");
    info!("Press Ctrl+C to stop");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");

    let mut shutdown = HookContext::new(HookKind::Shutdown);
    if let Err(e) = manager.execute_hooks(HookKind::Shutdown, &mut shutdown) {
        warn!("Shutdown hooks failed: {}", e);
    }

    let stopped = manager.stop_all().await;
    for (name, err) in &stopped.failed {
        warn!("Plugin {} failed to stop: {}", name, err);
    }
    let unloaded = manager.unload_all().await;
    for (name, err) in &unloaded.failed {
        warn!("Plugin {} failed to unload: {}", name, err);
    }

    info!("Daemon stopped");
    Ok(())
}
