//! Configuration file loading and management
//!
//! This module handles loading and parsing the daemon configuration from
//! `$XDG_CONFIG_HOME/trellis/config.toml`. If the configuration file doesn't
//! exist, a default configuration is created with documented comments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use trellis_plugin_api::HookErrorPolicy;
use trellis_runtime::{Capability, CapabilitySet, Version};

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Daemon-specific configuration
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Plugin loading configuration
    #[serde(default)]
    pub plugins: PluginsConfig,
    /// Per-plugin permission overrides, applied on top of the manifest
    #[serde(default)]
    pub permissions: HashMap<String, PermissionOverride>,
    /// Per-plugin settings as arbitrary TOML tables
    #[serde(default)]
    pub settings: HashMap<String, toml::Value>,
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Log level (trace, debug, info, warn, error)
    /// Default: "info"
    pub log_level: String,
    /// Host version checked against each manifest's `framework.version`
    /// Default: the daemon's own version
    pub host_version: String,
}

/// Plugin loading configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PluginsConfig {
    /// Extra directories scanned before the well-known plugin paths
    #[serde(default)]
    pub directories: Vec<PathBuf>,
    /// Base directory for relative process-plugin paths
    /// If None, each plugin's own directory is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    /// Root directory for the filesystem capability
    /// If None, uses XDG_DATA_HOME/trellis/files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem_root: Option<PathBuf>,
    /// What a failing hook does to the rest of its pass: "abort" or "continue"
    #[serde(default)]
    pub hook_error_policy: HookErrorPolicy,
    /// Plugins that are discovered but never loaded
    #[serde(default)]
    pub disabled: Vec<String>,
}

/// Capabilities granted or revoked for one plugin
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PermissionOverride {
    #[serde(default)]
    pub grant: Vec<String>,
    #[serde(default)]
    pub revoke: Vec<String>,
}

impl PermissionOverride {
    /// Apply this override to the capabilities a manifest requested.
    pub fn apply(&self, requested: &CapabilitySet) -> CapabilitySet {
        let mut set = requested.clone();
        for name in &self.grant {
            set.set(&Capability::parse(name), true);
        }
        for name in &self.revoke {
            set.set(&Capability::parse(name), false);
        }
        set
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            host_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// The parsed configuration or an error if loading/parsing fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default XDG config location
    ///
    /// If the configuration file doesn't exist, creates a default configuration
    /// file with documented comments.
    pub fn load_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_file(&config_path)?;
        }

        Self::load(&config_path)
    }

    /// Get the default configuration file path
    ///
    /// Returns `$XDG_CONFIG_HOME/trellis/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "trellis", "trellis")
            .context("Failed to determine project directories")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Create a default configuration file with documented comments
    fn create_default_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, Self::default_config_content())
            .with_context(|| format!("Failed to write default config file: {}", path.display()))?;

        tracing::info!("Created default configuration file at: {}", path.display());
        Ok(())
    }

    /// Generate the default configuration file content with comments
    fn default_config_content() -> String {
        format!(
            r#"# Trellis Daemon Configuration
# This file configures the trellis-daemon plugin host.

[daemon]
# Log level: trace, debug, info, warn, error
# RUST_LOG overrides this when set.
# Default: "info"
log_level = "info"

# Host version checked against each plugin's framework requirement
host_version = "{version}"

[plugins]
# Extra plugin directories, scanned before
# $XDG_DATA_HOME/trellis/plugins and /usr/share/trellis/plugins
directories = []

# Base directory for relative process-plugin entry points
# base_dir = "/opt/trellis/bin"

# Root directory exposed through the filesystem capability
# filesystem_root = "/var/lib/trellis/files"

# What a failing hook does to the rest of its pass: "abort" or "continue"
hook_error_policy = "abort"

# Plugins that are discovered but never loaded
disabled = []

# Per-plugin permission overrides, applied on top of the manifest
# [permissions.example]
# grant = ["network"]
# revoke = ["database"]

# Per-plugin settings, validated against the plugin's config schema
# [settings.example]
# endpoint = "https://example.com"
# timeout = "30s"
"#,
            version = env!("CARGO_PKG_VERSION")
        )
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.daemon.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log_level: {}. Must be one of: {}",
                self.daemon.log_level,
                valid_log_levels.join(", ")
            );
        }

        Version::parse(&self.daemon.host_version)
            .with_context(|| format!("Invalid host_version: {}", self.daemon.host_version))?;

        if self.plugins.disabled.iter().any(|name| name.trim().is_empty()) {
            anyhow::bail!("plugins.disabled must not contain empty names");
        }

        for (plugin, settings) in &self.settings {
            if !settings.is_table() {
                anyhow::bail!("settings.{} must be a table", plugin);
            }
        }

        Ok(())
    }

    /// Whether a plugin is listed in `plugins.disabled`
    pub fn is_disabled(&self, plugin: &str) -> bool {
        self.plugins.disabled.iter().any(|name| name == plugin)
    }

    /// Capabilities for a plugin: the manifest's request with overrides applied
    pub fn capabilities_for(&self, plugin: &str, requested: &CapabilitySet) -> CapabilitySet {
        match self.permissions.get(plugin) {
            Some(over) => over.apply(requested),
            None => requested.clone(),
        }
    }

    /// A plugin's settings converted to JSON values
    pub fn settings_for(&self, plugin: &str) -> Result<HashMap<String, serde_json::Value>> {
        let Some(settings) = self.settings.get(plugin) else {
            return Ok(HashMap::new());
        };
        let value = serde_json::to_value(settings)
            .with_context(|| format!("Failed to convert settings for plugin: {}", plugin))?;
        serde_json::from_value(value)
            .with_context(|| format!("settings.{} must be a table", plugin))
    }

    /// Get the filesystem capability root
    ///
    /// Returns the configured root or the default XDG data directory path
    pub fn filesystem_root(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.plugins.filesystem_root {
            return Ok(path.clone());
        }

        let dirs = directories::ProjectDirs::from("dev", "trellis", "trellis")
            .context("Failed to determine project directories")?;

        Ok(dirs.data_dir().join("files"))
    }
}
