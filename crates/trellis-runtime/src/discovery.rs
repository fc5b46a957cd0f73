//! Plugin discovery from plugin directories.
//!
//! Plugins are discovered from the following locations (in order):
//!
//! 1. Directories configured by the host
//! 2. `$XDG_DATA_HOME/trellis/plugins/` (user plugins)
//! 3. `/usr/local/share/trellis/plugins`, `/usr/share/trellis/plugins`
//!
//! Each plugin is a directory containing one of [`MANIFEST_FILE_NAMES`].
//! The first directory that provides a given plugin name wins.

use crate::error::{RuntimeError, RuntimeResult};
use crate::manifest::{PluginManifest, MANIFEST_FILE_NAMES};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Information about a discovered plugin.
#[derive(Debug, Clone)]
pub struct PluginPath {
    /// Path to the plugin directory.
    pub path: PathBuf,

    /// Path of the manifest file that was read.
    pub manifest_path: PathBuf,

    /// Parsed manifest.
    pub manifest: PluginManifest,
}

impl PluginPath {
    /// Get the plugin name.
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Get the plugin version.
    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// Path to the plugin executable, for process-based plugins.
    pub fn entry_point_path(&self) -> Option<PathBuf> {
        self.manifest
            .entry_point
            .as_deref()
            .map(|entry| self.path.join(entry))
    }
}

/// Get the user plugins directory.
pub fn user_plugins_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "trellis", "trellis")
        .map(|dirs| dirs.data_dir().join("plugins"))
}

/// Get the system plugins directories that exist on this machine.
pub fn system_plugins_dirs() -> Vec<PathBuf> {
    [
        "/usr/local/share/trellis/plugins",
        "/usr/share/trellis/plugins",
    ]
    .into_iter()
    .map(PathBuf::from)
    .filter(|p| p.exists())
    .collect()
}

/// Discover plugins from `extra_dirs` followed by the well-known paths.
pub fn discover_plugins(extra_dirs: &[PathBuf]) -> RuntimeResult<Vec<PluginPath>> {
    let mut plugins = Vec::new();
    let mut seen = HashSet::new();

    let dirs = extra_dirs
        .iter()
        .cloned()
        .chain(user_plugins_dir())
        .chain(system_plugins_dirs());

    for dir in dirs {
        debug!("Scanning plugins directory: {:?}", dir);
        discover_in_directory(&dir, &mut plugins, &mut seen)?;
    }

    info!("Discovered {} plugins", plugins.len());
    Ok(plugins)
}

/// Discover plugins in a specific directory.
///
/// Unreadable directories and invalid manifests are logged and skipped.
pub fn discover_in_directory(
    dir: &Path,
    plugins: &mut Vec<PluginPath>,
    seen: &mut HashSet<String>,
) -> RuntimeResult<()> {
    if !dir.exists() {
        return Ok(());
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!("Failed to read plugins directory {:?}: {}", dir, e);
            return Ok(());
        }
    };

    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    candidates.sort();

    for path in candidates {
        let Some(manifest_path) = find_manifest(&path) else {
            debug!("Skipping {:?}: no manifest", path);
            continue;
        };

        match PluginManifest::from_file(&manifest_path) {
            Ok(manifest) => {
                if seen.contains(&manifest.name) {
                    debug!("Skipping duplicate plugin: {}", manifest.name);
                    continue;
                }

                info!(
                    "Discovered plugin: {} v{} at {:?}",
                    manifest.name, manifest.version, path
                );

                seen.insert(manifest.name.clone());
                plugins.push(PluginPath {
                    path,
                    manifest_path,
                    manifest,
                });
            }
            Err(e) => {
                warn!("Failed to load manifest from {:?}: {}", manifest_path, e);
            }
        }
    }

    Ok(())
}

/// Discover a single plugin from its directory.
pub fn discover_plugin(path: &Path) -> RuntimeResult<PluginPath> {
    let manifest_path = find_manifest(path).ok_or_else(|| {
        RuntimeError::PluginNotFound(format!("no manifest in {}", path.display()))
    })?;
    let manifest = PluginManifest::from_file(&manifest_path)?;

    Ok(PluginPath {
        path: path.to_path_buf(),
        manifest_path,
        manifest,
    })
}

fn find_manifest(dir: &Path) -> Option<PathBuf> {
    MANIFEST_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
}
