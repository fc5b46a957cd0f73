//! Process-based plugin loader.
//!
//! External plugins are executables that run in their own process. The loader
//! resolves their path against a base directory and hands back a
//! [`ProcessPlugin`] that can spawn, track and terminate the process.

use crate::error::{RuntimeError, RuntimeResult};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Environment variable carrying the plugin configuration as JSON.
pub const CONFIG_ENV: &str = "TRELLIS_PLUGIN_CONFIG";

/// Environment variable carrying the plugin name.
pub const NAME_ENV: &str = "TRELLIS_PLUGIN_NAME";

/// Resolves and loads process-based plugins.
#[derive(Debug, Clone)]
pub struct ProcessLoader {
    base_dir: PathBuf,
}

impl ProcessLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve a plugin path.
    ///
    /// Absolute paths are cleaned as they are; relative paths are joined to
    /// the base directory and then cleaned. An empty path is always rejected.
    pub fn resolve_path(&self, path: &str) -> RuntimeResult<PathBuf> {
        if path.trim().is_empty() {
            return Err(RuntimeError::InvalidPath("plugin path is empty".to_string()));
        }

        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.base_dir.join(candidate)
        };
        Ok(clean_path(&joined))
    }

    /// Resolve `path`, check that it exists and return a handle.
    ///
    /// Nothing is spawned yet.
    pub fn load(&self, path: &str, config: HashMap<String, Value>) -> RuntimeResult<ProcessPlugin> {
        let resolved = self.resolve_path(path)?;
        if !resolved.exists() {
            return Err(RuntimeError::PluginNotFound(resolved.display().to_string()));
        }
        if !is_executable(&resolved) {
            warn!("Plugin binary {:?} is not executable", resolved);
        }

        let name = resolved
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("plugin")
            .to_string();

        info!("Loaded process plugin {} from {:?}", name, resolved);
        Ok(ProcessPlugin::new(name, resolved, config))
    }

    /// Signal the plugin to stop and terminate its process.
    pub async fn unload(&self, plugin: &ProcessPlugin) -> RuntimeResult<()> {
        plugin.stop().await
    }
}

/// Lexically normalize a path: drop `.` and fold `..` into its parent.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(cleaned.components().next_back(), Some(Component::Normal(_)));
                if can_pop {
                    cleaned.pop();
                } else if !cleaned.has_root() {
                    cleaned.push("..");
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// A plugin backed by an external process.
#[derive(Debug)]
pub struct ProcessPlugin {
    name: String,
    path: PathBuf,
    args: Vec<String>,
    config: HashMap<String, Value>,
    stop_tx: watch::Sender<bool>,
    child: Mutex<Option<Child>>,
}

impl ProcessPlugin {
    pub fn new(name: impl Into<String>, path: PathBuf, config: HashMap<String, Value>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            path,
            args: Vec::new(),
            config,
            stop_tx,
            child: Mutex::new(None),
        }
    }

    /// Command-line arguments passed on spawn.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Rename the plugin (defaults to the binary's file stem).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &HashMap<String, Value> {
        &self.config
    }

    /// Receiver that flips to `true` once the plugin is asked to stop.
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Spawn the process, returning its pid. A running process is reused.
    pub async fn spawn(&self) -> RuntimeResult<u32> {
        let mut slot = self.child.lock().await;
        if let Some(child) = slot.as_mut() {
            if child.try_wait()?.is_none() {
                if let Some(pid) = child.id() {
                    return Ok(pid);
                }
            }
        }

        let config = serde_json::to_string(&self.config)?;
        let child = Command::new(&self.path)
            .args(&self.args)
            .env(CONFIG_ENV, config)
            .env(NAME_ENV, &self.name)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child
            .id()
            .ok_or_else(|| RuntimeError::ExecutionError(format!("{} exited on spawn", self.name)))?;
        self.stop_tx.send_replace(false);
        *slot = Some(child);

        info!(plugin = %self.name, pid, "Spawned plugin process");
        Ok(pid)
    }

    /// Process id while the process is tracked.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }

    /// Whether the tracked process is still alive.
    pub async fn is_running(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Signal the stop channel and kill the tracked process, if any.
    pub async fn stop(&self) -> RuntimeResult<()> {
        self.stop_tx.send_replace(true);

        let Some(mut child) = self.child.lock().await.take() else {
            debug!(plugin = %self.name, "No process to stop");
            return Ok(());
        };

        if child.try_wait()?.is_some() {
            debug!(plugin = %self.name, "Plugin process already exited");
            return Ok(());
        }

        child.kill().await?;
        info!(plugin = %self.name, "Terminated plugin process");
        Ok(())
    }
}
