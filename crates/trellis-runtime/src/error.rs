//! Error types for the Trellis runtime.

use thiserror::Error;

/// Errors that can occur in the Trellis runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Plugin is not known to the registry or manager.
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// A plugin with this name is already registered and active.
    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    /// Failed to parse or validate a plugin manifest.
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// A version string could not be parsed.
    #[error("Invalid version '{0}'")]
    InvalidVersion(String),

    /// A version constraint could not be parsed.
    #[error("Invalid version constraint '{constraint}': {reason}")]
    InvalidConstraint { constraint: String, reason: String },

    /// A required dependency is absent from the graph or not usable.
    #[error("Plugin '{plugin}' requires missing dependency '{dependency}'")]
    MissingDependency { plugin: String, dependency: String },

    /// A dependency is present but its version fails the constraint.
    #[error(
        "Plugin '{plugin}' requires '{dependency}' {constraint}, but version {found} is registered"
    )]
    VersionMismatch {
        plugin: String,
        dependency: String,
        constraint: String,
        found: String,
    },

    /// The dependency graph contains a cycle. Participants are in path order.
    #[error("Circular dependency detected: {}", format_cycle(.0))]
    CircularDependency(Vec<String>),

    /// The plugin was never assigned a capability set.
    #[error("No permissions assigned to plugin '{0}'")]
    NoPermissions(String),

    /// The plugin's capability set does not include the capability.
    #[error("Permission denied for capability '{capability}' (plugin '{plugin}')")]
    PermissionDenied { plugin: String, capability: String },

    /// The capability is granted but the host does not provide the service.
    #[error("Capability '{capability}' is not available to plugin '{plugin}'")]
    Unavailable { plugin: String, capability: String },

    /// The (plugin, service) pair is already exported.
    #[error("Service '{service}' is already exported by plugin '{plugin}'")]
    DuplicateService { plugin: String, service: String },

    /// The service was never exported or has been unregistered.
    #[error("Service '{service}' not found for plugin '{plugin}'")]
    ServiceNotFound { plugin: String, service: String },

    /// The service handle is not of the requested type.
    #[error("Service '{service}' of plugin '{plugin}' has an unexpected type")]
    ServiceTypeMismatch { plugin: String, service: String },

    /// The exporting plugin is not currently running.
    #[error("Plugin '{0}' is not running")]
    PluginNotRunning(String),

    /// A lifecycle call was made from a status that does not allow it.
    #[error("Plugin '{plugin}' cannot {action} while {status}")]
    InvalidState {
        plugin: String,
        action: String,
        status: String,
    },

    /// Running plugins still depend on the plugin.
    #[error("Plugin '{plugin}' is required by running plugins: {}", .dependents.join(", "))]
    DependentsActive {
        plugin: String,
        dependents: Vec<String>,
    },

    /// Initialize, start, stop or cleanup returned an error.
    #[error("Plugin '{plugin}' failed to {phase}: {message}")]
    LifecycleFailed {
        plugin: String,
        phase: String,
        message: String,
    },

    /// A hook handler failed.
    #[error("Hook '{hook}' of plugin '{plugin}' failed: {message}")]
    HookFailed {
        plugin: String,
        hook: String,
        message: String,
    },

    /// The caller cancelled the operation.
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Plugin configuration does not match its schema.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A plugin binary path could not be resolved.
    #[error("Invalid plugin path: {0}")]
    InvalidPath(String),

    /// A host-side operation failed.
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RuntimeError {
    /// Whether this error comes from the capability layer.
    pub fn is_permission_error(&self) -> bool {
        matches!(
            self,
            RuntimeError::NoPermissions(_)
                | RuntimeError::PermissionDenied { .. }
                | RuntimeError::Unavailable { .. }
        )
    }

    /// Whether this error reports a dependency cycle.
    pub fn is_cycle(&self) -> bool {
        matches!(self, RuntimeError::CircularDependency(_))
    }
}

fn format_cycle(participants: &[String]) -> String {
    match participants.first() {
        Some(first) => format!("{} -> {}", participants.join(" -> "), first),
        None => String::from("<empty>"),
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
