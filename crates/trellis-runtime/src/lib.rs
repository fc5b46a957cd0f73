//! # trellis-runtime
//!
//! Core runtime pieces for the Trellis plugin host.
//!
//! This crate provides:
//! - Semantic version parsing and constraint matching
//! - Dependency graphs with cycle detection and stable load ordering
//! - Capability-based permissions
//! - Plugin manifest parsing (YAML or JSON) and configuration schemas
//! - Plugin discovery from well-known paths
//! - Loading of process-based plugins
//!
//! ## Plugin Structure
//!
//! Plugins are directories containing:
//! - `manifest.yaml` (or `manifest.yml` / `manifest.json`) - metadata,
//!   dependencies, permissions, hooks and configuration schema
//! - an optional executable named by the manifest's `entry_point`
//!
//! ## Security Model
//!
//! Plugins declare the capabilities they need in their manifest, and a plugin
//! registered from its manifest is granted exactly that set. The daemon can
//! grant or revoke individual capabilities per plugin through a
//! `[permissions.<plugin>]` override. Every privileged access is checked
//! against the granted set, and denials are logged under the
//! `trellis::security` target.

pub mod capability;
pub mod discovery;
pub mod error;
pub mod graph;
pub mod loader;
pub mod manifest;
pub mod schema;
pub mod version;

pub use capability::{Capability, CapabilitySet, PermissionChecker, SECURITY_TARGET};
pub use discovery::{discover_plugin, discover_plugins, PluginPath};
pub use error::{RuntimeError, RuntimeResult};
pub use graph::{Dependency, DependencyGraph, PluginNode};
pub use loader::{ProcessLoader, ProcessPlugin};
pub use manifest::{HookKind, PluginManifest};
pub use schema::{ConfigField, ConfigFieldType, ConfigSchema};
pub use version::{satisfies, Version, VersionConstraint};
