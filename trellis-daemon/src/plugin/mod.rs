//! # Plugin Management
//!
//! Manages Trellis plugins for the daemon.
//!
//! This module provides:
//! - Plugin registration from code or from discovered manifests
//! - Dependency-ordered lifecycle management (initialize/start/stop/unload)
//! - Teardown of every hook, subscription, service and middleware a plugin owns

mod manager;
mod table;

pub use manager::{LoadReport, PluginInfo, PluginManager, ShutdownReport};
