//! # trellis-plugin-api
//!
//! The contract between the Trellis host and its plugins.
//!
//! This crate provides:
//!
//! - The [`Plugin`] trait and its lifecycle [`PluginStatus`]
//! - Capability-checked host services reached through a [`PluginContext`]
//! - Hooks, events, exported services and middleware shared between plugins
//! - Per-plugin storage and metrics
//! - [`ExternalPlugin`], which runs a plugin as a separate process
//!
//! ## Writing a plugin
//!
//! Implement [`Plugin`]. The host calls `initialize` with a context before
//! `start`; that is where hooks, subscriptions and exports are registered.
//! Everything a plugin registers is removed by the host when it is unloaded.

pub mod builtin;
pub mod context;
pub mod events;
pub mod external;
pub mod hooks;
pub mod host;
pub mod metrics;
pub mod middleware;
pub mod plugin;
pub mod services;
pub mod storage;

pub use builtin::{HttpNetwork, LocalFileSystem, MemoryCache, MemoryConfig, RouteTable};
pub use context::{PluginContext, Registries};
pub use events::{Event, EventBus, EventHandler, PublishReport, SubscriptionId};
pub use external::ExternalPlugin;
pub use hooks::{HookContext, HookErrorPolicy, HookHandler, HookSystem};
pub use host::{
    Cache, ConfigStore, Database, Denied, FileSystem, HostServices, HttpResponse, LogLevel,
    Network, RequestContext, RouteHandler, RouteInfo, Router,
};
pub use metrics::{MetricsRecorder, PluginMetrics};
pub use middleware::{MiddlewareHandler, MiddlewareRegistry};
pub use plugin::{Plugin, PluginDescriptor, PluginStatus};
pub use services::{PluginStatusSource, ServiceHandle, ServiceRegistry};
pub use storage::PluginStorage;
