//! Host services exposed to plugins.
//!
//! Each sensitive service is described by a capability trait. Plugins never
//! hold a service directly: [`PluginContext`](crate::PluginContext) checks the
//! plugin's permissions first and hands out either the real service or a
//! [`Denied`] stand-in implementing the same trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use trellis_runtime::{Capability, RuntimeError, RuntimeResult, SECURITY_TARGET};

/// One row returned by a database query.
pub type Row = serde_json::Map<String, Value>;

/// Handler invoked for a matched route.
pub type RouteHandler = Arc<dyn Fn(&RequestContext) -> anyhow::Result<HttpResponse> + Send + Sync>;

/// SQL storage.
///
/// Requires: `Capability::Database`
#[async_trait]
pub trait Database: Send + Sync {
    async fn query(&self, sql: &str, params: &[Value]) -> RuntimeResult<Vec<Row>>;

    /// Run a statement, returning the number of affected rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> RuntimeResult<u64>;

    async fn ping(&self) -> bool;
}

/// Shared key/value cache.
///
/// Requires: `Capability::Cache`
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> RuntimeResult<()>;

    /// Remove a key, returning whether it existed.
    async fn delete(&self, key: &str) -> RuntimeResult<bool>;

    async fn exists(&self, key: &str) -> bool;
}

/// Host configuration.
///
/// Requires: `Capability::Config`
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> RuntimeResult<()>;

    fn keys(&self) -> Vec<String>;
}

/// HTTP route registration.
///
/// Requires: `Capability::Router`
pub trait Router: Send + Sync {
    fn add_route(&self, method: &str, path: &str, handler: RouteHandler) -> RuntimeResult<()>;

    fn remove_route(&self, method: &str, path: &str) -> RuntimeResult<()>;

    fn routes(&self) -> Vec<RouteInfo>;
}

/// File access.
///
/// Requires: `Capability::Filesystem`
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read(&self, path: &str) -> RuntimeResult<Vec<u8>>;

    async fn write(&self, path: &str, contents: &[u8]) -> RuntimeResult<()>;

    async fn exists(&self, path: &str) -> bool;

    /// Entry names of a directory, sorted.
    async fn list(&self, dir: &str) -> RuntimeResult<Vec<String>>;
}

/// Outbound HTTP.
///
/// Requires: `Capability::Network`
#[async_trait]
pub trait Network: Send + Sync {
    async fn http_get(
        &self,
        url: &str,
        headers: HashMap<String, String>,
    ) -> RuntimeResult<HttpResponse>;

    async fn http_post(
        &self,
        url: &str,
        headers: HashMap<String, String>,
        body: &str,
    ) -> RuntimeResult<HttpResponse>;
}

/// HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A registered route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteInfo {
    pub method: String,
    pub path: String,
}

/// An incoming request as seen by routes and middleware.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,

    /// Values passed between middleware and the route handler.
    pub data: HashMap<String, Value>,

    response: Option<HttpResponse>,
    halted: bool,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Header lookup, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Answer the request and stop the middleware chain.
    pub fn respond(&mut self, response: HttpResponse) {
        self.response = Some(response);
        self.halted = true;
    }

    /// Stop the middleware chain without answering.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        self.response.as_ref()
    }

    pub fn take_response(&mut self) -> Option<HttpResponse> {
        self.response.take()
    }
}

/// Log level for plugin logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// The real services the host provides. Absent services are reported to
/// plugins as unavailable even when the capability is granted.
#[derive(Clone, Default)]
pub struct HostServices {
    pub database: Option<Arc<dyn Database>>,
    pub cache: Option<Arc<dyn Cache>>,
    pub config: Option<Arc<dyn ConfigStore>>,
    pub router: Option<Arc<dyn Router>>,
    pub filesystem: Option<Arc<dyn FileSystem>>,
    pub network: Option<Arc<dyn Network>>,
}

impl HostServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_config(mut self, config: Arc<dyn ConfigStore>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn with_filesystem(mut self, filesystem: Arc<dyn FileSystem>) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    pub fn with_network(mut self, network: Arc<dyn Network>) -> Self {
        self.network = Some(network);
        self
    }

    /// Names of the services that are present.
    pub fn provided(&self) -> Vec<Capability> {
        [
            (Capability::Database, self.database.is_some()),
            (Capability::Cache, self.cache.is_some()),
            (Capability::Config, self.config.is_some()),
            (Capability::Router, self.router.is_some()),
            (Capability::Filesystem, self.filesystem.is_some()),
            (Capability::Network, self.network.is_some()),
        ]
        .into_iter()
        .filter_map(|(cap, present)| present.then_some(cap))
        .collect()
    }
}

impl fmt::Debug for HostServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostServices")
            .field("provided", &self.provided())
            .finish()
    }
}

/// The value a denied call returns, per return shape.
pub trait Denial {
    fn denial(error: RuntimeError) -> Self;
}

impl<T> Denial for RuntimeResult<T> {
    fn denial(error: RuntimeError) -> Self {
        Err(error)
    }
}

impl<T> Denial for Option<T> {
    fn denial(_: RuntimeError) -> Self {
        None
    }
}

impl<T> Denial for Vec<T> {
    fn denial(_: RuntimeError) -> Self {
        Vec::new()
    }
}

impl Denial for bool {
    fn denial(_: RuntimeError) -> Self {
        false
    }
}

/// Why a [`Denied`] stand-in was handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialKind {
    /// The plugin lacks the capability.
    PermissionDenied,
    /// The capability is granted but the host has no such service.
    Unavailable,
}

/// Stand-in for a service the plugin may not use.
///
/// Implements every capability trait. Each call logs the violation and
/// returns the natural denial for its return type.
#[derive(Debug, Clone)]
pub struct Denied {
    plugin: String,
    capability: Capability,
    kind: DenialKind,
}

impl Denied {
    pub fn permission_denied(plugin: impl Into<String>, capability: Capability) -> Self {
        Self {
            plugin: plugin.into(),
            capability,
            kind: DenialKind::PermissionDenied,
        }
    }

    pub fn unavailable(plugin: impl Into<String>, capability: Capability) -> Self {
        Self {
            plugin: plugin.into(),
            capability,
            kind: DenialKind::Unavailable,
        }
    }

    pub fn kind(&self) -> DenialKind {
        self.kind
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    /// The error reported by calls that return a `Result`.
    pub fn error(&self) -> RuntimeError {
        let plugin = self.plugin.clone();
        let capability = self.capability.as_str().to_string();
        match self.kind {
            DenialKind::PermissionDenied => RuntimeError::PermissionDenied { plugin, capability },
            DenialKind::Unavailable => RuntimeError::Unavailable { plugin, capability },
        }
    }

    fn deny<R: Denial>(&self, operation: &str) -> R {
        match self.kind {
            DenialKind::PermissionDenied => warn!(
                target: SECURITY_TARGET,
                plugin = %self.plugin,
                capability = %self.capability,
                operation,
                "Blocked call without permission"
            ),
            DenialKind::Unavailable => warn!(
                plugin = %self.plugin,
                capability = %self.capability,
                operation,
                "Call to a service the host does not provide"
            ),
        }
        R::denial(self.error())
    }
}

#[async_trait]
impl Database for Denied {
    async fn query(&self, _sql: &str, _params: &[Value]) -> RuntimeResult<Vec<Row>> {
        self.deny("query")
    }

    async fn execute(&self, _sql: &str, _params: &[Value]) -> RuntimeResult<u64> {
        self.deny("execute")
    }

    async fn ping(&self) -> bool {
        self.deny("ping")
    }
}

#[async_trait]
impl Cache for Denied {
    async fn get(&self, _key: &str) -> Option<Value> {
        self.deny("get")
    }

    async fn set(&self, _key: &str, _value: Value, _ttl: Option<Duration>) -> RuntimeResult<()> {
        self.deny("set")
    }

    async fn delete(&self, _key: &str) -> RuntimeResult<bool> {
        self.deny("delete")
    }

    async fn exists(&self, _key: &str) -> bool {
        self.deny("exists")
    }
}

impl ConfigStore for Denied {
    fn get(&self, _key: &str) -> Option<Value> {
        self.deny("get")
    }

    fn set(&self, _key: &str, _value: Value) -> RuntimeResult<()> {
        self.deny("set")
    }

    fn keys(&self) -> Vec<String> {
        self.deny("keys")
    }
}

impl Router for Denied {
    fn add_route(&self, _method: &str, _path: &str, _handler: RouteHandler) -> RuntimeResult<()> {
        self.deny("add_route")
    }

    fn remove_route(&self, _method: &str, _path: &str) -> RuntimeResult<()> {
        self.deny("remove_route")
    }

    fn routes(&self) -> Vec<RouteInfo> {
        self.deny("routes")
    }
}

#[async_trait]
impl FileSystem for Denied {
    async fn read(&self, _path: &str) -> RuntimeResult<Vec<u8>> {
        self.deny("read")
    }

    async fn write(&self, _path: &str, _contents: &[u8]) -> RuntimeResult<()> {
        self.deny("write")
    }

    async fn exists(&self, _path: &str) -> bool {
        self.deny("exists")
    }

    async fn list(&self, _dir: &str) -> RuntimeResult<Vec<String>> {
        self.deny("list")
    }
}

#[async_trait]
impl Network for Denied {
    async fn http_get(
        &self,
        _url: &str,
        _headers: HashMap<String, String>,
    ) -> RuntimeResult<HttpResponse> {
        self.deny("http_get")
    }

    async fn http_post(
        &self,
        _url: &str,
        _headers: HashMap<String, String>,
        _body: &str,
    ) -> RuntimeResult<HttpResponse> {
        self.deny("http_post")
    }
}
