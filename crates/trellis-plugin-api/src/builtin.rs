//! In-process implementations of the host services.
//!
//! These back the capability traits when the host has nothing better to
//! offer. There is no SQL driver here; a host that wants `Database` must
//! supply its own.

use crate::host::{
    Cache, ConfigStore, FileSystem, HttpResponse, Network, RequestContext, RouteHandler, RouteInfo,
    Router,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;
use trellis_runtime::loader::clean_path;
use trellis_runtime::{RuntimeError, RuntimeResult};

struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// In-memory cache with optional per-entry TTL.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone())
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> RuntimeResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .write()
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> RuntimeResult<bool> {
        Ok(self
            .entries
            .write()
            .remove(key)
            .is_some_and(|entry| !entry.is_expired()))
    }

    async fn exists(&self, key: &str) -> bool {
        self.entries
            .read()
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }
}

/// In-memory configuration store.
#[derive(Debug, Default)]
pub struct MemoryConfig {
    values: RwLock<BTreeMap<String, Value>>,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            values: RwLock::new(values.into_iter().collect()),
        }
    }
}

impl ConfigStore for MemoryConfig {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> RuntimeResult<()> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }
}

/// Exact-match route table keyed by method and path.
#[derive(Default)]
pub struct RouteTable {
    routes: RwLock<BTreeMap<(String, String), RouteHandler>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the handler registered for the request, if any.
    ///
    /// The handler runs after the table lock is released.
    pub fn dispatch(&self, request: &RequestContext) -> Option<RuntimeResult<HttpResponse>> {
        let handler = self
            .routes
            .read()
            .get(&(request.method.clone(), request.path.clone()))
            .cloned()?;

        Some(handler(request).map_err(|e| {
            RuntimeError::ExecutionError(format!(
                "route {} {} failed: {e}",
                request.method, request.path
            ))
        }))
    }
}

impl Router for RouteTable {
    fn add_route(&self, method: &str, path: &str, handler: RouteHandler) -> RuntimeResult<()> {
        if path.is_empty() || !path.starts_with('/') {
            return Err(RuntimeError::InvalidPath(format!("route path '{path}'")));
        }
        let key = (method.to_ascii_uppercase(), path.to_string());
        let mut routes = self.routes.write();
        if routes.contains_key(&key) {
            return Err(RuntimeError::ExecutionError(format!(
                "route {} {} is already registered",
                key.0, key.1
            )));
        }
        debug!(method = %key.0, path = %key.1, "Adding route");
        routes.insert(key, handler);
        Ok(())
    }

    fn remove_route(&self, method: &str, path: &str) -> RuntimeResult<()> {
        let key = (method.to_ascii_uppercase(), path.to_string());
        match self.routes.write().remove(&key) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::ExecutionError(format!(
                "route {} {} is not registered",
                key.0, key.1
            ))),
        }
    }

    fn routes(&self) -> Vec<RouteInfo> {
        self.routes
            .read()
            .keys()
            .map(|(method, path)| RouteInfo {
                method: method.clone(),
                path: path.clone(),
            })
            .collect()
    }
}

/// Filesystem access confined to a root directory.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    root: PathBuf,
}

impl LocalFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: clean_path(&root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a plugin-supplied path under the root. Absolute paths and paths
    /// that climb out of the root are refused.
    fn resolve(&self, path: &str) -> RuntimeResult<PathBuf> {
        let relative = Path::new(path);
        if relative.is_absolute() {
            return Err(RuntimeError::InvalidPath(format!(
                "absolute path '{path}' is not allowed"
            )));
        }
        let resolved = clean_path(&self.root.join(relative));
        if !resolved.starts_with(&self.root) {
            return Err(RuntimeError::InvalidPath(format!(
                "path '{path}' escapes the plugin root"
            )));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn read(&self, path: &str) -> RuntimeResult<Vec<u8>> {
        let resolved = self.resolve(path)?;
        Ok(tokio::fs::read(resolved).await?)
    }

    async fn write(&self, path: &str, contents: &[u8]) -> RuntimeResult<()> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(resolved, contents).await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(resolved) => tokio::fs::try_exists(resolved).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn list(&self, dir: &str) -> RuntimeResult<Vec<String>> {
        let resolved = self.resolve(dir)?;
        let mut entries = tokio::fs::read_dir(resolved).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

/// Outbound HTTP through `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpNetwork {
    client: reqwest::Client,
}

impl HttpNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(
        &self,
        mut request: reqwest::RequestBuilder,
        headers: HashMap<String, String>,
    ) -> RuntimeResult<HttpResponse> {
        for (key, value) in headers {
            request = request.header(&key, &value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RuntimeError::ExecutionError(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| RuntimeError::ExecutionError(format!("Failed to read response: {}", e)))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn http_get(
        &self,
        url: &str,
        headers: HashMap<String, String>,
    ) -> RuntimeResult<HttpResponse> {
        self.send(self.client.get(url), headers).await
    }

    async fn http_post(
        &self,
        url: &str,
        headers: HashMap<String, String>,
        body: &str,
    ) -> RuntimeResult<HttpResponse> {
        self.send(self.client.post(url).body(body.to_string()), headers)
            .await
    }
}
