//! Request middleware contributed by plugins.

use crate::hooks::panic_message;
use crate::host::RequestContext;
use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::debug;
use trellis_runtime::{RuntimeError, RuntimeResult};

/// A middleware step. Call [`RequestContext::respond`] or
/// [`RequestContext::halt`] to end the chain.
pub type MiddlewareHandler = Arc<dyn Fn(&mut RequestContext) -> anyhow::Result<()> + Send + Sync>;

/// A registered middleware as reported by [`MiddlewareRegistry::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiddlewareInfo {
    pub plugin: String,
    pub name: String,
    pub priority: i32,
}

#[derive(Clone)]
struct MiddlewareEntry {
    plugin: String,
    name: String,
    priority: i32,
    handler: MiddlewareHandler,
}

/// The host's middleware chain, ordered by ascending priority.
#[derive(Default)]
pub struct MiddlewareRegistry {
    chain: RwLock<Vec<MiddlewareEntry>>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware, replacing any the plugin registered under `name`.
    pub fn register(&self, plugin: &str, name: &str, priority: i32, handler: MiddlewareHandler) {
        let mut chain = self.chain.write();
        chain.retain(|m| !(m.plugin == plugin && m.name == name));
        let at = chain.partition_point(|m| m.priority <= priority);
        chain.insert(
            at,
            MiddlewareEntry {
                plugin: plugin.to_string(),
                name: name.to_string(),
                priority,
                handler,
            },
        );
        debug!(plugin, middleware = name, priority, "Registered middleware");
    }

    pub fn unregister(&self, plugin: &str, name: &str) -> bool {
        let mut chain = self.chain.write();
        let before = chain.len();
        chain.retain(|m| !(m.plugin == plugin && m.name == name));
        before != chain.len()
    }

    pub fn unregister_all(&self, plugin: &str) -> usize {
        let mut chain = self.chain.write();
        let before = chain.len();
        chain.retain(|m| m.plugin != plugin);
        before - chain.len()
    }

    pub fn list(&self) -> Vec<MiddlewareInfo> {
        self.chain
            .read()
            .iter()
            .map(|m| MiddlewareInfo {
                plugin: m.plugin.clone(),
                name: m.name.clone(),
                priority: m.priority,
            })
            .collect()
    }

    /// Run the chain until it ends, a step halts it, or a step fails.
    pub fn run(&self, request: &mut RequestContext) -> RuntimeResult<()> {
        let snapshot = self.chain.read().clone();

        for entry in snapshot {
            if request.is_halted() {
                break;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (entry.handler)(request)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{e:#}"),
                Err(payload) => panic_message(payload.as_ref()),
            };
            return Err(RuntimeError::ExecutionError(format!(
                "middleware '{}' of plugin '{}' failed: {}",
                entry.name, entry.plugin, message
            )));
        }
        Ok(())
    }
}
