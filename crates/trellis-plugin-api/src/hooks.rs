//! Priority-ordered hooks.
//!
//! Handlers run synchronously on the caller's thread, lowest priority first.
//! Handlers of equal priority run in registration order.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use trellis_runtime::{HookKind, RuntimeError, RuntimeResult};

/// A hook callback.
pub type HookHandler = Arc<dyn Fn(&mut HookContext) -> anyhow::Result<()> + Send + Sync>;

/// What a failing handler does to the rest of the pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookErrorPolicy {
    /// Stop and return the error to the caller.
    #[default]
    Abort,
    /// Log the error, record it on the context and keep going.
    Continue,
}

/// A handler failure recorded under [`HookErrorPolicy::Continue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFailure {
    pub plugin: String,
    pub message: String,
}

/// State shared by every handler of one pass.
#[derive(Debug, Clone)]
pub struct HookContext {
    kind: HookKind,
    data: HashMap<String, Value>,
    skip: bool,
    cancel: CancellationToken,
    failures: Vec<HookFailure>,
}

impl HookContext {
    pub fn new(kind: HookKind) -> Self {
        Self {
            kind,
            data: HashMap::new(),
            skip: false,
            cancel: CancellationToken::new(),
            failures: Vec::new(),
        }
    }

    /// Use the caller's cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_data(mut self, data: HashMap<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }

    pub fn into_data(self) -> HashMap<String, Value> {
        self.data
    }

    /// Ask that no further handlers run in this pass.
    pub fn skip_remaining(&mut self) {
        self.skip = true;
    }

    pub fn is_skipped(&self) -> bool {
        self.skip
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn failures(&self) -> &[HookFailure] {
        &self.failures
    }
}

/// A registered hook as reported by [`HookSystem::list_hooks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookInfo {
    pub plugin: String,
    pub kind: HookKind,
    pub priority: i32,
}

#[derive(Clone)]
struct HookRegistration {
    plugin: String,
    priority: i32,
    handler: HookHandler,
}

/// Hook registry.
#[derive(Default)]
pub struct HookSystem {
    hooks: RwLock<HashMap<HookKind, Vec<HookRegistration>>>,
    policy: HookErrorPolicy,
}

impl HookSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: HookErrorPolicy) -> Self {
        Self {
            hooks: RwLock::default(),
            policy,
        }
    }

    pub fn policy(&self) -> HookErrorPolicy {
        self.policy
    }

    /// Add a handler. It runs after every handler of lower or equal priority
    /// already registered for `kind`.
    pub fn register_hook(&self, plugin: &str, kind: HookKind, priority: i32, handler: HookHandler) {
        let mut hooks = self.hooks.write();
        let rows = hooks.entry(kind).or_default();
        let at = rows.partition_point(|row| row.priority <= priority);
        rows.insert(
            at,
            HookRegistration {
                plugin: plugin.to_string(),
                priority,
                handler,
            },
        );
        debug!(plugin, hook = %kind, priority, "Registered hook");
    }

    /// Remove a plugin's handlers for one kind.
    pub fn unregister_hook(&self, plugin: &str, kind: HookKind) -> usize {
        let mut hooks = self.hooks.write();
        let Some(rows) = hooks.get_mut(&kind) else {
            return 0;
        };
        let before = rows.len();
        rows.retain(|row| row.plugin != plugin);
        let removed = before - rows.len();
        if removed > 0 {
            debug!(plugin, hook = %kind, removed, "Unregistered hook");
        }
        removed
    }

    /// Remove every handler a plugin registered.
    pub fn unregister_all(&self, plugin: &str) -> usize {
        let mut hooks = self.hooks.write();
        let mut removed = 0;
        for rows in hooks.values_mut() {
            let before = rows.len();
            rows.retain(|row| row.plugin != plugin);
            removed += before - rows.len();
        }
        if removed > 0 {
            debug!(plugin, removed, "Unregistered all hooks");
        }
        removed
    }

    /// Registered handlers for `kind`, in execution order.
    pub fn list_hooks(&self, kind: HookKind) -> Vec<HookInfo> {
        self.hooks
            .read()
            .get(&kind)
            .map(|rows| {
                rows.iter()
                    .map(|row| HookInfo {
                        plugin: row.plugin.clone(),
                        kind,
                        priority: row.priority,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn hook_count(&self, kind: HookKind) -> usize {
        self.hooks.read().get(&kind).map_or(0, Vec::len)
    }

    /// Run every handler for `kind` against `context`.
    ///
    /// Handlers run on a snapshot taken before the first call, so they may
    /// register or unregister hooks themselves. The pass stops when a handler
    /// sets the skip flag, when the context is cancelled (reported as
    /// [`RuntimeError::Cancelled`]) or, under [`HookErrorPolicy::Abort`], at the
    /// first failing handler. Panics count as failures.
    pub fn execute_hooks(&self, kind: HookKind, context: &mut HookContext) -> RuntimeResult<()> {
        let snapshot: Vec<HookRegistration> = self
            .hooks
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        for row in snapshot {
            if context.is_cancelled() {
                return Err(RuntimeError::Cancelled(format!("{kind} hooks")));
            }
            if context.is_skipped() {
                debug!(hook = %kind, plugin = %row.plugin, "Skipping remaining hooks");
                break;
            }

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (row.handler)(context)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{e:#}"),
                Err(payload) => panic_message(payload.as_ref()),
            };

            match self.policy {
                HookErrorPolicy::Abort => {
                    return Err(RuntimeError::HookFailed {
                        plugin: row.plugin,
                        hook: kind.to_string(),
                        message,
                    });
                }
                HookErrorPolicy::Continue => {
                    warn!(hook = %kind, plugin = %row.plugin, "Hook failed: {}", message);
                    context.failures.push(HookFailure {
                        plugin: row.plugin,
                        message,
                    });
                }
            }
        }

        Ok(())
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
