//! Publish/subscribe between plugins.

use crate::hooks::panic_message;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifies one subscription.
pub type SubscriptionId = Uuid;

/// An event handler.
pub type EventHandler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// An event flowing through the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    /// Publishing plugin; `None` for host-originated events.
    pub source: Option<String>,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            source: None,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A subscriber that failed to handle an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub subscription: SubscriptionId,
    pub plugin: String,
    pub message: String,
}

/// Outcome of one publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failures: Vec<DeliveryFailure>,
}

impl PublishReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    plugin: String,
    handler: EventHandler,
}

/// Counters for the bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventBusStats {
    pub events_published: u64,
    pub events_delivered: u64,
    pub delivery_failures: u64,
}

/// Event bus for plugin communication.
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<HashMap<String, Vec<Subscription>>>,
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `plugin` to events named `event`.
    pub fn subscribe(&self, plugin: &str, event: &str, handler: EventHandler) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.subscriptions
            .write()
            .entry(event.to_string())
            .or_default()
            .push(Subscription {
                id,
                plugin: plugin.to_string(),
                handler,
            });
        debug!(plugin, event, %id, "Subscribed to event");
        id
    }

    /// Remove one subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.remove_where(|sub| sub.id == id) > 0
    }

    /// Remove a subscription only if `plugin` owns it.
    pub fn unsubscribe_owned(&self, plugin: &str, id: SubscriptionId) -> bool {
        self.remove_where(|sub| sub.id == id && sub.plugin == plugin) > 0
    }

    /// Remove every subscription owned by `plugin`.
    pub fn unsubscribe_all(&self, plugin: &str) -> usize {
        let removed = self.remove_where(|sub| sub.plugin == plugin);
        if removed > 0 {
            debug!(plugin, removed, "Removed all event subscriptions");
        }
        removed
    }

    fn remove_where(&self, pred: impl Fn(&Subscription) -> bool) -> usize {
        let mut subscriptions = self.subscriptions.write();
        let mut removed = 0;
        for subs in subscriptions.values_mut() {
            let before = subs.len();
            subs.retain(|sub| !pred(sub));
            removed += before - subs.len();
        }
        subscriptions.retain(|_, subs| !subs.is_empty());
        removed
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.subscriptions.read().get(event).map_or(0, Vec::len)
    }

    /// Deliver `event` to every current subscriber, in subscription order.
    ///
    /// A failing or panicking subscriber is recorded in the report and does
    /// not prevent delivery to the others.
    pub fn publish(&self, event: &Event) -> PublishReport {
        self.published.fetch_add(1, Ordering::Relaxed);

        let snapshot: Vec<Subscription> = self
            .subscriptions
            .read()
            .get(&event.name)
            .cloned()
            .unwrap_or_default();

        let mut report = PublishReport::default();
        for sub in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (sub.handler)(event)));
            let message = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(payload) => panic_message(payload.as_ref()),
            };

            warn!(
                event = %event.name,
                plugin = %sub.plugin,
                "Event handler failed: {}",
                message
            );
            report.failures.push(DeliveryFailure {
                subscription: sub.id,
                plugin: sub.plugin,
                message,
            });
        }

        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.failed
            .fetch_add(report.failures.len() as u64, Ordering::Relaxed);
        report
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            events_published: self.published.load(Ordering::Relaxed),
            events_delivered: self.delivered.load(Ordering::Relaxed),
            delivery_failures: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn collector(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> EventHandler {
        let log = Arc::clone(log);
        Arc::new(move |event: &Event| {
            log.lock().push(format!("{tag}:{}", event.payload));
            Ok(())
        })
    }

    #[test]
    fn test_publish_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe("a", "user.created", collector(&log, "a"));
        bus.subscribe("b", "user.created", collector(&log, "b"));
        bus.subscribe("c", "user.deleted", collector(&log, "c"));

        let report = bus.publish(&Event::new("user.created", json!(1)).with_source("auth"));
        assert!(report.is_ok());
        assert_eq!(report.delivered, 2);
        assert_eq!(*log.lock(), vec!["a:1", "b:1"]);
    }

    #[test]
    fn test_failing_subscriber_is_isolated() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe("bad", "tick", Arc::new(|_: &Event| anyhow::bail!("nope")));
        bus.subscribe("worse", "tick", Arc::new(|_: &Event| panic!("kaboom")));
        bus.subscribe("good", "tick", collector(&log, "good"));

        let report = bus.publish(&Event::new("tick", json!(null)));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].plugin, "bad");
        assert!(report.failures[1].message.contains("kaboom"));
        assert_eq!(*log.lock(), vec!["good:null"]);

        let stats = bus.stats();
        assert_eq!(stats.events_published, 1);
        assert_eq!(stats.delivery_failures, 2);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let id = bus.subscribe("a", "e", collector(&log, "a"));
        bus.subscribe("a", "f", collector(&log, "a"));
        bus.subscribe("b", "e", collector(&log, "b"));
        assert_eq!(bus.subscriber_count("e"), 2);

        assert!(!bus.unsubscribe_owned("b", id));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count("e"), 1);

        assert_eq!(bus.unsubscribe_all("a"), 1);
        assert_eq!(bus.subscriber_count("f"), 0);
        assert_eq!(bus.unsubscribe_all("b"), 1);
        assert_eq!(bus.subscriber_count("e"), 0);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        let report = bus.publish(&Event::new("nobody.listens", json!({})));
        assert_eq!(report, PublishReport::default());
    }
}
