//! Metrics recorded by plugins about themselves.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A point-in-time copy of a plugin's metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginMetrics {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Counters and gauges for one plugin. Shared between the plugin's context
/// and the manager, which reads it for status reports.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    metrics: RwLock<PluginMetrics>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &str) {
        self.increment_by(name, 1);
    }

    pub fn increment_by(&self, name: &str, n: u64) {
        let mut metrics = self.metrics.write();
        let counter = metrics.counters.entry(name.to_string()).or_insert(0);
        *counter = counter.saturating_add(n);
        metrics.last_updated = Some(Utc::now());
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        let mut metrics = self.metrics.write();
        metrics.gauges.insert(name.to_string(), value);
        metrics.last_updated = Some(Utc::now());
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.metrics.read().counters.get(name).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.metrics.read().gauges.get(name).copied()
    }

    pub fn snapshot(&self) -> PluginMetrics {
        self.metrics.read().clone()
    }

    pub fn reset(&self) {
        *self.metrics.write() = PluginMetrics::default();
    }
}
