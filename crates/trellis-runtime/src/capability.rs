//! Capability-based security model for plugins.
//!
//! Every plugin holds a [`CapabilitySet`]. Absence of an explicit grant is a
//! denial. The [`PermissionChecker`] owns all sets and is consulted before any
//! sensitive host service is handed to a plugin.

use crate::error::{RuntimeError, RuntimeResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

/// Log target for security audit entries.
pub const SECURITY_TARGET: &str = "trellis::security";

/// A capability that a plugin can hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// SQL storage access.
    Database,

    /// Shared cache access.
    Cache,

    /// Host configuration access.
    Config,

    /// Route and middleware registration.
    Router,

    /// Filesystem access.
    Filesystem,

    /// Outbound network access.
    Network,

    /// Spawning subprocesses.
    Exec,

    /// Custom capability for extension.
    Custom(String),
}

impl Capability {
    /// The fixed capabilities, in declaration order.
    pub const STANDARD: [Capability; 7] = [
        Capability::Database,
        Capability::Cache,
        Capability::Config,
        Capability::Router,
        Capability::Filesystem,
        Capability::Network,
        Capability::Exec,
    ];

    /// Parse a capability from a string.
    pub fn parse(s: &str) -> Self {
        match s {
            "database" => Capability::Database,
            "cache" => Capability::Cache,
            "config" => Capability::Config,
            "router" => Capability::Router,
            "filesystem" => Capability::Filesystem,
            "network" => Capability::Network,
            "exec" => Capability::Exec,
            other => Capability::Custom(other.to_string()),
        }
    }

    /// Convert capability to string representation.
    pub fn as_str(&self) -> &str {
        match self {
            Capability::Database => "database",
            Capability::Cache => "cache",
            Capability::Config => "config",
            Capability::Router => "router",
            Capability::Filesystem => "filesystem",
            Capability::Network => "network",
            Capability::Exec => "exec",
            Capability::Custom(s) => s,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The capabilities held by one plugin. Everything defaults to denied.
///
/// Serializes as the manifest's `permissions` block:
///
/// ```yaml
/// permissions:
///   database: true
///   network: false
///   custom:
///     metrics.write: true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitySet {
    pub database: bool,
    pub cache: bool,
    pub config: bool,
    pub router: bool,
    pub filesystem: bool,
    pub network: bool,
    pub exec: bool,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, bool>,
}

impl CapabilitySet {
    /// Create an empty (all-denied) capability set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a capability set granting every listed capability.
    pub fn from_strings<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        strings
            .into_iter()
            .map(|s| Capability::parse(s.as_ref()))
            .collect()
    }

    /// Set a capability flag.
    pub fn set(&mut self, cap: &Capability, allowed: bool) {
        match cap {
            Capability::Database => self.database = allowed,
            Capability::Cache => self.cache = allowed,
            Capability::Config => self.config = allowed,
            Capability::Router => self.router = allowed,
            Capability::Filesystem => self.filesystem = allowed,
            Capability::Network => self.network = allowed,
            Capability::Exec => self.exec = allowed,
            Capability::Custom(name) => {
                if allowed {
                    self.custom.insert(name.clone(), true);
                } else {
                    self.custom.remove(name);
                }
            }
        }
    }

    /// Grant a capability.
    pub fn add(&mut self, cap: Capability) {
        self.set(&cap, true);
    }

    /// Check if the set grants a capability.
    pub fn has(&self, cap: &Capability) -> bool {
        match cap {
            Capability::Database => self.database,
            Capability::Cache => self.cache,
            Capability::Config => self.config,
            Capability::Router => self.router,
            Capability::Filesystem => self.filesystem,
            Capability::Network => self.network,
            Capability::Exec => self.exec,
            Capability::Custom(name) => self.custom.get(name).copied().unwrap_or(false),
        }
    }

    /// Check if this set grants everything `other` grants.
    pub fn contains_all(&self, other: &CapabilitySet) -> bool {
        other.iter().all(|cap| self.has(&cap))
    }

    /// All granted capabilities, standard ones first.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        let mut custom: Vec<&String> = self
            .custom
            .iter()
            .filter(|(_, allowed)| **allowed)
            .map(|(name, _)| name)
            .collect();
        custom.sort();

        Capability::STANDARD
            .into_iter()
            .filter(|cap| self.has(cap))
            .chain(custom.into_iter().map(|n| Capability::Custom(n.clone())))
    }

    /// Get the number of granted capabilities.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Check if nothing is granted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        let mut set = Self::new();
        for cap in iter {
            set.add(cap);
        }
        set
    }
}

/// Per-plugin capability sets, shared by every context the host hands out.
#[derive(Debug, Default)]
pub struct PermissionChecker {
    sets: RwLock<HashMap<String, CapabilitySet>>,
}

impl PermissionChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a plugin's capability set with a copy of `set`.
    pub fn set_permissions(&self, plugin: &str, set: &CapabilitySet) {
        debug!(plugin, capabilities = set.len(), "Assigning permissions");
        self.sets.write().insert(plugin.to_string(), set.clone());
    }

    /// A copy of a plugin's capability set.
    pub fn get_permissions(&self, plugin: &str) -> Option<CapabilitySet> {
        self.sets.read().get(plugin).cloned()
    }

    /// Grant a capability. Creates an empty set for unknown plugins first.
    pub fn grant_permission(&self, plugin: &str, cap: &Capability) {
        let mut sets = self.sets.write();
        sets.entry(plugin.to_string()).or_default().set(cap, true);
        debug!(plugin, capability = %cap, "Granted permission");
    }

    /// Revoke a capability. Unknown plugins are left untouched.
    pub fn revoke_permission(&self, plugin: &str, cap: &Capability) {
        if let Some(set) = self.sets.write().get_mut(plugin) {
            set.set(cap, false);
            debug!(plugin, capability = %cap, "Revoked permission");
        }
    }

    /// Check a capability, logging an audit entry on denial.
    pub fn check_permission(&self, plugin: &str, cap: &Capability) -> RuntimeResult<()> {
        let sets = self.sets.read();
        let Some(set) = sets.get(plugin) else {
            warn!(
                target: SECURITY_TARGET,
                plugin,
                capability = %cap,
                "Capability check for plugin with no permissions assigned"
            );
            return Err(RuntimeError::NoPermissions(plugin.to_string()));
        };

        if set.has(cap) {
            Ok(())
        } else {
            warn!(
                target: SECURITY_TARGET,
                plugin,
                capability = %cap,
                "Permission denied"
            );
            Err(RuntimeError::PermissionDenied {
                plugin: plugin.to_string(),
                capability: cap.as_str().to_string(),
            })
        }
    }

    /// Non-logging form of [`check_permission`](Self::check_permission).
    pub fn has_permission(&self, plugin: &str, cap: &Capability) -> bool {
        self.sets
            .read()
            .get(plugin)
            .map(|set| set.has(cap))
            .unwrap_or(false)
    }

    /// Drop a plugin's set entirely.
    pub fn remove_plugin(&self, plugin: &str) -> Option<CapabilitySet> {
        self.sets.write().remove(plugin)
    }

    pub fn is_registered(&self, plugin: &str) -> bool {
        self.sets.read().contains_key(plugin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_parse_roundtrip() {
        for cap in Capability::STANDARD {
            assert_eq!(Capability::parse(cap.as_str()), cap);
        }
        assert_eq!(
            Capability::parse("metrics.write"),
            Capability::Custom("metrics.write".into())
        );
    }

    #[test]
    fn test_default_set_denies_everything() {
        let set = CapabilitySet::new();
        assert!(set.is_empty());
        for cap in Capability::STANDARD {
            assert!(!set.has(&cap));
        }
        assert!(!set.has(&Capability::Custom("anything".into())));
    }

    #[test]
    fn test_from_strings() {
        let set = CapabilitySet::from_strings(["network", "cache", "audit"]);
        assert!(set.network);
        assert!(set.cache);
        assert!(set.has(&Capability::Custom("audit".into())));
        assert_eq!(set.len(), 3);

        let iterated: Vec<Capability> = set.iter().collect();
        assert_eq!(
            iterated,
            vec![
                Capability::Cache,
                Capability::Network,
                Capability::Custom("audit".into())
            ]
        );
    }

    #[test]
    fn test_contains_all() {
        let wide = CapabilitySet::from_strings(["network", "cache", "database"]);
        let narrow = CapabilitySet::from_strings(["network"]);
        assert!(wide.contains_all(&narrow));
        assert!(!narrow.contains_all(&wide));
    }

    #[test]
    fn test_check_unregistered_plugin() {
        let checker = PermissionChecker::new();
        let err = checker
            .check_permission("ghost", &Capability::Database)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::NoPermissions(p) if p == "ghost"));
    }

    #[test]
    fn test_grant_and_revoke_are_monotonic() {
        let checker = PermissionChecker::new();
        checker.set_permissions("p", &CapabilitySet::new());

        assert!(checker.check_permission("p", &Capability::Cache).is_err());
        checker.grant_permission("p", &Capability::Cache);
        checker.grant_permission("p", &Capability::Cache);
        assert!(checker.check_permission("p", &Capability::Cache).is_ok());
        assert!(checker.check_permission("p", &Capability::Cache).is_ok());

        checker.revoke_permission("p", &Capability::Network);
        assert!(checker.check_permission("p", &Capability::Cache).is_ok());

        checker.revoke_permission("p", &Capability::Cache);
        let err = checker.check_permission("p", &Capability::Cache).unwrap_err();
        assert!(matches!(err, RuntimeError::PermissionDenied { .. }));
    }

    #[test]
    fn test_custom_capabilities() {
        let checker = PermissionChecker::new();
        let custom = Capability::Custom("billing".into());
        checker.grant_permission("p", &custom);
        assert!(checker.has_permission("p", &custom));
        assert!(!checker.has_permission("p", &Capability::Custom("other".into())));

        checker.revoke_permission("p", &custom);
        assert!(!checker.has_permission("p", &custom));
    }

    #[test]
    fn test_permissions_are_copied() {
        let checker = PermissionChecker::new();
        let mut set = CapabilitySet::from_strings(["database"]);
        checker.set_permissions("p", &set);

        set.database = false;
        assert!(checker.has_permission("p", &Capability::Database));

        let mut copy = checker.get_permissions("p").unwrap();
        copy.network = true;
        assert!(!checker.has_permission("p", &Capability::Network));
    }

    #[test]
    fn test_revoke_unknown_plugin_is_noop() {
        let checker = PermissionChecker::new();
        checker.revoke_permission("ghost", &Capability::Exec);
        assert!(!checker.is_registered("ghost"));
    }

    #[test]
    fn test_remove_plugin() {
        let checker = PermissionChecker::new();
        checker.grant_permission("p", &Capability::Exec);
        assert!(checker.remove_plugin("p").is_some());
        assert!(matches!(
            checker.check_permission("p", &Capability::Exec),
            Err(RuntimeError::NoPermissions(_))
        ));
    }

    #[test]
    fn test_set_deserializes_from_manifest_block() {
        let set: CapabilitySet = serde_json::from_str(
            r#"{"database": true, "network": false, "custom": {"audit": true}}"#,
        )
        .unwrap();
        assert!(set.database);
        assert!(!set.network);
        assert!(!set.cache);
        assert!(set.has(&Capability::Custom("audit".into())));
    }
}
