//! Plugin manifest parsing.
//!
//! Each plugin directory carries a `manifest.yaml` (or `.yml` / `.json`) that
//! describes its metadata, dependencies, permissions, configuration schema,
//! hooks, events and exported services.

use crate::capability::CapabilitySet;
use crate::error::{RuntimeError, RuntimeResult};
use crate::graph::Dependency;
use crate::schema::{ConfigField, ConfigFieldType, ConfigSchema};
use crate::version::{Version, VersionConstraint};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// File names probed, in order, when a plugin directory is scanned.
pub const MANIFEST_FILE_NAMES: [&str; 3] = ["manifest.yaml", "manifest.yml", "manifest.json"];

/// A host extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Startup,
    Shutdown,
    PreRequest,
    PostRequest,
    PreResponse,
    PostResponse,
    Error,
}

impl HookKind {
    pub const ALL: [HookKind; 7] = [
        HookKind::Startup,
        HookKind::Shutdown,
        HookKind::PreRequest,
        HookKind::PostRequest,
        HookKind::PreResponse,
        HookKind::PostResponse,
        HookKind::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HookKind::Startup => "startup",
            HookKind::Shutdown => "shutdown",
            HookKind::PreRequest => "pre_request",
            HookKind::PostRequest => "post_request",
            HookKind::PreResponse => "pre_response",
            HookKind::PostResponse => "post_response",
            HookKind::Error => "error",
        }
    }
}

impl FromStr for HookKind {
    type Err = RuntimeError;

    /// Accepts both `pre_request` and `pre-request` spellings.
    fn from_str(s: &str) -> RuntimeResult<Self> {
        let normalized = s.trim().replace('-', "_");
        HookKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| RuntimeError::InvalidManifest(format!("unknown hook type '{s}'")))
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Plugin manifest structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Unique plugin name.
    #[serde(default)]
    pub name: String,

    /// Version string, `major.minor` or `major.minor.patch`.
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: String,

    /// Host framework requirement.
    #[serde(default)]
    pub framework: Option<FrameworkRequirement>,

    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    /// Requested capabilities.
    #[serde(default)]
    pub permissions: CapabilitySet,

    /// Configuration fields the plugin accepts.
    #[serde(default)]
    pub config: BTreeMap<String, ConfigFieldSpec>,

    #[serde(default)]
    pub hooks: Vec<HookDeclaration>,

    #[serde(default)]
    pub events: EventDeclarations,

    #[serde(default)]
    pub exports: Vec<ExportDeclaration>,

    /// Executable for process-based plugins, relative to the plugin directory.
    #[serde(default)]
    pub entry_point: Option<String>,
}

/// Host version the plugin was built against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameworkRequirement {
    /// Version constraint on the host, e.g. `>=0.1.0`.
    #[serde(default)]
    pub version: String,
}

/// A configuration field as written in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFieldSpec {
    #[serde(rename = "type")]
    pub field_type: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default)]
    pub description: String,
}

/// A hook the plugin intends to register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDeclaration {
    #[serde(rename = "type")]
    pub hook_type: String,

    #[serde(default)]
    pub priority: i32,
}

/// Events the plugin publishes and listens to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventDeclarations {
    #[serde(default)]
    pub publishes: Vec<String>,

    #[serde(default)]
    pub subscribes: Vec<String>,
}

/// A service the plugin exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDeclaration {
    pub name: String,

    #[serde(default)]
    pub description: String,
}

impl PluginManifest {
    /// Load a manifest, choosing the format from the file extension.
    pub fn from_file(path: &Path) -> RuntimeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Err(RuntimeError::InvalidManifest(format!(
                "unsupported manifest format: {}",
                path.display()
            ))),
        }
    }

    /// Parse a manifest from a YAML string.
    pub fn from_yaml(content: &str) -> RuntimeResult<Self> {
        let manifest: PluginManifest = serde_yaml::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse a manifest from a JSON string.
    pub fn from_json(content: &str) -> RuntimeResult<Self> {
        let manifest: PluginManifest = serde_json::from_str(content)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Validate the manifest.
    pub fn validate(&self) -> RuntimeResult<()> {
        let invalid = |msg: String| Err(RuntimeError::InvalidManifest(msg));

        if self.name.is_empty() {
            return invalid("Plugin name cannot be empty".to_string());
        }
        if !is_valid_name(&self.name) {
            return invalid(format!(
                "Plugin name '{}' may only contain letters, digits, '-' and '_'",
                self.name
            ));
        }
        if self.version.is_empty() {
            return invalid("Plugin version cannot be empty".to_string());
        }
        if Version::parse(&self.version).is_err() {
            return invalid(format!(
                "Plugin version '{}' must be MAJOR.MINOR or MAJOR.MINOR.PATCH, \
                 optionally followed by -prerelease or +build",
                self.version
            ));
        }
        if self.description.trim().is_empty() {
            return invalid("Plugin description cannot be empty".to_string());
        }
        if self.author.trim().is_empty() {
            return invalid("Plugin author cannot be empty".to_string());
        }

        if let Some(framework) = &self.framework {
            VersionConstraint::parse(&framework.version)?;
        }

        for dep in &self.dependencies {
            if dep.name.is_empty() {
                return invalid("Dependency name cannot be empty".to_string());
            }
            VersionConstraint::parse(&dep.constraint)?;
        }

        for hook in &self.hooks {
            hook.hook_type.parse::<HookKind>()?;
        }

        for (name, spec) in &self.config {
            let Some(field_type) = ConfigFieldType::parse(&spec.field_type) else {
                return invalid(format!(
                    "Config field '{name}' has unknown type '{}'",
                    spec.field_type
                ));
            };
            if let Some(default) = &spec.default {
                if !field_type.accepts(default) {
                    return invalid(format!(
                        "Config field '{name}' default does not match type {field_type}"
                    ));
                }
            }
        }

        let mut seen = HashSet::new();
        for export in &self.exports {
            if export.name.is_empty() {
                return invalid("Export name cannot be empty".to_string());
            }
            if !seen.insert(export.name.as_str()) {
                return invalid(format!("Export '{}' is declared twice", export.name));
            }
        }

        Ok(())
    }

    /// Get the capability set requested by this plugin.
    pub fn capability_set(&self) -> CapabilitySet {
        self.permissions.clone()
    }

    /// Typed configuration schema.
    pub fn config_schema(&self) -> RuntimeResult<ConfigSchema> {
        self.config
            .iter()
            .try_fold(ConfigSchema::new(), |schema, (name, spec)| {
                let field_type = ConfigFieldType::parse(&spec.field_type).ok_or_else(|| {
                    RuntimeError::InvalidManifest(format!(
                        "Config field '{name}' has unknown type '{}'",
                        spec.field_type
                    ))
                })?;
                let field = ConfigField {
                    field_type,
                    required: spec.required,
                    default: spec.default.clone(),
                    description: spec.description.clone(),
                };
                Ok(schema.field(name.clone(), field))
            })
    }

    /// Declared hooks with parsed kinds.
    pub fn hook_kinds(&self) -> RuntimeResult<Vec<(HookKind, i32)>> {
        self.hooks
            .iter()
            .map(|h| Ok((h.hook_type.parse::<HookKind>()?, h.priority)))
            .collect()
    }

    /// Whether the host version satisfies the manifest's framework constraint.
    pub fn is_compatible_with(&self, host_version: &str) -> bool {
        let Some(framework) = &self.framework else {
            return true;
        };
        let Ok(constraint) = VersionConstraint::parse(&framework.version) else {
            return false;
        };
        constraint.is_any()
            || Version::parse(host_version)
                .map(|v| constraint.matches(&v))
                .unwrap_or(false)
    }

    /// Whether the plugin runs as an external process.
    pub fn is_process_plugin(&self) -> bool {
        self.entry_point.is_some()
    }
}

fn is_valid_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_MANIFEST: &str = r#"
name: auth-gateway
version: 1.4.0
description: Token validation for incoming requests
author: Platform Team
framework:
  version: ">=0.1.0"
dependencies:
  - name: session-store
    version: ">=1.0.0,<2.0.0"
  - name: audit-log
    optional: true
permissions:
  database: true
  cache: true
  custom:
    audit.write: true
config:
  issuer:
    type: string
    required: true
    description: Expected token issuer
  leeway:
    type: duration
    default: 30s
hooks:
  - type: pre_request
    priority: 10
  - type: error
events:
  publishes: [auth.denied]
  subscribes: [session.expired]
exports:
  - name: token-validator
    description: Validates bearer tokens
"#;

    #[test]
    fn test_parse_yaml_manifest() {
        let manifest = PluginManifest::from_yaml(FULL_MANIFEST).unwrap();
        assert_eq!(manifest.name, "auth-gateway");
        assert_eq!(manifest.dependencies.len(), 2);
        assert!(!manifest.dependencies[0].optional);
        assert!(manifest.dependencies[1].optional);
        assert_eq!(manifest.dependencies[1].constraint, "");

        let caps = manifest.capability_set();
        assert!(caps.database && caps.cache && !caps.network);

        let hooks = manifest.hook_kinds().unwrap();
        assert_eq!(hooks, vec![(HookKind::PreRequest, 10), (HookKind::Error, 0)]);

        let schema = manifest.config_schema().unwrap();
        assert!(schema.get("issuer").unwrap().required);
        assert_eq!(
            schema.get("leeway").unwrap().field_type,
            ConfigFieldType::Duration
        );

        assert_eq!(manifest.events.publishes, vec!["auth.denied"]);
        assert_eq!(manifest.exports[0].name, "token-validator");
        assert!(!manifest.is_process_plugin());
    }

    #[test]
    fn test_parse_json_manifest() {
        let json = r#"{
            "name": "echo",
            "version": "0.2",
            "description": "Echo",
            "author": "Ops",
            "entry_point": "bin/echo"
        }"#;
        let manifest = PluginManifest::from_json(json).unwrap();
        assert_eq!(manifest.version, "0.2");
        assert!(manifest.is_process_plugin());
        assert!(manifest.permissions.is_empty());
    }

    fn minimal(name: &str, version: &str) -> String {
        format!("name: \"{name}\"\nversion: \"{version}\"\ndescription: d\nauthor: a\n")
    }

    #[test]
    fn test_name_rules() {
        assert!(PluginManifest::from_yaml(&minimal("ok_name-2", "1.0")).is_ok());
        assert!(PluginManifest::from_yaml(&minimal("", "1.0")).is_err());
        assert!(PluginManifest::from_yaml(&minimal("bad name", "1.0")).is_err());
        assert!(PluginManifest::from_yaml(&minimal("dots.not.allowed", "1.0")).is_err());
    }

    #[test]
    fn test_version_rules() {
        assert!(PluginManifest::from_yaml(&minimal("p", "1.0")).is_ok());
        assert!(PluginManifest::from_yaml(&minimal("p", "1.2.3-beta")).is_ok());
        assert!(PluginManifest::from_yaml(&minimal("p", "1")).is_err());
        assert!(PluginManifest::from_yaml(&minimal("p", "1.x")).is_err());
        assert!(PluginManifest::from_yaml(&minimal("p", "")).is_err());
        assert!(PluginManifest::from_yaml(&minimal("p", "1.2.3-")).is_err());

        let err = PluginManifest::from_yaml(&minimal("p", "1.2.3.4")).unwrap_err();
        assert!(err.to_string().contains("MAJOR.MINOR.PATCH"));
    }

    #[test]
    fn test_required_metadata() {
        let missing_author = "name: p\nversion: \"1.0\"\ndescription: d\n";
        assert!(PluginManifest::from_yaml(missing_author).is_err());

        let missing_description = "name: p\nversion: \"1.0\"\nauthor: a\n";
        assert!(PluginManifest::from_yaml(missing_description).is_err());
    }

    #[test]
    fn test_unknown_hook_type_rejected() {
        let yaml = format!("{}hooks:\n  - type: on_boot\n", minimal("p", "1.0"));
        let err = PluginManifest::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("on_boot"));
    }

    #[test]
    fn test_unknown_config_type_rejected() {
        let yaml = format!(
            "{}config:\n  size:\n    type: decimal\n",
            minimal("p", "1.0")
        );
        assert!(PluginManifest::from_yaml(&yaml).is_err());

        let bad_default = format!(
            "{}config:\n  size:\n    type: int\n    default: big\n",
            minimal("p", "1.0")
        );
        assert!(PluginManifest::from_yaml(&bad_default).is_err());
    }

    #[test]
    fn test_bad_dependency_constraint_rejected() {
        let yaml = format!(
            "{}dependencies:\n  - name: base\n    version: \">=one\"\n",
            minimal("p", "1.0")
        );
        assert!(PluginManifest::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_duplicate_exports_rejected() {
        let yaml = format!(
            "{}exports:\n  - name: svc\n  - name: svc\n",
            minimal("p", "1.0")
        );
        assert!(PluginManifest::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_hook_kind_spellings() {
        assert_eq!("pre-request".parse::<HookKind>().unwrap(), HookKind::PreRequest);
        assert_eq!("post_response".parse::<HookKind>().unwrap(), HookKind::PostResponse);
        assert!("startup ".parse::<HookKind>().is_ok());
        assert!("boot".parse::<HookKind>().is_err());
    }

    #[test]
    fn test_framework_compatibility() {
        let manifest = PluginManifest::from_yaml(FULL_MANIFEST).unwrap();
        assert!(manifest.is_compatible_with("0.1.0"));
        assert!(manifest.is_compatible_with("1.0.0"));
        assert!(!manifest.is_compatible_with("0.0.9"));

        let unconstrained = PluginManifest::from_yaml(&minimal("p", "1.0")).unwrap();
        assert!(unconstrained.is_compatible_with("0.0.1"));
    }
}
