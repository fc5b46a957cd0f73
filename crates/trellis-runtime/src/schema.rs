//! Plugin configuration schemas.
//!
//! A schema lists the fields a plugin accepts. Validation fills in defaults,
//! rejects missing required fields and checks each value against its declared
//! type.

use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

/// Type of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFieldType {
    String,
    Int,
    Float,
    Bool,
    /// A string such as `30s`, `5m` or `1h30m`, or a number of seconds.
    Duration,
    Array,
    Object,
}

impl ConfigFieldType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            "bool" => Some(Self::Bool),
            "duration" => Some(Self::Duration),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Duration => "duration",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Whether `value` is acceptable for this type.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Duration => match value {
                Value::String(s) => parse_duration(s).is_some(),
                Value::Number(n) => n.is_u64(),
                _ => false,
            },
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ConfigFieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field of a configuration schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    #[serde(rename = "type")]
    pub field_type: ConfigFieldType,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default)]
    pub description: String,
}

impl ConfigField {
    pub fn new(field_type: ConfigFieldType) -> Self {
        Self {
            field_type,
            required: false,
            default: None,
            description: String::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// The set of configuration fields a plugin accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSchema {
    fields: BTreeMap<String, ConfigField>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field.
    pub fn field(mut self, name: impl Into<String>, field: ConfigField) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    pub fn fields(&self) -> &BTreeMap<String, ConfigField> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&ConfigField> {
        self.fields.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Values made only of the declared defaults.
    pub fn defaults(&self) -> HashMap<String, Value> {
        self.fields
            .iter()
            .filter_map(|(name, field)| field.default.clone().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Validate `values`, returning them with defaults applied.
    ///
    /// Keys the schema does not declare are passed through untouched.
    pub fn validate(&self, values: &HashMap<String, Value>) -> RuntimeResult<HashMap<String, Value>> {
        let mut resolved = values.clone();

        for (name, field) in &self.fields {
            match resolved.get(name) {
                Some(Value::Null) | None => {
                    if let Some(default) = &field.default {
                        resolved.insert(name.clone(), default.clone());
                    } else if field.required {
                        return Err(RuntimeError::InvalidConfig(format!(
                            "missing required field '{name}'"
                        )));
                    } else {
                        resolved.remove(name);
                    }
                }
                Some(value) => {
                    if !field.field_type.accepts(value) {
                        return Err(RuntimeError::InvalidConfig(format!(
                            "field '{name}' must be of type {}, got {value}",
                            field.field_type
                        )));
                    }
                }
            }
        }

        Ok(resolved)
    }
}

/// Parse a duration such as `250ms`, `30s`, `5m`, `2h` or `1h30m`.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        let amount: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.checked_mul(60)?),
            "h" => Duration::from_secs(amount.checked_mul(3600)?),
            _ => return None,
        };
        total = total.checked_add(part)?;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ConfigSchema {
        ConfigSchema::new()
            .field("endpoint", ConfigField::new(ConfigFieldType::String).required())
            .field(
                "retries",
                ConfigField::new(ConfigFieldType::Int).with_default(json!(3)),
            )
            .field("timeout", ConfigField::new(ConfigFieldType::Duration))
            .field("tags", ConfigField::new(ConfigFieldType::Array))
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("ten seconds"), None);
        assert_eq!(parse_duration("5d"), None);
    }

    #[test]
    fn test_defaults_applied() {
        let values = HashMap::from([("endpoint".to_string(), json!("https://x"))]);
        let resolved = schema().validate(&values).unwrap();
        assert_eq!(resolved["retries"], json!(3));
        assert_eq!(resolved["endpoint"], json!("https://x"));
        assert!(!resolved.contains_key("timeout"));
    }

    #[test]
    fn test_missing_required_field() {
        let err = schema().validate(&HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn test_type_mismatch() {
        let values = HashMap::from([
            ("endpoint".to_string(), json!("https://x")),
            ("retries".to_string(), json!("three")),
        ]);
        assert!(schema().validate(&values).is_err());

        let values = HashMap::from([
            ("endpoint".to_string(), json!("https://x")),
            ("timeout".to_string(), json!("soon")),
        ]);
        assert!(schema().validate(&values).is_err());
    }

    #[test]
    fn test_type_acceptance() {
        assert!(ConfigFieldType::Float.accepts(&json!(1)));
        assert!(ConfigFieldType::Float.accepts(&json!(1.5)));
        assert!(!ConfigFieldType::Int.accepts(&json!(1.5)));
        assert!(ConfigFieldType::Duration.accepts(&json!(30)));
        assert!(ConfigFieldType::Duration.accepts(&json!("2m")));
        assert!(ConfigFieldType::Object.accepts(&json!({"a": 1})));
        assert!(!ConfigFieldType::Bool.accepts(&json!("true")));
    }

    #[test]
    fn test_unknown_keys_pass_through() {
        let values = HashMap::from([
            ("endpoint".to_string(), json!("https://x")),
            ("extra".to_string(), json!(true)),
        ]);
        let resolved = schema().validate(&values).unwrap();
        assert_eq!(resolved["extra"], json!(true));
    }
}
