//! Per-plugin key/value storage.
//!
//! Every plugin gets its own store; nothing is shared between plugins.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use trellis_runtime::RuntimeResult;

#[derive(Debug, Default)]
pub struct PluginStorage {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl PluginStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    /// Typed read. Values that do not deserialize into `T` read as `None`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Store a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.write().insert(key.into(), value)
    }

    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> RuntimeResult<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value);
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Option<Value> {
        self.entries.write().remove(key)
    }

    /// Keys, sorted.
    pub fn list(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let n = entries.len();
        entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_storage_operations() {
        let storage = PluginStorage::new();
        assert!(storage.is_empty());

        assert_eq!(storage.set("b", json!(2)), None);
        assert_eq!(storage.set("a", json!(1)), None);
        assert_eq!(storage.set("a", json!(10)), Some(json!(1)));

        assert_eq!(storage.get("a"), Some(json!(10)));
        assert_eq!(storage.list(), vec!["a", "b"]);

        assert_eq!(storage.delete("b"), Some(json!(2)));
        assert_eq!(storage.delete("b"), None);

        assert_eq!(storage.clear(), 1);
        assert_eq!(storage.len(), 0);
    }

    #[test]
    fn test_typed_access() {
        let storage = PluginStorage::new();
        storage.set_as("ids", &vec![1u32, 2, 3]).unwrap();
        assert_eq!(storage.get_as::<Vec<u32>>("ids"), Some(vec![1, 2, 3]));
        assert_eq!(storage.get_as::<String>("ids"), None);
    }
}
