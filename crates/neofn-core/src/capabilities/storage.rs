//! Storage capability - key-value access to the invocation's context

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

/// Read/write view over `Context::storage`.
///
/// Mutations land directly in the caller's context and are visible to
/// later calls in the same invocation.
pub struct StorageCapability<'a> {
    entries: &'a mut BTreeMap<String, JsonValue>,
}

impl<'a> StorageCapability<'a> {
    pub fn new(entries: &'a mut BTreeMap<String, JsonValue>) -> Self {
        StorageCapability { entries }
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.entries.get(key)
    }

    /// Store `value` under `key`, overwriting any prior value
    pub fn set(&mut self, key: String, value: JsonValue) {
        tracing::debug!(key = %key, "storage set");
        self.entries.insert(key, value);
    }

    /// Remove `key`. Returns true iff a value existed.
    pub fn delete(&mut self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        tracing::debug!(key = %key, removed, "storage delete");
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
