//! Execution context - the storage and secrets one invocation may touch

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{Error, Result};

/// Per-invocation view of external storage and secrets.
///
/// Both maps default to empty when missing from JSON. The engine borrows
/// the context mutably for one call and hands it back with storage
/// mutations applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default)]
    pub storage: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub secrets: BTreeMap<String, JsonValue>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a context document such as `{"storage": {...}, "secrets": {...}}`
    ///
    /// # Errors
    /// Returns `InvalidRequest` if the text is not a JSON object of that shape.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::InvalidRequest(format!("context: {}", e)))
    }

    pub fn with_storage(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.storage.insert(key.into(), value);
        self
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.secrets.insert(name.into(), value);
        self
    }
}
