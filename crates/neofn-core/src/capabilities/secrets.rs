//! Secrets capability - read-only lookup of named secrets

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

/// Read-only view over `Context::secrets`. Guest code cannot create, change
/// or remove a secret.
pub struct SecretsCapability<'a> {
    entries: &'a BTreeMap<String, JsonValue>,
}

impl<'a> SecretsCapability<'a> {
    pub fn new(entries: &'a BTreeMap<String, JsonValue>) -> Self {
        SecretsCapability { entries }
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        // Names only; secret values never reach the log
        tracing::debug!(name = %name, found = self.entries.contains_key(name), "secret lookup");
        self.entries.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_secret() {
        let entries = BTreeMap::from([("api_key".to_string(), json!("s3cr3t"))]);
        let secrets = SecretsCapability::new(&entries);
        assert_eq!(secrets.get("api_key"), Some(&json!("s3cr3t")));
        assert_eq!(secrets.get("other"), None);
    }
}
