//! Events capability - contract event subscriptions
//!
//! Registering records a subscription and returns its id. Callbacks are
//! recorded by name only: nothing in this crate dispatches events, so a
//! guest callback is never invoked.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::{CapabilityError, CapabilityOp, ServiceError};
use crate::value::Value;

/// A recorded subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub contract_hash: String,
    pub event_name: String,
    /// Name of the guest function given as callback
    pub callback: String,
}

/// Backend that stores event subscriptions
pub trait EventRegistry: Send + Sync {
    /// Record a subscription and return its id
    fn register(&self, subscription: Subscription) -> Result<String, ServiceError>;

    /// Remove a subscription. Returns true iff `subscription_id` was registered.
    fn unregister(&self, subscription_id: &str) -> Result<bool, ServiceError>;
}

/// Process-local registry issuing UUID v4 subscription ids
#[derive(Debug, Default)]
pub struct InMemoryEventRegistry {
    subscriptions: Mutex<BTreeMap<String, Subscription>>,
}

impl InMemoryEventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current subscriptions, keyed by id
    pub fn subscriptions(&self) -> BTreeMap<String, Subscription> {
        self.subscriptions
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl EventRegistry for InMemoryEventRegistry {
    fn register(&self, subscription: Subscription) -> Result<String, ServiceError> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut guard = self
            .subscriptions
            .lock()
            .map_err(|e| ServiceError::Unavailable(format!("event registry lock poisoned: {e}")))?;
        guard.insert(id.clone(), subscription);
        Ok(id)
    }

    fn unregister(&self, subscription_id: &str) -> Result<bool, ServiceError> {
        let mut guard = self
            .subscriptions
            .lock()
            .map_err(|e| ServiceError::Unavailable(format!("event registry lock poisoned: {e}")))?;
        Ok(guard.remove(subscription_id).is_some())
    }
}

pub struct EventsCapability<'a> {
    registry: &'a dyn EventRegistry,
}

impl<'a> EventsCapability<'a> {
    pub fn new(registry: &'a dyn EventRegistry) -> Self {
        EventsCapability { registry }
    }

    /// `callback` must be a guest-defined function
    pub fn register(
        &self,
        contract_hash: &str,
        event_name: &str,
        callback: Option<Value>,
    ) -> Result<String, CapabilityError> {
        let op = CapabilityOp::EventsRegister;
        let callback = match callback {
            Some(Value::Function(func)) => func.name().to_string(),
            Some(other) => {
                return Err(CapabilityError::invalid(
                    op,
                    format!("'callback' must be a function, not '{}'", other.type_name()),
                ))
            }
            None => return Err(CapabilityError::invalid(op, "missing required argument 'callback'")),
        };

        let id = self
            .registry
            .register(Subscription {
                contract_hash: contract_hash.to_string(),
                event_name: event_name.to_string(),
                callback,
            })
            .map_err(|e| CapabilityError::service(op, e))?;
        tracing::debug!(subscription_id = %id, contract_hash, event_name, "event subscription registered");
        Ok(id)
    }

    pub fn unregister(&self, subscription_id: &str) -> Result<bool, CapabilityError> {
        let removed = self
            .registry
            .unregister(subscription_id)
            .map_err(|e| CapabilityError::service(CapabilityOp::EventsUnregister, e))?;
        tracing::debug!(subscription_id, removed, "event subscription unregistered");
        Ok(removed)
    }
}
