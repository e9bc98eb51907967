//! Capability bundle - the only outside world guest code can reach
//!
//! Guest code sees a single `neo_service` handle with five fixed groups:
//!
//! ```text
//! neo_service
//!   .storage     get(key) set(key, value) delete(key)
//!   .secrets     get(name)
//!   .blockchain  invoke_read(script_hash, operation, args) invoke_write(...)
//!   .price_feed  get_price(symbol, base_currency) get_price_history(symbol, base_currency, period)
//!   .events      register(contract_hash, event_name, callback) unregister(subscription_id)
//! ```
//!
//! The set of groups and operations is closed: [`CapabilityGroup`] and
//! [`CapabilityOp`] enumerate it, and nothing else resolves. Storage and
//! Secrets borrow the invocation's [`Context`]; the remaining groups
//! delegate to pluggable service clients.

pub mod blockchain;
pub mod events;
pub mod price_feed;
pub mod secrets;
pub mod storage;

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::value::{CallArgs, Value};
use crate::Context;

pub use blockchain::{BlockchainCapability, BlockchainClient, SimulatedBlockchain};
pub use events::{EventRegistry, EventsCapability, InMemoryEventRegistry, Subscription};
pub use price_feed::{Period, PriceFeedCapability, PriceFeedClient, PricePoint, SimulatedPriceFeed};
pub use secrets::SecretsCapability;
pub use storage::StorageCapability;

// ── Registry ──────────────────────────────────────────────

/// The five capability groups reachable from `neo_service`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityGroup {
    Storage,
    Secrets,
    Blockchain,
    PriceFeed,
    Events,
}

impl CapabilityGroup {
    pub const ALL: [Self; 5] = [
        Self::Storage,
        Self::Secrets,
        Self::Blockchain,
        Self::PriceFeed,
        Self::Events,
    ];

    /// Attribute name on `neo_service`
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Secrets => "secrets",
            Self::Blockchain => "blockchain",
            Self::PriceFeed => "price_feed",
            Self::Events => "events",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|g| g.name() == name)
    }

    /// Resolve an operation of this group by its guest-visible name
    #[must_use]
    pub fn operation(self, name: &str) -> Option<CapabilityOp> {
        CapabilityOp::ALL
            .iter()
            .copied()
            .find(|op| op.group() == self && op.name() == name)
    }

    pub fn operations(self) -> impl Iterator<Item = CapabilityOp> {
        CapabilityOp::ALL.into_iter().filter(move |op| op.group() == self)
    }
}

/// Every operation a guest can invoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityOp {
    StorageGet,
    StorageSet,
    StorageDelete,
    SecretsGet,
    BlockchainInvokeRead,
    BlockchainInvokeWrite,
    PriceFeedGetPrice,
    PriceFeedGetPriceHistory,
    EventsRegister,
    EventsUnregister,
}

impl CapabilityOp {
    pub const ALL: [Self; 10] = [
        Self::StorageGet,
        Self::StorageSet,
        Self::StorageDelete,
        Self::SecretsGet,
        Self::BlockchainInvokeRead,
        Self::BlockchainInvokeWrite,
        Self::PriceFeedGetPrice,
        Self::PriceFeedGetPriceHistory,
        Self::EventsRegister,
        Self::EventsUnregister,
    ];

    #[must_use]
    pub fn group(self) -> CapabilityGroup {
        match self {
            Self::StorageGet | Self::StorageSet | Self::StorageDelete => CapabilityGroup::Storage,
            Self::SecretsGet => CapabilityGroup::Secrets,
            Self::BlockchainInvokeRead | Self::BlockchainInvokeWrite => CapabilityGroup::Blockchain,
            Self::PriceFeedGetPrice | Self::PriceFeedGetPriceHistory => CapabilityGroup::PriceFeed,
            Self::EventsRegister | Self::EventsUnregister => CapabilityGroup::Events,
        }
    }

    /// Method name within the group
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::StorageGet | Self::SecretsGet => "get",
            Self::StorageSet => "set",
            Self::StorageDelete => "delete",
            Self::BlockchainInvokeRead => "invoke_read",
            Self::BlockchainInvokeWrite => "invoke_write",
            Self::PriceFeedGetPrice => "get_price",
            Self::PriceFeedGetPriceHistory => "get_price_history",
            Self::EventsRegister => "register",
            Self::EventsUnregister => "unregister",
        }
    }

    /// `group.operation`, used in error messages and logs
    #[must_use]
    pub fn qualified_name(self) -> &'static str {
        match self {
            Self::StorageGet => "storage.get",
            Self::StorageSet => "storage.set",
            Self::StorageDelete => "storage.delete",
            Self::SecretsGet => "secrets.get",
            Self::BlockchainInvokeRead => "blockchain.invoke_read",
            Self::BlockchainInvokeWrite => "blockchain.invoke_write",
            Self::PriceFeedGetPrice => "price_feed.get_price",
            Self::PriceFeedGetPriceHistory => "price_feed.get_price_history",
            Self::EventsRegister => "events.register",
            Self::EventsUnregister => "events.unregister",
        }
    }

    /// Parameter names, in positional order
    #[must_use]
    pub fn params(self) -> &'static [&'static str] {
        match self {
            Self::StorageGet | Self::StorageDelete => &["key"],
            Self::StorageSet => &["key", "value"],
            Self::SecretsGet => &["name"],
            Self::BlockchainInvokeRead | Self::BlockchainInvokeWrite => {
                &["script_hash", "operation", "args"]
            }
            Self::PriceFeedGetPrice => &["symbol", "base_currency"],
            Self::PriceFeedGetPriceHistory => &["symbol", "base_currency", "period"],
            Self::EventsRegister => &["contract_hash", "event_name", "callback"],
            Self::EventsUnregister => &["subscription_id"],
        }
    }

    /// Number of leading parameters without a default
    #[must_use]
    pub fn required(self) -> usize {
        match self {
            Self::BlockchainInvokeRead | Self::BlockchainInvokeWrite => 2,
            Self::PriceFeedGetPrice | Self::PriceFeedGetPriceHistory => 1,
            other => other.params().len(),
        }
    }
}

// ── Errors ────────────────────────────────────────────────

/// Failure reported by a service client
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("invalid period '{0}': expected <n><m|h|d|w>")]
    InvalidPeriod(String),

    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// A capability operation that could not complete
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapabilityError {
    #[error("{op}: {message}")]
    InvalidArgument { op: &'static str, message: String },

    #[error("{op}: {reason}")]
    NotSerializable { op: &'static str, reason: String },

    #[error("{op}: {source}")]
    Service {
        op: &'static str,
        source: ServiceError,
    },
}

impl CapabilityError {
    pub(crate) fn invalid(op: CapabilityOp, message: impl Into<String>) -> Self {
        CapabilityError::InvalidArgument {
            op: op.qualified_name(),
            message: message.into(),
        }
    }

    pub(crate) fn service(op: CapabilityOp, source: ServiceError) -> Self {
        CapabilityError::Service {
            op: op.qualified_name(),
            source,
        }
    }
}

// ── Argument helpers ──────────────────────────────────────

/// Bound arguments of one capability call, in parameter order
pub(crate) struct BoundArgs {
    op: CapabilityOp,
    slots: Vec<Option<Value>>,
}

impl BoundArgs {
    fn bind(op: CapabilityOp, args: CallArgs) -> Result<Self, CapabilityError> {
        let slots = args
            .bind(op.name(), op.params(), op.required())
            .map_err(|message| CapabilityError::invalid(op, message))?;
        Ok(BoundArgs { op, slots })
    }

    fn take(&mut self, index: usize) -> Option<Value> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// A string argument; `default` applies when it was omitted
    pub(crate) fn string(&mut self, index: usize, default: Option<&str>) -> Result<String, CapabilityError> {
        let name = self.op.params()[index];
        match (self.take(index), default) {
            (Some(Value::Str(s)), _) => Ok(s),
            (None, Some(default)) => Ok(default.to_string()),
            (Some(other), _) => Err(CapabilityError::invalid(
                self.op,
                format!("'{}' must be a string, not '{}'", name, other.type_name()),
            )),
            (None, None) => Err(CapabilityError::invalid(
                self.op,
                format!("missing required argument '{}'", name),
            )),
        }
    }

    /// A raw guest value argument
    pub(crate) fn value(&mut self, index: usize) -> Option<Value> {
        self.take(index)
    }

    /// An argument converted to JSON
    pub(crate) fn json(&mut self, index: usize) -> Result<Option<JsonValue>, CapabilityError> {
        match self.take(index) {
            Some(value) => value.to_json().map(Some).map_err(|reason| {
                CapabilityError::NotSerializable {
                    op: self.op.qualified_name(),
                    reason,
                }
            }),
            None => Ok(None),
        }
    }
}

// ── Bundle ────────────────────────────────────────────────

/// Service clients backing the Blockchain, PriceFeed and Events groups
#[derive(Clone)]
pub struct ServiceClients {
    pub blockchain: Arc<dyn BlockchainClient>,
    pub price_feed: Arc<dyn PriceFeedClient>,
    pub events: Arc<dyn EventRegistry>,
}

impl ServiceClients {
    /// In-process simulations with a fresh event registry
    pub fn simulated() -> Self {
        ServiceClients {
            blockchain: Arc::new(SimulatedBlockchain),
            price_feed: Arc::new(SimulatedPriceFeed),
            events: Arc::new(InMemoryEventRegistry::new()),
        }
    }
}

impl Default for ServiceClients {
    fn default() -> Self {
        Self::simulated()
    }
}

impl std::fmt::Debug for ServiceClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClients").finish_non_exhaustive()
    }
}

/// The complete, fixed capability set for one invocation
pub struct CapabilityBundle<'a> {
    pub storage: StorageCapability<'a>,
    pub secrets: SecretsCapability<'a>,
    pub blockchain: BlockchainCapability<'a>,
    pub price_feed: PriceFeedCapability<'a>,
    pub events: EventsCapability<'a>,
}

impl<'a> CapabilityBundle<'a> {
    /// Build a bundle over `context`. Never fails.
    pub fn build(context: &'a mut Context, services: &'a ServiceClients) -> Self {
        let Context { storage, secrets } = context;
        CapabilityBundle {
            storage: StorageCapability::new(storage),
            secrets: SecretsCapability::new(secrets),
            blockchain: BlockchainCapability::new(services.blockchain.as_ref()),
            price_feed: PriceFeedCapability::new(services.price_feed.as_ref()),
            events: EventsCapability::new(services.events.as_ref()),
        }
    }

    /// Dispatch one guest call to its capability
    pub fn invoke(&mut self, op: CapabilityOp, args: CallArgs) -> Result<Value, CapabilityError> {
        let mut args = BoundArgs::bind(op, args)?;
        tracing::trace!(capability = op.qualified_name(), "capability call");

        match op {
            CapabilityOp::StorageGet => {
                let key = args.string(0, None)?;
                Ok(self.storage.get(&key).map_or(Value::None, Value::from_json))
            }
            CapabilityOp::StorageSet => {
                let key = args.string(0, None)?;
                let value = args.json(1)?.unwrap_or(JsonValue::Null);
                self.storage.set(key, value);
                Ok(Value::Bool(true))
            }
            CapabilityOp::StorageDelete => {
                let key = args.string(0, None)?;
                Ok(Value::Bool(self.storage.delete(&key)))
            }
            CapabilityOp::SecretsGet => {
                let name = args.string(0, None)?;
                Ok(self.secrets.get(&name).map_or(Value::None, Value::from_json))
            }
            CapabilityOp::BlockchainInvokeRead | CapabilityOp::BlockchainInvokeWrite => {
                let script_hash = args.string(0, None)?;
                let operation = args.string(1, None)?;
                let call_args = match args.json(2)? {
                    None | Some(JsonValue::Null) => Vec::new(),
                    Some(JsonValue::Array(items)) => items,
                    Some(other) => {
                        return Err(CapabilityError::invalid(
                            op,
                            format!("'args' must be a list, got {}", json_type(&other)),
                        ))
                    }
                };
                if op == CapabilityOp::BlockchainInvokeRead {
                    let result = self.blockchain.invoke_read(&script_hash, &operation, &call_args)?;
                    Ok(Value::from_json(&result))
                } else {
                    let tx_hash = self.blockchain.invoke_write(&script_hash, &operation, &call_args)?;
                    Ok(Value::Str(tx_hash))
                }
            }
            CapabilityOp::PriceFeedGetPrice => {
                let symbol = args.string(0, None)?;
                let base = args.string(1, Some(price_feed::DEFAULT_BASE_CURRENCY))?;
                let point = self.price_feed.get_price(&symbol, &base)?;
                Ok(point.to_value())
            }
            CapabilityOp::PriceFeedGetPriceHistory => {
                let symbol = args.string(0, None)?;
                let base = args.string(1, Some(price_feed::DEFAULT_BASE_CURRENCY))?;
                let period = args.string(2, Some(price_feed::DEFAULT_PERIOD))?;
                let points = self.price_feed.get_price_history(&symbol, &base, &period)?;
                Ok(Value::new_list(points.iter().map(PricePoint::to_value).collect()))
            }
            CapabilityOp::EventsRegister => {
                let contract_hash = args.string(0, None)?;
                let event_name = args.string(1, None)?;
                let callback = args.value(2);
                let id = self.events.register(&contract_hash, &event_name, callback)?;
                Ok(Value::Str(id))
            }
            CapabilityOp::EventsUnregister => {
                let id = args.string(0, None)?;
                Ok(Value::Bool(self.events.unregister(&id)?))
            }
        }
    }
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(values: Vec<Value>) -> CallArgs {
        CallArgs::positional(values)
    }

    #[test]
    fn test_registry_is_closed() {
        assert_eq!(CapabilityGroup::ALL.len(), 5);
        assert_eq!(CapabilityGroup::from_name("price_feed"), Some(CapabilityGroup::PriceFeed));
        assert_eq!(CapabilityGroup::from_name("filesystem"), None);
        assert_eq!(CapabilityGroup::Secrets.operation("get"), Some(CapabilityOp::SecretsGet));
        assert_eq!(CapabilityGroup::Secrets.operation("set"), None);
        assert_eq!(CapabilityGroup::Secrets.operations().count(), 1);
        let total: usize = CapabilityGroup::ALL.iter().map(|g| g.operations().count()).sum();
        assert_eq!(total, CapabilityOp::ALL.len());
    }

    #[test]
    fn test_qualified_names_match_group_and_name() {
        for op in CapabilityOp::ALL {
            assert_eq!(
                op.qualified_name(),
                format!("{}.{}", op.group().name(), op.name())
            );
            assert!(op.required() <= op.params().len());
        }
    }

    #[test]
    fn test_storage_round_trip_through_bundle() {
        let mut context = Context::default();
        let services = ServiceClients::simulated();
        {
            let mut bundle = CapabilityBundle::build(&mut context, &services);
            let set = bundle
                .invoke(CapabilityOp::StorageSet, args(vec![Value::str("k"), Value::Int(7)]))
                .unwrap();
            assert!(matches!(set, Value::Bool(true)));
            let got = bundle.invoke(CapabilityOp::StorageGet, args(vec![Value::str("k")])).unwrap();
            assert!(matches!(got, Value::Int(7)));
            let missing = bundle.invoke(CapabilityOp::StorageGet, args(vec![Value::str("nope")])).unwrap();
            assert!(matches!(missing, Value::None));
        }
        assert_eq!(context.storage.get("k"), Some(&json!(7)));
    }

    #[test]
    fn test_storage_set_rejects_unserializable_value() {
        let mut context = Context::default();
        let services = ServiceClients::simulated();
        let mut bundle = CapabilityBundle::build(&mut context, &services);
        let err = bundle
            .invoke(
                CapabilityOp::StorageSet,
                args(vec![Value::str("k"), Value::Service]),
            )
            .unwrap_err();
        assert!(matches!(err, CapabilityError::NotSerializable { op: "storage.set", .. }));
    }

    #[test]
    fn test_argument_errors_are_capability_errors() {
        let mut context = Context::default();
        let services = ServiceClients::simulated();
        let mut bundle = CapabilityBundle::build(&mut context, &services);
        let err = bundle.invoke(CapabilityOp::StorageGet, args(vec![])).unwrap_err();
        assert_eq!(err.to_string(), "storage.get: get() missing required argument 'key'");
        let err = bundle
            .invoke(CapabilityOp::SecretsGet, args(vec![Value::Int(1)]))
            .unwrap_err();
        assert_eq!(err.to_string(), "secrets.get: 'name' must be a string, not 'int'");
    }

    #[test]
    fn test_blockchain_args_must_be_list() {
        let mut context = Context::default();
        let services = ServiceClients::simulated();
        let mut bundle = CapabilityBundle::build(&mut context, &services);
        let err = bundle
            .invoke(
                CapabilityOp::BlockchainInvokeRead,
                args(vec![Value::str("0xabc"), Value::str("balanceOf"), Value::Int(3)]),
            )
            .unwrap_err();
        assert!(err.to_string().contains("'args' must be a list"));
        let ok = bundle
            .invoke(
                CapabilityOp::BlockchainInvokeRead,
                args(vec![Value::str("0xabc"), Value::str("balanceOf")]),
            )
            .unwrap();
        assert_eq!(ok.to_json().unwrap(), json!({"result": "simulated-result"}));
    }

    #[test]
    fn test_price_feed_keyword_defaults() {
        let mut context = Context::default();
        let services = ServiceClients::simulated();
        let mut bundle = CapabilityBundle::build(&mut context, &services);
        let history = bundle
            .invoke(
                CapabilityOp::PriceFeedGetPriceHistory,
                CallArgs {
                    positional: vec![Value::str("neo")],
                    keyword: vec![("period".into(), Value::str("1h"))],
                },
            )
            .unwrap();
        let json = history.to_json().unwrap();
        let points = json.as_array().unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[2]["price"], json!(102.0));
    }
}
