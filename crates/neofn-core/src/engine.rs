//! Execution engine
//!
//! Runs one guest function against one [`Context`]:
//!
//! ```text
//! source ─► parse ─► namespace { neo_service, params, print } ─► load module
//!                                                                   │
//!            ExecutionResult ◄─ to JSON ◄─ call entry point(params) ◄┘
//! ```
//!
//! The engine holds no per-invocation state. Service clients are shared
//! behind `Arc`, so one engine can serve many threads as long as each
//! brings its own `Context`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::capabilities::blockchain::{BlockchainClient, SimulatedBlockchain};
use crate::capabilities::events::{EventRegistry, InMemoryEventRegistry};
use crate::capabilities::price_feed::{PriceFeedClient, SimulatedPriceFeed};
use crate::capabilities::{CapabilityBundle, ServiceClients};
use crate::config::EngineConfig;
use crate::context::Context;
use crate::diagnostics::DiagnosticSink;
use crate::error::{Error, Failure, FailureKind, Result};
use crate::interpreter::{Interpreter, MODULE_FRAME};
use crate::parser::parse_module;
use crate::value::{Builtin, CallArgs, Value};

/// Name of the capability handle in the guest namespace
pub const SERVICE_BINDING: &str = "neo_service";
/// Name of the caller parameters in the guest namespace
pub const PARAMS_BINDING: &str = "params";
/// Name of the diagnostic output function in the guest namespace
pub const PRINT_BINDING: &str = "print";

/// Stack reserved for the thread that walks guest code.
///
/// Guest recursion is bounded by `max_call_depth`, but each guest call
/// costs several host frames; the default thread stack is too small for
/// the default depth.
pub const GUEST_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Outcome of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExecutionResult {
    Success { result: JsonValue },
    Failure(Failure),
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    pub fn value(&self) -> Option<&JsonValue> {
        match self {
            ExecutionResult::Success { result } => Some(result),
            ExecutionResult::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            ExecutionResult::Success { .. } => None,
            ExecutionResult::Failure(failure) => Some(failure),
        }
    }

    pub fn into_result(self) -> std::result::Result<JsonValue, Failure> {
        match self {
            ExecutionResult::Success { result } => Ok(result),
            ExecutionResult::Failure(failure) => Err(failure),
        }
    }
}

impl From<Failure> for ExecutionResult {
    fn from(failure: Failure) -> Self {
        ExecutionResult::Failure(failure)
    }
}

fn empty_params() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

/// A complete invocation, as accepted by the JSON envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub source: String,
    pub entry_point: String,
    #[serde(default = "empty_params")]
    pub params: JsonValue,
    #[serde(default)]
    pub context: Context,
}

impl ExecutionRequest {
    pub fn new(source: impl Into<String>, entry_point: impl Into<String>) -> Self {
        ExecutionRequest {
            source: source.into(),
            entry_point: entry_point.into(),
            params: empty_params(),
            context: Context::default(),
        }
    }

    pub fn with_params(mut self, params: JsonValue) -> Self {
        self.params = params;
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::InvalidRequest(e.to_string()))
    }
}

/// An [`ExecutionResult`] with invocation metadata and the storage it left
/// behind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: ExecutionResult,
    pub storage: BTreeMap<String, JsonValue>,
}

impl ExecutionReport {
    /// A report for a request that never reached the engine
    pub fn rejected(failure: Failure) -> Self {
        ExecutionReport {
            execution_id: Uuid::new_v4(),
            duration_ms: 0,
            outcome: ExecutionResult::Failure(failure),
            storage: BTreeMap::new(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::SerializationError(e.to_string()))
    }
}

/// Runs guest functions against pluggable service clients
#[derive(Clone)]
pub struct ExecutionEngine {
    blockchain: Arc<dyn BlockchainClient>,
    price_feed: Arc<dyn PriceFeedClient>,
    /// `None` gives every invocation its own in-memory registry
    event_registry: Option<Arc<dyn EventRegistry>>,
    config: EngineConfig,
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("config", &self.config)
            .field("shared_event_registry", &self.event_registry.is_some())
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    /// Engine backed by the in-process simulations
    pub fn new() -> Self {
        ExecutionEngine {
            blockchain: Arc::new(SimulatedBlockchain),
            price_feed: Arc::new(SimulatedPriceFeed),
            event_registry: None,
            config: EngineConfig::default(),
        }
    }

    pub fn with_blockchain(mut self, client: Arc<dyn BlockchainClient>) -> Self {
        self.blockchain = client;
        self
    }

    pub fn with_price_feed(mut self, client: Arc<dyn PriceFeedClient>) -> Self {
        self.price_feed = client;
        self
    }

    /// Share one registry across invocations
    pub fn with_event_registry(mut self, registry: Arc<dyn EventRegistry>) -> Self {
        self.event_registry = Some(registry);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run `entry_point` from `source` with `params`.
    ///
    /// Storage writes made by the guest are applied to `context` whether
    /// or not the invocation succeeds. Guest `print` output goes to `sink`.
    pub fn execute(
        &self,
        source: &str,
        entry_point: &str,
        params: &JsonValue,
        context: &mut Context,
        sink: &dyn DiagnosticSink,
    ) -> ExecutionResult {
        let started = Instant::now();
        tracing::debug!(entry_point, source_bytes = source.len(), "invocation started");

        let result = self.execute_on_guest_thread(source, entry_point, params, context, sink);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            ExecutionResult::Success { .. } => {
                tracing::debug!(entry_point, elapsed_ms, "invocation succeeded");
            }
            ExecutionResult::Failure(failure) => {
                tracing::debug!(
                    entry_point,
                    elapsed_ms,
                    kind = %failure.kind,
                    message = %failure.message,
                    trace = ?failure.trace,
                    "invocation failed"
                );
            }
        }
        result
    }

    /// Run a whole request and report on it
    pub fn execute_request(&self, request: ExecutionRequest, sink: &dyn DiagnosticSink) -> ExecutionReport {
        let execution_id = Uuid::new_v4();
        let started = Instant::now();
        let ExecutionRequest {
            source,
            entry_point,
            params,
            mut context,
        } = request;

        let outcome = self.execute(&source, &entry_point, &params, &mut context, sink);

        ExecutionReport {
            execution_id,
            duration_ms: started.elapsed().as_millis() as u64,
            outcome,
            storage: context.storage,
        }
    }

    fn execute_on_guest_thread(
        &self,
        source: &str,
        entry_point: &str,
        params: &JsonValue,
        context: &mut Context,
        sink: &dyn DiagnosticSink,
    ) -> ExecutionResult {
        std::thread::scope(|scope| {
            let spawned = std::thread::Builder::new()
                .name("neofn-guest".into())
                .stack_size(GUEST_STACK_SIZE)
                .spawn_scoped(scope, || self.run(source, entry_point, params, context, sink));

            match spawned {
                Ok(handle) => handle.join().unwrap_or_else(|_| {
                    Failure::new(
                        FailureKind::GuestRuntimeError,
                        "guest execution aborted by an internal interpreter fault",
                    )
                    .into()
                }),
                Err(e) => Failure::new(
                    FailureKind::LoadError,
                    format!("could not start guest thread: {}", e),
                )
                .into(),
            }
        })
    }

    fn run(
        &self,
        source: &str,
        entry_point: &str,
        params: &JsonValue,
        context: &mut Context,
        sink: &dyn DiagnosticSink,
    ) -> ExecutionResult {
        let module = match parse_module(source) {
            Ok(module) => module,
            Err(e) => {
                let trace = e
                    .source_line()
                    .map(|line| vec![format!("line {}, in {}", line, MODULE_FRAME)])
                    .unwrap_or_default();
                return Failure::new(FailureKind::LoadError, e.to_string()).with_trace(trace).into();
            }
        };
        tracing::debug!(statements = module.body.len(), "guest module parsed");

        let services = ServiceClients {
            blockchain: Arc::clone(&self.blockchain),
            price_feed: Arc::clone(&self.price_feed),
            events: match &self.event_registry {
                Some(registry) => Arc::clone(registry),
                None => Arc::new(InMemoryEventRegistry::new()),
            },
        };
        let bundle = CapabilityBundle::build(context, &services);
        let mut interpreter = Interpreter::new(bundle, sink, self.config.max_call_depth);

        let params = Value::from_json(params);
        interpreter.define(SERVICE_BINDING, Value::Service);
        interpreter.define(PARAMS_BINDING, params.clone());
        interpreter.define(PRINT_BINDING, Value::Builtin(Builtin::Print));

        if let Err(failure) = interpreter.load(&module) {
            return failure.into();
        }
        tracing::debug!("guest module loaded");

        let entry = match resolve_entry_point(&interpreter, entry_point) {
            Ok(entry) => entry,
            Err(failure) => return failure.into(),
        };

        let returned = match interpreter.call(&entry, CallArgs::positional(vec![params])) {
            Ok(value) => value,
            Err(failure) => return failure.into(),
        };

        match returned.to_json() {
            Ok(result) => ExecutionResult::Success { result },
            Err(reason) => Failure::new(
                FailureKind::SerializationError,
                format!("return value of '{}' is not JSON serializable: {}", entry_point, reason),
            )
            .into(),
        }
    }
}

/// The entry point must be a guest `def` able to take exactly one
/// positional argument
fn resolve_entry_point(interpreter: &Interpreter<'_>, name: &str) -> std::result::Result<Value, Failure> {
    let value = interpreter.global(name).ok_or_else(|| {
        Failure::new(
            FailureKind::EntryPointError,
            format!("entry point '{}' is not defined", name),
        )
    })?;

    let function = match value {
        Value::Function(function) => function,
        other => {
            return Err(Failure::new(
                FailureKind::EntryPointError,
                format!(
                    "entry point '{}' is not a guest function (found '{}')",
                    name,
                    other.type_name()
                ),
            ))
        }
    };

    let def = &function.def;
    if def.params.is_empty() || def.required_params() > 1 {
        return Err(Failure::new(
            FailureKind::EntryPointError,
            format!(
                "entry point '{}' must accept exactly one positional argument (defined with {})",
                name,
                def.params.len()
            ),
        ));
    }

    Ok(value.clone())
}

/// Run `entry_point` once with the default engine
pub fn execute_function(
    source: &str,
    entry_point: &str,
    params: &JsonValue,
    context: &mut Context,
    sink: &dyn DiagnosticSink,
) -> ExecutionResult {
    ExecutionEngine::new().execute(source, entry_point, params, context, sink)
}

/// Run a serialized [`ExecutionRequest`] and return the serialized
/// [`ExecutionReport`]. Guest output goes to `tracing`.
pub fn try_execute_json(request_json: &str) -> Result<String> {
    let request = ExecutionRequest::from_json(request_json)?;
    ExecutionEngine::new()
        .execute_request(request, &crate::diagnostics::TracingSink)
        .to_json()
}

/// Like [`try_execute_json`], but a malformed request comes back as a
/// `LoadError` report instead of an `Err`.
pub fn execute_json(request_json: &str) -> String {
    let report = match ExecutionRequest::from_json(request_json) {
        Ok(request) => ExecutionEngine::new().execute_request(request, &crate::diagnostics::TracingSink),
        Err(e) => ExecutionReport::rejected(Failure::new(FailureKind::LoadError, e.to_string())),
    };
    report.to_json().unwrap_or_else(|e| {
        serde_json::json!({
            "status": "failure",
            "kind": FailureKind::SerializationError.as_str(),
            "message": e.to_string(),
            "trace": [],
        })
        .to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::BufferedSink;
    use serde_json::json;

    fn run(source: &str, entry_point: &str, params: JsonValue) -> ExecutionResult {
        let mut context = Context::new();
        execute_function(source, entry_point, &params, &mut context, &BufferedSink::new())
    }

    fn kind_of(result: &ExecutionResult) -> FailureKind {
        result.failure().map(|f| f.kind).expect("expected a failure")
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ExecutionEngine>();
    }

    #[test]
    fn test_simple_handler() {
        let result = run("def handler(p):\n    return p['x'] + 1\n", "handler", json!({"x": 41}));
        assert_eq!(result, ExecutionResult::Success { result: json!(42) });
    }

    #[test]
    fn test_parse_error_is_load_error() {
        let result = run("def handler(p)\n    return 1\n", "handler", json!({}));
        assert_eq!(kind_of(&result), FailureKind::LoadError);
    }

    #[test]
    fn test_parse_error_trace_names_the_line() {
        let result = run("x = 1\n\ndef handler(p):\n    return (1 +\n", "handler", json!({}));
        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::LoadError);
        assert_eq!(failure.trace.len(), 1);
        assert!(failure.trace[0].ends_with(", in <module>"));
        assert!(failure.trace[0].starts_with("line "));

        let result = run("def handler(p):\n    return 'open\n", "handler", json!({}));
        assert_eq!(result.failure().unwrap().trace, vec!["line 2, in <module>"]);
    }

    #[test]
    fn test_missing_entry_point() {
        let result = run("def other(p):\n    return 1\n", "handler", json!({}));
        let failure = result.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::EntryPointError);
        assert!(failure.message.contains("'handler' is not defined"));
    }

    #[test]
    fn test_non_function_entry_point() {
        let result = run("handler = 5\n", "handler", json!({}));
        assert_eq!(kind_of(&result), FailureKind::EntryPointError);
        // Built-ins are not guest-defined
        let result = run("", "print", json!({}));
        assert_eq!(kind_of(&result), FailureKind::EntryPointError);
    }

    #[test]
    fn test_entry_point_signature() {
        for source in [
            "def handler():\n    return 1\n",
            "def handler(a, b):\n    return 1\n",
        ] {
            let result = run(source, "handler", json!({}));
            assert_eq!(kind_of(&result), FailureKind::EntryPointError, "{}", source);
        }
        let result = run("def handler(a, b=2):\n    return b\n", "handler", json!({}));
        assert_eq!(result.value(), Some(&json!(2)));
    }

    #[test]
    fn test_params_binding_is_the_argument() {
        let source = "def handler(p):\n    p['seen'] = True\n    return params['seen']\n";
        let result = run(source, "handler", json!({}));
        assert_eq!(result.value(), Some(&json!(true)));
    }

    #[test]
    fn test_unserializable_return() {
        let result = run("def handler(p):\n    return handler\n", "handler", json!({}));
        assert_eq!(kind_of(&result), FailureKind::SerializationError);
    }

    #[test]
    fn test_storage_writes_survive_failure() {
        let source = "def handler(p):\n    neo_service.storage.set('k', 1)\n    raise 'boom'\n";
        let mut context = Context::new();
        let result = execute_function(source, "handler", &json!({}), &mut context, &BufferedSink::new());
        assert_eq!(kind_of(&result), FailureKind::GuestRuntimeError);
        assert_eq!(context.storage.get("k"), Some(&json!(1)));
    }

    #[test]
    fn test_deep_recursion_within_default_depth() {
        let source = "def down(n):\n    if n == 0:\n        return 0\n    return down(n - 1) + 1\n\ndef handler(p):\n    return down(p)\n";
        let result = run(source, "handler", json!(100));
        assert_eq!(result.value(), Some(&json!(100)));
        let result = run(source, "handler", json!(10_000));
        assert_eq!(kind_of(&result), FailureKind::GuestRuntimeError);
    }

    #[test]
    fn test_shared_event_registry() {
        let registry = Arc::new(InMemoryEventRegistry::new());
        let engine = ExecutionEngine::new().with_event_registry(registry.clone());
        let source = "def cb(e):\n    pass\n\ndef handler(p):\n    return neo_service.events.register('0xabc', 'Transfer', cb)\n";
        let mut context = Context::new();
        let result = engine.execute(source, "handler", &json!({}), &mut context, &BufferedSink::new());
        let id = result.value().and_then(|v| v.as_str()).unwrap().to_string();
        let subscriptions = registry.subscriptions();
        assert_eq!(subscriptions[&id].callback, "cb");
    }

    #[test]
    fn test_result_serialization_shape() {
        let ok = ExecutionResult::Success { result: json!([1]) };
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"status": "success", "result": [1]}));

        let failed: ExecutionResult = Failure::new(FailureKind::CapabilityError, "nope").into();
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["kind"], "CapabilityError");
        assert_eq!(json["trace"], json!([]));
    }

    #[test]
    fn test_request_defaults() {
        let request = ExecutionRequest::from_json(r#"{"source": "", "entry_point": "h"}"#).unwrap();
        assert_eq!(request.params, json!({}));
        assert_eq!(request.context, Context::default());
        assert!(matches!(
            ExecutionRequest::from_json("{"),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_execute_json_envelope() {
        let request = json!({
            "source": "def handler(p):\n    neo_service.storage.set('n', p['n'])\n    return p['n'] * 2\n",
            "entry_point": "handler",
            "params": {"n": 21},
        });
        let out: JsonValue = serde_json::from_str(&execute_json(&request.to_string())).unwrap();
        assert_eq!(out["status"], "success");
        assert_eq!(out["result"], 42);
        assert_eq!(out["storage"], json!({"n": 21}));
        assert!(Uuid::parse_str(out["execution_id"].as_str().unwrap()).is_ok());

        let report: ExecutionReport = serde_json::from_value(out).unwrap();
        assert!(report.outcome.is_success());
    }

    #[test]
    fn test_execute_json_malformed_request() {
        let out: JsonValue = serde_json::from_str(&execute_json("not json")).unwrap();
        assert_eq!(out["status"], "failure");
        assert_eq!(out["kind"], "LoadError");
        assert!(try_execute_json("not json").is_err());
    }
}
