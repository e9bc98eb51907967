//! neofn Core - capability-scoped function runtime
//!
//! Runs one untrusted guest function per invocation. The guest sees a
//! single `neo_service` handle, its `params`, and a diagnostic `print`.
//! Nothing else from the host is reachable.
//!
//! # Architecture
//!
//! ```text
//! Context + Params → CapabilityBundle { storage, secrets, blockchain,
//!                                       price_feed, events }
//!                          ↓
//! Guest source → Parser → AST → Interpreter (namespace: neo_service,
//!                                            params, print)
//!                          ↓
//!                  ExecutionResult = Success(json) | Failure { kind,
//!                                                   message, trace }
//! ```
//!
//! # Example
//!
//! ```
//! use neofn_core::{execute_function, BufferedSink, Context, ExecutionResult};
//! use serde_json::json;
//!
//! let source = "def handler(p):\n    return p['x'] + 1\n";
//! let mut context = Context::new();
//! let result = execute_function(source, "handler", &json!({"x": 41}), &mut context, &BufferedSink::new());
//! assert_eq!(result, ExecutionResult::Success { result: json!(42) });
//! ```
//!
//! # Guarantees
//!
//! - **Scoped**: capabilities close over the invocation's own `Context`
//! - **Structured**: every failure is a classified `Failure`, never a panic
//! - **Bounded**: guest recursion and parser nesting are limited

pub mod capabilities;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod parser;
pub mod value;

pub use capabilities::{CapabilityBundle, CapabilityError, CapabilityGroup, CapabilityOp, ServiceClients};
pub use config::EngineConfig;
pub use context::Context;
pub use diagnostics::{BufferedSink, DiagnosticSink, StderrSink, TracingSink};
pub use engine::{
    execute_function, execute_json, try_execute_json, ExecutionEngine, ExecutionReport, ExecutionRequest,
    ExecutionResult,
};
pub use error::{Error, Failure, FailureKind, Result};
