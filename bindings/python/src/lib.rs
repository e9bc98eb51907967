//! Python bindings for neofn
//!
//! Thin wrapper around `neofn-core`. All behavior comes from the Rust
//! runtime; guest `print` output is routed to `tracing`.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use neofn_core::{Context, ExecutionEngine, ExecutionResult, TracingSink};

/// Run a guest function and return its result as JSON.
///
/// Args:
///     source: guest source text
///     entry_point: name of the function to call
///     params_json: JSON passed to the entry point
///     context_json: optional `{"storage": {...}, "secrets": {...}}`
///
/// Returns:
///     JSON string of the entry point's return value
///
/// Raises:
///     ValueError: if the inputs are malformed or the invocation fails.
///         The message is `<Kind>: <message>`.
#[pyfunction]
#[pyo3(signature = (source, entry_point, params_json, context_json=None))]
fn execute(
    py: Python<'_>,
    source: &str,
    entry_point: &str,
    params_json: &str,
    context_json: Option<&str>,
) -> PyResult<String> {
    let params: serde_json::Value = serde_json::from_str(params_json)
        .map_err(|e| PyValueError::new_err(format!("params_json is not valid JSON: {}", e)))?;
    let mut context = match context_json {
        Some(text) => Context::from_json(text).map_err(|e| PyValueError::new_err(e.to_string()))?,
        None => Context::default(),
    };

    let outcome = py.allow_threads(|| {
        ExecutionEngine::new().execute(source, entry_point, &params, &mut context, &TracingSink)
    });

    match outcome {
        ExecutionResult::Success { result } => Ok(result.to_string()),
        ExecutionResult::Failure(failure) => Err(PyValueError::new_err(failure.to_string())),
    }
}

/// Run a serialized execution request.
///
/// Args:
///     request_json: `{"source", "entry_point", "params", "context"}`
///
/// Returns:
///     JSON execution report with `status`, `result` or failure fields,
///     and the resulting `storage`. Malformed requests come back as a
///     `LoadError` report rather than an exception.
#[pyfunction]
fn execute_json(py: Python<'_>, request_json: &str) -> String {
    py.allow_threads(|| neofn_core::execute_json(request_json))
}

/// neofn Python module - capability-scoped function runtime
#[pymodule]
fn neofn(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(execute, m)?)?;
    m.add_function(wrap_pyfunction!(execute_json, m)?)?;
    Ok(())
}
