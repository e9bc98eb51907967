//! Error types for the neofn runtime
//!
//! Two families live here:
//!
//! - [`Error`]: host-side failures of the library API itself (malformed
//!   source, malformed request envelopes, result encoding).
//! - [`Failure`] / [`FailureKind`]: the normalized outcome of a guest
//!   invocation that did not succeed. These never escape as panics; the
//!   engine returns them inside an `ExecutionResult`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// neofn runtime error types
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Guest source could not be tokenized or parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A JSON request envelope or context document was malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A report or result could not be encoded
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Source line a parse error points at, read from its trailing `at <line>:<column>`
    pub fn source_line(&self) -> Option<usize> {
        match self {
            Error::ParseError(message) => {
                let (_, position) = message.rsplit_once(" at ")?;
                let (line, _) = position.split_once(':')?;
                line.parse().ok()
            }
            _ => None,
        }
    }
}

/// Result type alias for neofn operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a failed invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Guest source failed to parse, or its module body failed while loading
    LoadError,
    /// Entry point missing from the namespace or not invocable
    EntryPointError,
    /// The entry point raised during its own logic
    GuestRuntimeError,
    /// A capability operation could not complete
    CapabilityError,
    /// The return value has no JSON representation
    SerializationError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::LoadError => "LoadError",
            FailureKind::EntryPointError => "EntryPointError",
            FailureKind::GuestRuntimeError => "GuestRuntimeError",
            FailureKind::CapabilityError => "CapabilityError",
            FailureKind::SerializationError => "SerializationError",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured invocation failure.
///
/// `trace` lists guest frames outermost-first, innermost-last, each
/// formatted as `line <n>, in <function>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default)]
    pub trace: Vec<String>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Failure {
            kind,
            message: message.into(),
            trace: Vec::new(),
        }
    }

    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.trace = trace;
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Failure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ParseError("unexpected token at 1:5".into());
        assert_eq!(err.to_string(), "Parse error: unexpected token at 1:5");
        let err = Error::InvalidRequest("missing field `source`".into());
        assert!(err.to_string().starts_with("Invalid request"));
    }

    #[test]
    fn test_source_line() {
        let err = Error::ParseError("Expected ':', found newline at 12:15".into());
        assert_eq!(err.source_line(), Some(12));
        let err = Error::ParseError("Unterminated string starting at 3:1".into());
        assert_eq!(err.source_line(), Some(3));
        assert_eq!(Error::ParseError("no position".into()).source_line(), None);
        assert_eq!(Error::InvalidRequest("at 1:1".into()).source_line(), None);
    }

    #[test]
    fn test_failure_display_includes_kind() {
        let failure = Failure::new(FailureKind::EntryPointError, "entry point 'x' is not defined");
        assert_eq!(
            failure.to_string(),
            "EntryPointError: entry point 'x' is not defined"
        );
    }

    #[test]
    fn test_failure_kind_serializes_by_name() {
        let json = serde_json::to_value(FailureKind::CapabilityError).unwrap();
        assert_eq!(json, serde_json::json!("CapabilityError"));
        let failure = Failure::new(FailureKind::LoadError, "bad").with_trace(vec!["line 1, in <module>".into()]);
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "LoadError");
        assert_eq!(json["trace"][0], "line 1, in <module>");
    }
}
