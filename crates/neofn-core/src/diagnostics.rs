//! Diagnostic sinks - where guest `print` output goes
//!
//! Guest output is a side channel. It never mixes with the invocation
//! result, and each invocation names its own sink.

use std::io::Write;
use std::sync::Mutex;

/// Destination for lines printed by guest code
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, line: &str);
}

/// Writes each line to the process's stderr
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn emit(&self, line: &str) {
        let mut stderr = std::io::stderr().lock();
        // A closed stderr is not the guest's problem
        let _ = writeln!(stderr, "{}", line);
    }
}

/// Emits each line as a `tracing` event on target `neofn::guest`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, line: &str) {
        tracing::info!(target: "neofn::guest", "{}", line);
    }
}

/// Collects lines in memory
#[derive(Debug, Default)]
pub struct BufferedSink {
    lines: Mutex<Vec<String>>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines emitted so far
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

impl DiagnosticSink for BufferedSink {
    fn emit(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

impl<T: DiagnosticSink + ?Sized> DiagnosticSink for &T {
    fn emit(&self, line: &str) {
        (**self).emit(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_sink_collects_in_order() {
        let sink = BufferedSink::new();
        sink.emit("first");
        sink.emit("second");
        assert_eq!(sink.lines(), vec!["first", "second"]);
        sink.clear();
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_sink_through_reference() {
        let sink = BufferedSink::new();
        let by_ref: &dyn DiagnosticSink = &sink;
        (&by_ref).emit("via ref");
        assert_eq!(sink.lines(), vec!["via ref"]);
    }
}
