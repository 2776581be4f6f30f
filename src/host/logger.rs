//! Line Logger
//!
//! Receives every line a child process writes, one call per line.

use std::sync::Arc;

/// Sink for lines read from a child process.
///
/// `info` is called for stdout lines and `error` for stderr lines, in the
/// order they were read from each stream.
pub trait LineLogger: Send + Sync {
    fn info(&self, line: &str);
    fn error(&self, line: &str);
}

/// Forwards child output to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl LineLogger for TracingLogger {
    fn info(&self, line: &str) {
        tracing::info!(target: "process_helpers::stdout", "{}", line);
    }

    fn error(&self, line: &str) {
        tracing::error!(target: "process_helpers::stderr", "{}", line);
    }
}

impl<L: LineLogger + ?Sized> LineLogger for Arc<L> {
    fn info(&self, line: &str) {
        (**self).info(line)
    }

    fn error(&self, line: &str) {
        (**self).error(line)
    }
}
