//! Human-readable progress output for provisioning operations.
//!
//! Steps write tagged lines to a [`ProgressWriter`]. Each line is a JSON
//! object so log shippers can consume the stream directly. A writer
//! without a sink discards everything, and write failures are ignored:
//! progress output never fails an operation.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::sync::Arc;

/// Which operation produced a progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// Deploy and state changes.
    Deploy,
    /// Destroy.
    Destroying,
    /// Start.
    Starting,
    /// Stop.
    Stopping,
    /// Restart.
    Restarting,
    /// Snapshot and disk updates.
    Updating,
    /// Billing and metrics.
    Billing,
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deploy => write!(f, "deploy"),
            Self::Destroying => write!(f, "destroying"),
            Self::Starting => write!(f, "starting"),
            Self::Stopping => write!(f, "stopping"),
            Self::Restarting => write!(f, "restarting"),
            Self::Updating => write!(f, "updating"),
            Self::Billing => write!(f, "billing"),
        }
    }
}

/// Severity of a progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Normal progress.
    Info,
    /// A failure or rollback notice.
    Error,
}

/// One line of progress output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressLine {
    /// When the line was produced.
    pub timestamp: DateTime<Utc>,
    /// Producing operation.
    pub source: LogSource,
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
}

impl ProgressLine {
    /// Creates a line stamped with the current time.
    #[must_use]
    pub fn new(source: LogSource, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source,
            level,
            message: message.into(),
        }
    }
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Cloneable handle to an optional output sink.
#[derive(Clone, Default)]
pub struct ProgressWriter {
    sink: Option<SharedWriter>,
}

impl ProgressWriter {
    /// Creates a writer over the given sink.
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Some(Arc::new(Mutex::new(Box::new(sink)))),
        }
    }

    /// Creates a writer that discards everything.
    #[must_use]
    pub fn discard() -> Self {
        Self { sink: None }
    }

    /// Returns true if writes go anywhere.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.sink.is_some()
    }

    /// Writes a tagged line.
    pub fn line(&self, source: LogSource, level: LogLevel, message: impl Into<String>) {
        let Some(sink) = &self.sink else {
            return;
        };
        let line = ProgressLine::new(source, level, message);
        let Ok(encoded) = serde_json::to_string(&line) else {
            return;
        };
        let mut sink = sink.lock();
        if writeln!(sink, "{encoded}").is_err() {
            tracing::debug!(source = %source, "progress sink rejected a write");
        }
    }

    /// Writes an info line.
    pub fn info(&self, source: LogSource, message: impl Into<String>) {
        self.line(source, LogLevel::Info, message);
    }

    /// Writes an error line.
    pub fn error(&self, source: LogSource, message: impl Into<String>) {
        self.line(source, LogLevel::Error, message);
    }

    /// Writes raw bytes, used for streaming backend logs.
    pub fn raw(&self, bytes: &[u8]) {
        if let Some(sink) = &self.sink {
            let _ = sink.lock().write_all(bytes);
        }
    }
}

impl fmt::Debug for ProgressWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressWriter")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ProgressBuffer;

    #[test]
    fn test_discard_writer_never_fails() {
        let writer = ProgressWriter::discard();
        assert!(!writer.is_attached());
        writer.info(LogSource::Deploy, "nothing to see");
        writer.error(LogSource::Deploy, "still nothing");
        writer.raw(b"bytes");
    }

    #[test]
    fn test_lines_are_json() {
        let buffer = ProgressBuffer::new();
        let writer = buffer.writer();

        writer.info(LogSource::Starting, "starting machine web");
        writer.error(LogSource::Starting, "boom");

        let lines = buffer.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].source, LogSource::Starting);
        assert_eq!(lines[0].level, LogLevel::Info);
        assert_eq!(lines[0].message, "starting machine web");
        assert_eq!(lines[1].level, LogLevel::Error);
    }

    #[test]
    fn test_failing_sink_is_ignored() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("closed"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let writer = ProgressWriter::new(Broken);
        writer.info(LogSource::Updating, "ignored");
        writer.raw(b"ignored");
    }

    #[test]
    fn test_source_display() {
        assert_eq!(LogSource::Destroying.to_string(), "destroying");
        assert_eq!(LogSource::Billing.to_string(), "billing");
    }
}
