//! Capturing progress sink.

use crate::progress::{LogLevel, ProgressLine, ProgressWriter};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

/// An in-memory sink that decodes the progress lines written to it.
#[derive(Debug, Clone, Default)]
pub struct ProgressBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

struct Sink(Arc<Mutex<Vec<u8>>>);

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ProgressBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a writer appending to this buffer.
    #[must_use]
    pub fn writer(&self) -> ProgressWriter {
        ProgressWriter::new(Sink(Arc::clone(&self.bytes)))
    }

    /// Returns everything written, as text.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }

    /// Returns the structured lines written; raw output is skipped.
    #[must_use]
    pub fn lines(&self) -> Vec<ProgressLine> {
        self.contents()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Returns the messages of the lines written, in order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.lines().into_iter().map(|line| line.message).collect()
    }

    /// Returns the messages of error lines only.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.level == LogLevel::Error)
            .map(|line| line.message)
            .collect()
    }
}
