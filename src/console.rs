//! Plain-line console output for verbose publishing runs.
//!
//! Lines handed to a sink are already scrubbed of credentials; sinks only decide where
//! the text goes.

use std::sync::{Arc, Mutex};

/// Receives one human-readable line per call.
pub trait ConsoleSink: Send + Sync {
    fn println(&self, line: &str);
}

/// Forwards lines to `tracing` at info level. Default sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ConsoleSink for TracingSink {
    fn println(&self, line: &str) {
        tracing::info!(target: "smb_publish::console", "{line}");
    }
}

/// Writes lines straight to stdout, for the CLI's `--verbose` mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl ConsoleSink for StdoutSink {
    fn println(&self, line: &str) {
        println!("{line}");
    }
}

/// Keeps every line in memory. Cloning shares the same buffer.
#[derive(Debug, Default, Clone)]
pub struct BufferSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl ConsoleSink for BufferSink {
    fn println(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.to_string());
    }
}
