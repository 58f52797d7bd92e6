//! Non-fatal decode conditions and the sink they are reported to.

use std::sync::{Arc, Mutex, PoisonError};

/// A condition the decoder recovers from by skipping data.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Warning {
    #[error("Unknown sub-record type {tag} ({size} bytes), skipped")]
    UnknownRecordType { tag: u32, size: usize },

    #[error("Unknown command {command} at tick {tick} ({size} bytes), skipped")]
    UnknownCommand { command: u32, tick: u32, size: u32 },

    #[error("Failed to decompress command {command} at tick {tick}: {message}")]
    DecompressionFailure {
        command: u32,
        tick: u32,
        message: String,
    },

    #[error("Failed to decode record {tag}: {message}")]
    RecordDecodeFailure { tag: u32, message: String },

    #[error("Update for string table {0} which was never created, skipped")]
    UnknownStringTable(u32),

    #[error("Payload interpreter for table {table:?} failed on entry {index}: {message}")]
    InterpreterFailure {
        table: String,
        index: u32,
        message: String,
    },

    #[error("Stream ended without a stop command")]
    MissingStop,
}

/// Receives warnings from the decoder.
pub trait DiagnosticSink: Send {
    fn warn(&self, warning: &Warning);
}

/// Forwards every warning to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn warn(&self, warning: &Warning) {
        log::warn!("{warning}");
    }
}

/// Keeps every warning in memory, shared with whoever holds a clone.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    warnings: Arc<Mutex<Vec<Warning>>>,
}

impl CollectingSink {
    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticSink for CollectingSink {
    fn warn(&self, warning: &Warning) {
        log::warn!("{warning}");
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(warning.clone());
    }
}
