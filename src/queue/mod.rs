//! Durable operation queue for offline writes.
//!
//! Pending writes are appended to a JSONL file, one record per line, while the
//! remote backend is unreachable. On reconnect the whole file is drained in
//! insertion order and deleted. Delivery is at-least-once: a crash between the
//! drain and the delete replays the same batch on the next drain.

mod dead_letter;
mod file_queue;

pub use dead_letter::DeadLetterSink;
pub use file_queue::FileQueue;

use std::path::PathBuf;

use thiserror::Error;

use crate::config::QueueSettings;

/// One pending write. The queue never interprets its fields.
pub type QueueRecord = serde_json::Map<String, serde_json::Value>;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Configuration for a [`FileQueue`]
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Location of the queue file
    pub path: PathBuf,
    /// Soft size limit; exceeding it after a push triggers compaction
    pub max_bytes: u64,
    /// Hard limit for a single serialized record (including the newline)
    pub max_record_bytes: u64,
    /// Number of most recent records kept by compaction
    pub gc_keep_lines: usize,
}

impl QueueConfig {
    /// Create a configuration for `path` with default limits
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let defaults = QueueSettings::default();
        Self {
            path: path.into(),
            max_bytes: defaults.max_bytes,
            max_record_bytes: defaults.max_record_bytes,
            gc_keep_lines: defaults.gc_keep_lines,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_max_record_bytes(mut self, max_record_bytes: u64) -> Self {
        self.max_record_bytes = max_record_bytes;
        self
    }

    pub fn with_gc_keep_lines(mut self, gc_keep_lines: usize) -> Self {
        self.gc_keep_lines = gc_keep_lines;
        self
    }
}

impl From<&QueueSettings> for QueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            path: settings.queue_file(),
            max_bytes: settings.max_bytes,
            max_record_bytes: settings.max_record_bytes,
            gc_keep_lines: settings.gc_keep_lines,
        }
    }
}

/// Errors surfaced by queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    /// Reading or writing the queue file failed
    #[error("Queue I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The record could not be encoded as a JSON line
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The serialized record exceeds the hard per-record ceiling
    #[error("Record of {size} bytes exceeds the {limit} byte limit")]
    RecordTooLarge { size: u64, limit: u64 },
}
