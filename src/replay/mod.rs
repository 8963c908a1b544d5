//! Replay of buffered writes once the backend is reachable again.
//!
//! This is the glue between the queue and the connectivity watcher: a
//! [`ReplayCoordinator`] drains the [`FileQueue`](crate::queue::FileQueue) and
//! hands each record, in insertion order, to a [`RecordReplayer`] supplied by
//! the application. Neither the queue nor the watcher depends on this module.

mod coordinator;
mod replayer;

pub use coordinator::{ReplayCoordinator, ReplayReport};
pub use replayer::{HttpReplayer, RecordReplayer};

use thiserror::Error;

use crate::queue::QueueError;

/// Errors that can occur while replaying records
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The request could not be sent or timed out
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status
    #[error("Backend rejected record with status {status}: {body}")]
    Status { status: u16, body: String },

    /// Draining or requeueing failed
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}
