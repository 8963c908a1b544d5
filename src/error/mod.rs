use thiserror::Error;

use crate::queue::QueueError;
use crate::replay::ReplayError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Replay error: {0}")]
    Replay(#[from] ReplayError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
