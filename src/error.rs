//! Crate-wide error type

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by training, checkpointing and statistics operations
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset directory not found: {0}")]
    DatasetNotFound(PathBuf),

    #[error("Resume requested but no checkpoint exists at {0}")]
    MissingResumeCheckpoint(PathBuf),

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
