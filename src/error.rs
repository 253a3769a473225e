use serde_json::Error as SerdeJsonError;
use std::path::PathBuf;
use thiserror::Error;

use crate::state::Statistics;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Walkdir error: {0}")]
    Walkdir(#[from] walkdir::Error),

    #[error("JSON error: {0}")]
    Json(#[from] SerdeJsonError),

    #[error("Invalid timestamp format: {0:?}")]
    InvalidTimestamp(String),

    #[error("No valid timestamp found in metadata")]
    MissingTimestamp,

    #[error("Failed to apply metadata to {path:?}: {reason}")]
    Apply { path: PathBuf, reason: String },

    #[error("Unsupported media file type: {0:?}")]
    UnsupportedMedia(PathBuf),

    #[error("Cannot access metadata file {path:?}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path is not a directory: {0:?}")]
    InvalidDirectory(PathBuf),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Channel send error")]
    SendError,
}

impl AppError {
    /// True for errors that come from a sidecar that could not be decoded.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, AppError::Json(_) | AppError::InvalidTimestamp(_))
    }
}

impl<T> From<crossbeam_channel::SendError<T>> for AppError {
    fn from(_: crossbeam_channel::SendError<T>) -> Self {
        AppError::SendError
    }
}

/// A run that could not finish. Units already queued were still processed,
/// and their counters are kept in `statistics`.
#[derive(Error, Debug)]
#[error("processing aborted: {source}")]
pub struct RunAborted {
    pub statistics: Statistics,
    #[source]
    pub source: AppError,
}
