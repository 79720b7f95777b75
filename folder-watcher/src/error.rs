//! Error types for the folder watcher.

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur while watching a folder or managing materials.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Path is missing, does not exist, or is not a directory.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Listing the watched folder failed. Retried by the poll loop.
    #[error("scan error: {0}")]
    Scan(String),

    /// Another write to the same file name is in flight.
    #[error("conflicting write in progress: {0}")]
    Conflict(String),

    /// Unknown material id or file name.
    #[error("not found: {0}")]
    NotFound(String),

    /// File name rejected for upload or download.
    #[error("invalid file name: {0}")]
    InvalidName(String),

    /// Operation requires a watched folder and none is set.
    #[error("no folder is being watched")]
    NoActiveWatch,

    /// Upload exceeds the configured size limit.
    #[error("upload too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        /// Size of the rejected upload.
        size: u64,
        /// Configured limit.
        limit: u64,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A blocking worker panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
