//! Error types for promhouse.

use thiserror::Error;

/// Result type alias for promhouse operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for promhouse.
///
/// Crate-local errors (`ConfigError`, `StorageError`, `QueryError`, ...) convert
/// into this type at the binary boundary so that every failure maps onto a
/// stable code.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    // Validation errors (20-29)
    #[error("start time {start_ms} is after end time {end_ms}")]
    InvalidRange { start_ms: i64, end_ms: i64 },

    #[error("invalid sample budget: {0} (must be at least 1)")]
    InvalidSampleBudget(i64),

    #[error("invalid label matcher: {0}")]
    InvalidMatcher(String),

    // Routing errors (30-39)
    #[error("enqueue for job '{job}' timed out after {millis}ms")]
    EnqueueTimeout { job: String, millis: u64 },

    #[error("delivery queues are closed")]
    QueuesClosed,

    // Storage errors (40-49)
    #[error("storage error: {0}")]
    Storage(String),

    #[error("storage operation timed out after {seconds}s")]
    StorageTimeout { seconds: u64 },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error code for this error type.
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidIdentifier(_) => 11,
            Error::InvalidRange { .. } => 20,
            Error::InvalidSampleBudget(_) => 21,
            Error::InvalidMatcher(_) => 22,
            Error::EnqueueTimeout { .. } => 31,
            Error::QueuesClosed => 32,
            Error::Storage(_) => 40,
            Error::StorageTimeout { .. } => 41,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
        }
    }
}
