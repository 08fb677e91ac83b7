//! Storage errors.

use thiserror::Error;

/// Errors from store operations, one variant per stage so callers can tell
/// a row-level failure from a transaction-level one.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("begin transaction failed: {0}")]
    Begin(String),

    #[error("prepare statement failed: {0}")]
    Prepare(String),

    #[error("statement exec failed: {0}")]
    Exec(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("store operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl StorageError {
    /// Whether the error only affects the row being executed.
    pub fn is_row_level(&self) -> bool {
        matches!(self, StorageError::Exec(_))
    }
}
