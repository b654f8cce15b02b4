//! Error types for crowdbench

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Malformed or semantically invalid input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Target submission/entity vanished or never existed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate unique key; callers may retry as a fresh read-then-decide
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limit exceeded for {operation}, retry in {retry_after_ms}ms")]
    RateLimitExceeded { operation: String, retry_after_ms: u64 },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::Conflict(e.to_string())
            }
            other => StorageError::Database(other.to_string()),
        }
    }
}

impl StorageError {
    /// Whether a caller may retry the operation as a fresh read-then-decide
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }
}
