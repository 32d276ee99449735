//! Fingerprint store error types.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Fingerprint store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique or foreign-key constraint rejected a write that is not one of
    /// the silently ignored duplicate cases.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("database error: {0}")]
    Database(#[source] rusqlite::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// True for unique or foreign-key failures, which callers may treat as
    /// a rejected write rather than a broken store.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StoreError::ConstraintViolation(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref failure, ref msg)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                StoreError::ConstraintViolation(
                    msg.clone().unwrap_or_else(|| failure.to_string()),
                )
            }
            other => StoreError::Database(other),
        }
    }
}

/// Result type for fingerprint store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
