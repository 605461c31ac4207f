//! Error types for the storage layer.

use docstore_db::DbError;
use docstore_model::{NotFound, SchemaError, ValidationError, ValueError};
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Malformed entity definition.
    #[error("invalid schema: {0}")]
    Schema(#[from] SchemaError),

    /// Missing or empty mandatory fields in a write.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Record, entity, attribute or relation not found.
    #[error("{0}")]
    NotFound(String),

    /// A lookup expected one record and matched several.
    #[error("{0}")]
    TooManyFound(String),

    /// Malformed or unknown field in write input or a query.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Stored state that violates an engine invariant.
    #[error("internal error: {0}")]
    Internal(String),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure opening the database.
    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<ValueError> for StorageError {
    fn from(e: ValueError) -> Self {
        StorageError::Argument(e.to_string())
    }
}

impl From<NotFound> for StorageError {
    fn from(e: NotFound) -> Self {
        StorageError::NotFound(e.to_string())
    }
}
