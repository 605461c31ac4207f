//! Error types for opening databases.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for connection operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur while opening or configuring a connection.
#[derive(Debug, Error)]
pub enum DbError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database file is absent and creation was not allowed.
    #[error("database file not found: {}", .0.display())]
    Missing(PathBuf),

    /// The configured path is a directory.
    #[error("database path is a directory: {}", .0.display())]
    NotAFile(PathBuf),

    /// IO error (creating parent directories).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
