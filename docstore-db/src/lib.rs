//! SQLite connection handling for docstore.
//!
//! Turns a [`DbConfig`] into an open [`rusqlite::Connection`] with the busy
//! timeout and journal mode applied. Engines own the returned connection;
//! there is no pooling.

mod config;
mod error;

pub use config::{DbConfig, JournalMode};
pub use error::{DbError, DbResult};

use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::time::Duration;
use tracing::{debug, info};

/// Opens the database described by `config`.
pub fn open(config: &DbConfig) -> DbResult<Connection> {
    let conn = match &config.path {
        None => Connection::open_in_memory()?,
        Some(path) => {
            if path.is_dir() {
                return Err(DbError::NotAFile(path.clone()));
            }
            let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX;
            if config.create_if_missing {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            } else if !path.exists() {
                return Err(DbError::Missing(path.clone()));
            }
            Connection::open_with_flags(path, flags)?
        }
    };

    apply_pragmas(&conn, config)?;
    info!(
        path = ?config.path,
        busy_timeout_ms = config.busy_timeout_ms,
        "opened database"
    );
    Ok(conn)
}

/// Opens a private in-memory database with default settings.
pub fn open_in_memory() -> DbResult<Connection> {
    open(&DbConfig::in_memory())
}

fn apply_pragmas(conn: &Connection, config: &DbConfig) -> DbResult<()> {
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    if config.path.is_some() {
        let mode: String = conn.pragma_update_and_check(
            None,
            "journal_mode",
            config.journal_mode.pragma_value(),
            |row| row.get(0),
        )?;
        debug!(journal_mode = %mode, "journal mode applied");
    }
    Ok(())
}

/// Returns true if a table named `name` exists.
pub fn table_exists(conn: &Connection, name: &str) -> DbResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}
