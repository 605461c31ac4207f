//! SQL identifier handling.
//!
//! Table and column names cannot be bound as parameters, so every name that
//! reaches SQL text is validated here first and always emitted quoted.

use crate::error::SchemaError;
use regex_lite::Regex;
use std::sync::LazyLock;

static SQL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

/// Column and document keys the engine synthesizes itself.
pub const RESERVED_NAMES: &[&str] = &["_id", "_data", "_deleted", "_header", "_ts", "_user"];

/// Returns true if `name` is usable as an unquoted SQL identifier.
pub fn is_sql_name(name: &str) -> bool {
    SQL_NAME.is_match(name)
}

/// Validates an entity, attribute or relation name.
pub fn validate_name(name: &str) -> Result<(), SchemaError> {
    if !is_sql_name(name) || RESERVED_NAMES.contains(&name) {
        return Err(SchemaError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Double-quotes an identifier.
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a `table.column` reference.
pub fn qualified(table: &str, column: &str) -> String {
    format!("{}.{}", quote(table), quote(column))
}
