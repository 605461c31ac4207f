//! Schema-driven document storage on SQLite.
//!
//! An [`Engine`] owns one connection and the schema registry. Entities are
//! created from [`docstore_model::EntitySchema`] definitions; each gets a
//! primary table (JSON document plus indexed columns), a history table and
//! one link table per multi-valued relation.
//!
//! ```no_run
//! use docstore_model::EntitySchema;
//! use docstore_storage::{Engine, QueryOptions, WriteMeta};
//! use serde_json::json;
//!
//! # fn main() -> docstore_storage::StorageResult<()> {
//! let mut engine = Engine::open_in_memory()?;
//! let def = json!({"attr": [{"name": "name", "type": "str", "ind": true}]});
//! engine.entity_create(EntitySchema::from_json("org", &def)?)?;
//!
//! let org = engine.entity_or_fail("org")?;
//! let doc = json!({"name": "Bell Labs"}).as_object().cloned().unwrap_or_default();
//! let id = org.insert(doc, WriteMeta::default())?;
//! let all = org.list(&QueryOptions::new())?;
//! assert_eq!(all.first().and_then(|r| r.id()), Some(id));
//! # Ok(())
//! # }
//! ```

mod engine;
mod entity;
mod error;
mod query;
mod record;
mod registry;
mod search;

pub use docstore_db::{DbConfig, JournalMode};
pub use engine::{DESC_TABLE, Engine};
pub use entity::{Entity, HistoryEntry, WriteMeta};
pub use error::{StorageError, StorageResult};
pub use query::{Condition, DEFAULT_PER_PAGE, ListQuery, Operator, QueryOptions};
pub use record::{DATA_ALIAS, Record, RecordSet};
pub use registry::Registry;
pub use search::{SearchFilter, SearchOp, SearchOptions, SearchQuery};
