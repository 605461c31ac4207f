//! The engine: owns the connection and the schema registry.

use crate::entity::Entity;
use crate::error::{StorageError, StorageResult};
use crate::registry::Registry;
use docstore_db::{DbConfig, table_exists};
use docstore_model::ident::quote;
use docstore_model::{EntitySchema, Relation, SchemaError};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

/// Table holding the serialized registry.
pub const DESC_TABLE: &str = "_desc";

/// Entry point to a document store.
///
/// Several engines may open the same database file. Each keeps its own
/// registry copy; call [`Engine::refresh`] to pick up schema changes made
/// by others. Schema changes themselves always start from the stored
/// registry, so a stale copy can never overwrite a newer one.
#[derive(Debug)]
pub struct Engine {
    conn: Connection,
    registry: Registry,
}

impl Engine {
    /// Opens the database described by `config`, bootstrapping the registry
    /// table on first use.
    #[instrument(skip_all, fields(path = ?config.path))]
    pub fn open(config: &DbConfig) -> StorageResult<Self> {
        let conn = docstore_db::open(config)?;
        Self::with_connection(conn)
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::open(&DbConfig::in_memory())
    }

    /// Wraps an already open connection.
    pub fn with_connection(mut conn: Connection) -> StorageResult<Self> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\"json\" TEXT NOT NULL, \"version\" INTEGER NOT NULL)",
            quote(DESC_TABLE)
        ))?;
        let registry = match read_desc(&tx)? {
            Some((json, version)) => Registry::parse(&json, version)?,
            None => {
                let registry = Registry::default();
                tx.execute(
                    &format!(
                        "INSERT INTO {} (\"json\", \"version\") VALUES (?1, ?2)",
                        quote(DESC_TABLE)
                    ),
                    params![registry.to_json_string()?, registry.version()],
                )?;
                info!("initialized empty registry");
                registry
            }
        };
        tx.commit()?;
        debug!(version = registry.version(), "registry loaded");
        Ok(Self { conn, registry })
    }

    /// Reloads the registry if another engine changed it. Returns whether a
    /// reload happened.
    pub fn refresh(&mut self) -> StorageResult<bool> {
        let version: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT \"version\" FROM {}", quote(DESC_TABLE)),
                [],
                |row| row.get(0),
            )
            .optional()?;
        if version == Some(self.registry.version()) {
            return Ok(false);
        }
        let (json, version) = read_desc(&self.conn)?
            .ok_or_else(|| StorageError::Internal("registry row is missing".into()))?;
        self.registry = Registry::parse(&json, version)?;
        info!(version, "registry reloaded");
        Ok(true)
    }

    /// Creates the tables of a new entity and records it in the registry.
    #[instrument(skip_all, fields(entity = %schema.name()))]
    pub fn entity_create(&mut self, schema: EntitySchema) -> StorageResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = reload_if_stale(&tx, &self.registry)?;
        let registry = current.as_ref().unwrap_or(&self.registry);

        if registry.entity(schema.name()).is_some() {
            return Err(SchemaError::Duplicate(schema.name().to_string()).into());
        }
        let mut seen = HashSet::new();
        for table in schema.table_names() {
            if !seen.insert(table.clone()) || table_exists(&tx, &table)? {
                return Err(StorageError::Argument(format!(
                    "table {table:?} of entity {:?} collides with an existing table",
                    schema.name()
                )));
            }
        }

        for ddl in schema.all_ddl() {
            for sql in ddl.statements() {
                debug!(sql = %sql, "create");
                tx.execute(&sql, [])?;
            }
        }
        let next = registry.with_entity(schema);
        write_desc(&tx, &next)?;
        tx.commit()?;

        info!(version = next.version(), "entity created");
        self.registry = next;
        Ok(())
    }

    /// Drops the tables of entity `name` and removes it from the registry.
    ///
    /// Relations of other entities that target it are left dangling.
    #[instrument(skip(self))]
    pub fn entity_delete(&mut self, name: &str) -> StorageResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = reload_if_stale(&tx, &self.registry)?;
        let registry = current.as_ref().unwrap_or(&self.registry);

        let schema = registry
            .entity(name)
            .ok_or_else(|| StorageError::NotFound(format!("entity {name:?} not found")))?;
        let dependents: Vec<String> = registry
            .relations_targeting(name)
            .into_iter()
            .filter(|(owner, _)| owner.name() != name)
            .map(|(owner, rel)| format!("{}.{}", owner.name(), rel.name()))
            .collect();
        if !dependents.is_empty() {
            warn!(?dependents, "deleting entity still targeted by relations");
        }

        for ddl in schema.all_ddl() {
            let sql = ddl.drop_table_sql();
            debug!(sql = %sql, "drop");
            tx.execute(&sql, [])?;
        }
        let next = registry.without_entity(name);
        write_desc(&tx, &next)?;
        tx.commit()?;

        info!(version = next.version(), "entity deleted");
        self.registry = next;
        Ok(())
    }

    pub fn entity(&self, name: &str) -> Option<Entity<'_>> {
        self.registry
            .entity(name)
            .map(|schema| Entity::new(&self.conn, &self.registry, schema))
    }

    pub fn entity_or_fail(&self, name: &str) -> StorageResult<Entity<'_>> {
        self.entity(name)
            .ok_or_else(|| StorageError::NotFound(format!("entity {name:?} not found")))
    }

    /// Names of all entities, sorted.
    pub fn entity_names(&self) -> Vec<&str> {
        self.registry.entity_names().collect()
    }

    /// Relations of any entity whose target is `name`.
    pub fn relations_targeting(&self, name: &str) -> Vec<(&EntitySchema, &Relation)> {
        self.registry.relations_targeting(name)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Version of the registry copy this engine works with.
    pub fn version(&self) -> i64 {
        self.registry.version()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn read_desc(conn: &Connection) -> StorageResult<Option<(String, i64)>> {
    Ok(conn
        .query_row(
            &format!("SELECT \"json\", \"version\" FROM {}", quote(DESC_TABLE)),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?)
}

/// Reads the stored registry when its version differs from `cached`.
fn reload_if_stale(conn: &Connection, cached: &Registry) -> StorageResult<Option<Registry>> {
    let (json, version) =
        read_desc(conn)?.ok_or_else(|| StorageError::Internal("registry row is missing".into()))?;
    if version == cached.version() {
        return Ok(None);
    }
    info!(from = cached.version(), to = version, "registry changed elsewhere, reloading");
    Ok(Some(Registry::parse(&json, version)?))
}

fn write_desc(conn: &Connection, registry: &Registry) -> StorageResult<()> {
    conn.execute(
        &format!(
            "UPDATE {} SET \"json\" = ?1, \"version\" = ?2",
            quote(DESC_TABLE)
        ),
        params![registry.to_json_string()?, registry.version()],
    )?;
    Ok(())
}
