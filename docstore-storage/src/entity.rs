//! Entity handles: an entity schema bound to a connection and the registry.

use crate::error::{StorageError, StorageResult};
use crate::query::{Condition, ListQuery, QueryOptions};
use crate::record::{Record, RecordSet};
use crate::registry::Registry;
use crate::search::{SearchOptions, SearchQuery};
use chrono::{DateTime, SecondsFormat, Utc};
use docstore_model::ident::{qualified, quote};
use docstore_model::{
    DATA_COLUMN, DELETED_COLUMN, Document, EntitySchema, HEADER_KEY, ID_COLUMN, PhysicalRow,
    Relation, sql_to_json,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params, params_from_iter};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{debug, instrument};

/// One entry of a record's write history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub history_id: i64,
    pub record_id: i64,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<i64>,
}

/// Who performed a write, and when.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteMeta {
    pub user: Option<i64>,
    /// Defaults to the current time.
    pub timestamp: Option<DateTime<Utc>>,
}

impl WriteMeta {
    pub fn by(user: i64) -> Self {
        Self {
            user: Some(user),
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A handle for reading and writing records of one entity.
///
/// Handles are cheap and borrow the engine; obtain them through
/// [`crate::Engine::entity`].
#[derive(Debug, Clone, Copy)]
pub struct Entity<'a> {
    conn: &'a Connection,
    registry: &'a Registry,
    schema: &'a EntitySchema,
}

impl<'a> Entity<'a> {
    pub(crate) fn new(conn: &'a Connection, registry: &'a Registry, schema: &'a EntitySchema) -> Self {
        Self {
            conn,
            registry,
            schema,
        }
    }

    pub fn name(&self) -> &'a str {
        self.schema.name()
    }

    pub fn schema(&self) -> &'a EntitySchema {
        self.schema
    }

    /// Relations of any entity that point at this one.
    pub fn relations_back(&self) -> Vec<(&'a EntitySchema, &'a Relation)> {
        self.registry.relations_targeting(self.name())
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Fetches a record in presentation form: the stored document plus
    /// `_header`, with relations expanded into `{_id, _header}` stubs.
    ///
    /// Soft-deleted records are still returned.
    #[instrument(skip(self), fields(entity = %self.name()))]
    pub fn get(&self, id: i64) -> StorageResult<Document> {
        let name = self.name();
        let sql = format!(
            "SELECT {}, {} FROM {} WHERE {} = ?1",
            qualified(name, DATA_COLUMN),
            self.schema.header_expression(name),
            quote(name),
            qualified(name, ID_COLUMN),
        );
        let row: Option<(String, SqlValue)> = self
            .conn
            .query_row(&sql, [id], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        let (data, header) = row.ok_or_else(|| self.record_not_found(id))?;

        let mut doc = self.decode_document(id, &data)?;
        doc.insert(HEADER_KEY.to_string(), sql_to_json(header));
        self.resolve_relations(&mut doc)?;
        Ok(doc)
    }

    pub fn list(&self, options: &QueryOptions) -> StorageResult<RecordSet> {
        ListQuery::new(self.schema, self.registry, options)?.run(self.conn)
    }

    pub fn count(&self, options: &QueryOptions) -> StorageResult<u64> {
        ListQuery::new(self.schema, self.registry, options)?.count(self.conn)
    }

    /// Row counts per distinct value of `field`, ordered by value.
    pub fn group_count(&self, field: &str, options: &QueryOptions) -> StorageResult<Vec<(Value, u64)>> {
        ListQuery::new(self.schema, self.registry, options)?.group_count(self.conn, field)
    }

    pub fn search(&self, options: &SearchOptions) -> StorageResult<RecordSet> {
        SearchQuery::new(self.schema, self.registry, options)?.run(self.conn)
    }

    /// The first record matching `conditions`, if any.
    pub fn find_by<K: Into<String>>(
        &self,
        conditions: impl IntoIterator<Item = (K, Condition)>,
    ) -> StorageResult<Option<Record>> {
        let found = self.list(&Self::where_options(conditions))?;
        Ok(found.into_iter().next())
    }

    /// The single record matching `conditions`.
    ///
    /// Fails with `NotFound` when nothing matches and `TooManyFound` when
    /// several records do.
    pub fn find_by_or_fail<K: Into<String>>(
        &self,
        conditions: impl IntoIterator<Item = (K, Condition)>,
    ) -> StorageResult<Record> {
        let options = Self::where_options(conditions);
        let mut found = self.list(&options)?.into_records();
        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err(StorageError::NotFound(format!(
                "no {:?} record matches {:?}",
                self.name(),
                options.conditions
            ))),
            n => Err(StorageError::TooManyFound(format!(
                "{n} {:?} records match {:?}",
                self.name(),
                options.conditions
            ))),
        }
    }

    fn where_options<K: Into<String>>(conditions: impl IntoIterator<Item = (K, Condition)>) -> QueryOptions {
        conditions
            .into_iter()
            .fold(QueryOptions::new(), |o, (k, c)| o.filter(k, c))
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Inserts a record and returns its ID.
    ///
    /// The row, its history snapshot and its link rows are written in one
    /// transaction.
    #[instrument(skip_all, fields(entity = %self.name()))]
    pub fn insert(&self, data: Document, meta: WriteMeta) -> StorageResult<i64> {
        let data = self.schema.canonicalize(data)?;
        self.schema.check_mandatories(&data)?;
        let row = self.schema.project(&data)?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let id = self.write_row(&tx, None, false, &row, meta)?;
        tx.commit()?;
        debug!(id, "inserted record");
        Ok(id)
    }

    /// Replaces the document of record `id`.
    ///
    /// Returns `false` without writing anything (not even history) when the
    /// canonical document equals the stored one. The soft-delete flag is
    /// kept.
    #[instrument(skip(self, data, meta), fields(entity = %self.name()))]
    pub fn update(&self, id: i64, data: Document, meta: WriteMeta) -> StorageResult<bool> {
        let data = self.schema.canonicalize(data)?;
        self.schema.check_mandatories(&data)?;
        let row = self.schema.project(&data)?;

        let name = self.name();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let sql = format!(
            "SELECT {}, {} FROM {} WHERE {} = ?1",
            quote(DATA_COLUMN),
            quote(DELETED_COLUMN),
            quote(name),
            quote(ID_COLUMN),
        );
        let stored: Option<(String, i64)> = tx
            .query_row(&sql, [id], |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()?;
        let (stored, deleted) = stored.ok_or_else(|| self.record_not_found(id))?;
        if stored == row.data {
            debug!(id, "document unchanged, skipping write");
            return Ok(false);
        }

        tx.execute(
            &format!("DELETE FROM {} WHERE {} = ?1", quote(name), quote(ID_COLUMN)),
            [id],
        )?;
        for rel in self.schema.relations().iter().filter(|r| r.is_multi()) {
            let (owner, _) = rel.link_columns();
            tx.execute(
                &format!("DELETE FROM {} WHERE {} = ?1", quote(rel.link_table()), quote(owner)),
                [id],
            )?;
        }
        self.write_row(&tx, Some(id), deleted != 0, &row, meta)?;
        tx.commit()?;
        debug!(id, "updated record");
        Ok(true)
    }

    /// Marks record `id` as deleted. It disappears from lists and searches
    /// but stays readable through [`Entity::get`] and its history.
    #[instrument(skip(self), fields(entity = %self.name()))]
    pub fn delete(&self, id: i64) -> StorageResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            &format!(
                "UPDATE {} SET {} = 1 WHERE {} = ?1",
                quote(self.name()),
                quote(DELETED_COLUMN),
                quote(ID_COLUMN)
            ),
            [id],
        )?;
        if changed == 0 {
            return Err(self.record_not_found(id));
        }
        tx.commit()?;
        debug!(id, "soft-deleted record");
        Ok(())
    }

    /// Writes the row, its history entry and its link rows. `id` is set
    /// when re-inserting an updated record.
    fn write_row(
        &self,
        conn: &Connection,
        id: Option<i64>,
        deleted: bool,
        row: &PhysicalRow,
        meta: WriteMeta,
    ) -> StorageResult<i64> {
        let name = self.name();
        let mut columns = vec![quote(DATA_COLUMN)];
        let mut values = vec![SqlValue::Text(row.data.clone())];
        if let Some(id) = id {
            columns.push(quote(ID_COLUMN));
            values.push(SqlValue::Integer(id));
        }
        if deleted {
            columns.push(quote(DELETED_COLUMN));
            values.push(SqlValue::Integer(1));
        }
        for (column, value) in &row.columns {
            columns.push(quote(column));
            values.push(value.clone());
        }
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(name),
            columns.join(", "),
            placeholders.join(", ")
        );
        debug!(sql = %sql, "insert row");
        conn.execute(&sql, params_from_iter(values.iter()))?;
        let id = id.unwrap_or_else(|| conn.last_insert_rowid());

        let ts = meta.timestamp.unwrap_or_else(Utc::now).timestamp();
        conn.execute(
            &format!(
                "INSERT INTO {} (\"_id\", \"_data\", \"ts\", \"user_id\") VALUES (?1, ?2, ?3, ?4)",
                quote(&self.schema.history_table())
            ),
            params![id, row.data, ts, meta.user],
        )?;

        for links in &row.links {
            let rel = self.schema.rel_or_fail(&links.relation)?;
            let (owner, target) = rel.link_columns();
            let mut stmt = conn.prepare(&format!(
                "INSERT INTO {} ({}, {}) VALUES (?1, ?2)",
                quote(rel.link_table()),
                quote(owner),
                quote(target)
            ))?;
            for target_id in &links.targets {
                stmt.execute(params![id, target_id])?;
            }
        }
        Ok(id)
    }

    // ── History ──────────────────────────────────────────────────

    /// History entries of record `id`, oldest first. `page` is 1-indexed
    /// and pages hold `per_page` entries (default 10).
    pub fn history_list(
        &self,
        id: i64,
        page: Option<u32>,
        per_page: Option<u32>,
    ) -> StorageResult<Vec<HistoryEntry>> {
        let mut sql = format!(
            "SELECT \"hid\", \"_id\", \"ts\", \"user_id\" FROM {} WHERE \"_id\" = ?1 ORDER BY \"hid\"",
            quote(&self.schema.history_table())
        );
        let mut values = vec![SqlValue::Integer(id)];
        if let Some(page) = page {
            let per_page = i64::from(per_page.unwrap_or(crate::query::DEFAULT_PER_PAGE).max(1));
            sql.push_str(" LIMIT ?2 OFFSET ?3");
            values.push(SqlValue::Integer(per_page));
            values.push(SqlValue::Integer(i64::from(page.max(1) - 1) * per_page));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (history_id, record_id, ts, user_id) = row?;
            entries.push(HistoryEntry {
                history_id,
                record_id,
                timestamp: from_unix(ts)?,
                user_id,
            });
        }
        Ok(entries)
    }

    /// A historical snapshot in presentation form, plus `_ts` (RFC 3339)
    /// and `_user`.
    #[instrument(skip(self), fields(entity = %self.name()))]
    pub fn history_get(&self, history_id: i64) -> StorageResult<Document> {
        let sql = format!(
            "SELECT \"_id\", \"_data\", \"ts\", \"user_id\" FROM {} WHERE \"hid\" = ?1",
            quote(&self.schema.history_table())
        );
        let row: Option<(i64, String, i64, Option<i64>)> = self
            .conn
            .query_row(&sql, [history_id], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
            })
            .optional()?;
        let (id, data, ts, user) = row.ok_or_else(|| {
            StorageError::NotFound(format!(
                "history entry {history_id} of {:?} not found",
                self.name()
            ))
        })?;

        let mut doc = self.decode_document(id, &data)?;
        doc.insert(HEADER_KEY.to_string(), self.schema.header_of(&doc));
        doc.insert(
            "_ts".to_string(),
            Value::String(from_unix(ts)?.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        doc.insert("_user".to_string(), user.map_or(Value::Null, Value::from));
        self.resolve_relations(&mut doc)?;
        Ok(doc)
    }

    // ── Presentation ─────────────────────────────────────────────

    /// Expands stored relation IDs into `{_id, _header}` stubs: one stub
    /// for single relations, a list for multi relations. IDs whose target
    /// record no longer exists are dropped.
    fn resolve_relations(&self, doc: &mut Document) -> StorageResult<()> {
        for rel in self.schema.relations() {
            let ids: Vec<i64> = match doc.get(rel.name()) {
                None | Some(Value::Null) => continue,
                Some(Value::Array(items)) => items.iter().filter_map(Value::as_i64).collect(),
                Some(other) => other.as_i64().into_iter().collect(),
            };
            if ids.is_empty() {
                continue;
            }

            let target = self.registry.entity(rel.target()).ok_or_else(|| {
                StorageError::NotFound(format!(
                    "entity {:?} targeted by relation {:?} not found",
                    rel.target(),
                    rel.name()
                ))
            })?;
            let mut headers = self.headers(target, &ids)?;
            let stubs: Vec<Value> = ids
                .iter()
                .filter_map(|id| headers.remove(id).map(|h| json!({ID_COLUMN: id, HEADER_KEY: h})))
                .collect();

            let value = if rel.is_multi() {
                Value::Array(stubs)
            } else {
                stubs.into_iter().next().unwrap_or(Value::Null)
            };
            doc.insert(rel.name().to_string(), value);
        }
        Ok(())
    }

    /// Header labels of records `ids` of entity `target`.
    fn headers(&self, target: &EntitySchema, ids: &[i64]) -> StorageResult<HashMap<i64, Value>> {
        let name = target.name();
        let marks = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {}, {} FROM {} WHERE {} IN ({marks})",
            qualified(name, ID_COLUMN),
            target.header_expression(name),
            quote(name),
            qualified(name, ID_COLUMN),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, SqlValue>(1)?))
        })?;
        let mut headers = HashMap::with_capacity(ids.len());
        for row in rows {
            let (id, header) = row?;
            headers.insert(id, sql_to_json(header));
        }
        Ok(headers)
    }

    fn decode_document(&self, id: i64, data: &str) -> StorageResult<Document> {
        self.schema.document_from_row(data).map_err(|e| {
            StorageError::Internal(format!(
                "stored document of {:?} record {id} is corrupt: {e}",
                self.name()
            ))
        })
    }

    fn record_not_found(&self, id: i64) -> StorageError {
        StorageError::NotFound(format!("record {id} of {:?} not found", self.name()))
    }
}

fn from_unix(ts: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| StorageError::Internal(format!("timestamp {ts} out of range")))
}
