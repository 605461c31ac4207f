//! Search across an entity and its one-step neighbours.
//!
//! Fields, filters and ordering are addressed as `entity.field` paths. The
//! base entity is always available; any other entity must be reachable
//! through exactly one relation, either a relation of the base entity
//! pointing at it or one of its relations pointing at the base.

use crate::error::{StorageError, StorageResult};
use crate::query::bind_value;
use crate::record::{Record, RecordSet};
use crate::registry::Registry;
use docstore_model::ident::{qualified, quote};
use docstore_model::{Attribute, DELETED_COLUMN, Document, EntitySchema, Field, ID_COLUMN, Relation, sql_to_json};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};
use serde_json::Value;
use std::str::FromStr;
use tracing::debug;

/// Operators of a search filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Starts,
    Ends,
    Contains,
}

impl SearchOp {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchOp::Eq => "eq",
            SearchOp::Ne => "ne",
            SearchOp::Lt => "lt",
            SearchOp::Le => "le",
            SearchOp::Gt => "gt",
            SearchOp::Ge => "ge",
            SearchOp::Starts => "starts",
            SearchOp::Ends => "ends",
            SearchOp::Contains => "contains",
        }
    }

    /// SQL operator of a plain comparison; `None` for pattern matches.
    fn comparison(self) -> Option<&'static str> {
        match self {
            SearchOp::Eq => Some("="),
            SearchOp::Ne => Some("<>"),
            SearchOp::Lt => Some("<"),
            SearchOp::Le => Some("<="),
            SearchOp::Gt => Some(">"),
            SearchOp::Ge => Some(">="),
            SearchOp::Starts | SearchOp::Ends | SearchOp::Contains => None,
        }
    }
}

impl FromStr for SearchOp {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            SearchOp::Eq,
            SearchOp::Ne,
            SearchOp::Lt,
            SearchOp::Le,
            SearchOp::Gt,
            SearchOp::Ge,
            SearchOp::Starts,
            SearchOp::Ends,
            SearchOp::Contains,
        ]
        .into_iter()
        .find(|op| op.as_str() == s)
        .ok_or_else(|| StorageError::Argument(format!("unknown search operator {s:?}")))
    }
}

/// One `path op value` filter.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilter {
    pub path: String,
    pub op: SearchOp,
    pub value: Value,
}

/// Options for [`crate::Entity::search`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    /// Result columns; empty selects the base entity's `_id` and header
    /// fields.
    pub fields: Vec<String>,
    pub filters: Vec<SearchFilter>,
    pub order: Vec<String>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, path: impl Into<String>) -> Self {
        self.fields.push(path.into());
        self
    }

    pub fn filter(mut self, path: impl Into<String>, op: SearchOp, value: impl Into<Value>) -> Self {
        self.filters.push(SearchFilter {
            path: path.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order(mut self, path: impl Into<String>) -> Self {
        self.order.push(path.into());
        self
    }

    /// Reads options from `{"fields": [...], "where": [[path, op, value]...], "order": [...]}`.
    pub fn from_json(v: &Value) -> StorageResult<Self> {
        let strings = |key: &str| -> StorageResult<Vec<String>> {
            match v.get(key) {
                None | Some(Value::Null) => Ok(Vec::new()),
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|i| {
                        i.as_str().map(String::from).ok_or_else(|| {
                            StorageError::Argument(format!("{key} entry {i} must be a string"))
                        })
                    })
                    .collect(),
                Some(other) => Err(StorageError::Argument(format!("{key} {other} must be a list"))),
            }
        };
        let mut options = Self {
            fields: strings("fields")?,
            filters: Vec::new(),
            order: strings("order")?,
        };
        if let Some(filters) = v.get("where").and_then(Value::as_array) {
            for f in filters {
                let Some([path, op, value]) = f.as_array().map(Vec::as_slice) else {
                    return Err(StorageError::Argument(format!(
                        "filter {f} must be a [path, op, value] triple"
                    )));
                };
                let (Some(path), Some(op)) = (path.as_str(), op.as_str()) else {
                    return Err(StorageError::Argument(format!(
                        "filter {f} must name its path and operator as strings"
                    )));
                };
                options = options.filter(path, op.parse()?, value.clone());
            }
        }
        Ok(options)
    }
}

/// A resolved `entity.field` path.
struct Column<'a> {
    expr: String,
    attr: Option<&'a Attribute>,
}

/// How a neighbour entity hangs off the base.
enum Hop<'a> {
    Forward(&'a Relation),
    Backward(&'a Relation),
}

/// A compiled search.
pub struct SearchQuery<'a> {
    base: &'a EntitySchema,
    registry: &'a Registry,
    joined: Vec<&'a str>,
    joins: String,
    select: Vec<(String, Option<&'a Attribute>)>,
    conditions: Vec<String>,
    params: Vec<SqlValue>,
    order: Vec<String>,
}

impl<'a> SearchQuery<'a> {
    pub fn new(
        base: &'a EntitySchema,
        registry: &'a Registry,
        options: &SearchOptions,
    ) -> StorageResult<Self> {
        let mut query = Self {
            base,
            registry,
            joined: Vec::new(),
            joins: String::new(),
            select: Vec::new(),
            conditions: Vec::new(),
            params: Vec::new(),
            order: Vec::new(),
        };

        let default_fields: Vec<String>;
        let fields = if options.fields.is_empty() {
            default_fields = std::iter::once(format!("{}.{ID_COLUMN}", base.name()))
                .chain(base.header().map(|a| format!("{}.{}", base.name(), a.name())))
                .collect();
            &default_fields
        } else {
            &options.fields
        };

        for path in fields {
            let column = query.column(path)?;
            query
                .select
                .push((format!("{} AS {}", column.expr, quote(path)), column.attr));
        }
        for filter in &options.filters {
            query.add_filter(filter)?;
        }
        query.conditions.push(format!(
            "{} = 0",
            qualified(base.name(), DELETED_COLUMN)
        ));
        for path in &options.order {
            let column = query.column(path)?;
            query.order.push(column.expr);
        }
        Ok(query)
    }

    /// Resolves `entity.field`, joining the entity in on first use.
    fn column(&mut self, path: &str) -> StorageResult<Column<'a>> {
        let (entity, field) = path
            .split_once('.')
            .ok_or_else(|| StorageError::Argument(format!("path {path:?} must be entity.field")))?;
        let schema = self.join(entity)?;
        match schema.field(field) {
            Some(Field::Attribute(a)) => Ok(Column {
                expr: EntitySchema::column_expr(schema.name(), a),
                attr: Some(a),
            }),
            Some(Field::Relation(r)) if !r.is_multi() => Ok(Column {
                expr: qualified(schema.name(), r.name()),
                attr: None,
            }),
            None if field == ID_COLUMN => Ok(Column {
                expr: qualified(schema.name(), ID_COLUMN),
                attr: None,
            }),
            _ => Err(StorageError::Argument(format!(
                "{path:?} is not a searchable field"
            ))),
        }
    }

    fn join(&mut self, entity: &str) -> StorageResult<&'a EntitySchema> {
        if entity == self.base.name() {
            return Ok(self.base);
        }
        let schema = self
            .registry
            .entity(entity)
            .ok_or_else(|| StorageError::Argument(format!("unknown entity {entity:?}")))?;
        if self.joined.contains(&schema.name()) {
            return Ok(schema);
        }

        let mut hops: Vec<Hop<'a>> = self
            .base
            .relations()
            .iter()
            .filter(|r| r.target() == entity)
            .map(Hop::Forward)
            .collect();
        hops.extend(
            schema
                .relations()
                .iter()
                .filter(|r| r.target() == self.base.name())
                .map(Hop::Backward),
        );
        let hop = match hops.len() {
            1 => hops.remove(0),
            0 => {
                return Err(StorageError::Argument(format!(
                    "entity {entity:?} is not related to {:?}",
                    self.base.name()
                )));
            }
            n => {
                return Err(StorageError::Argument(format!(
                    "entity {entity:?} is reachable from {:?} through {n} relations",
                    self.base.name()
                )));
            }
        };

        let base = self.base.name();
        let live = qualified(entity, DELETED_COLUMN);
        let sql = match hop {
            Hop::Forward(r) if r.is_multi() => {
                let (owner, target) = r.link_columns();
                format!(
                    " JOIN {link} ON {} = {} JOIN {t} ON {} = {} AND {live} = 0",
                    qualified(r.link_table(), owner),
                    qualified(base, ID_COLUMN),
                    qualified(entity, ID_COLUMN),
                    qualified(r.link_table(), target),
                    link = quote(r.link_table()),
                    t = quote(entity),
                )
            }
            Hop::Forward(r) => format!(
                " JOIN {} ON {} = {} AND {live} = 0",
                quote(entity),
                qualified(entity, ID_COLUMN),
                qualified(base, r.name()),
            ),
            Hop::Backward(r) if r.is_multi() => {
                let (owner, target) = r.link_columns();
                format!(
                    " JOIN {link} ON {} = {} JOIN {t} ON {} = {} AND {live} = 0",
                    qualified(r.link_table(), target),
                    qualified(base, ID_COLUMN),
                    qualified(entity, ID_COLUMN),
                    qualified(r.link_table(), owner),
                    link = quote(r.link_table()),
                    t = quote(entity),
                )
            }
            Hop::Backward(r) => format!(
                " JOIN {} ON {} = {} AND {live} = 0",
                quote(entity),
                qualified(entity, r.name()),
                qualified(base, ID_COLUMN),
            ),
        };
        self.joins.push_str(&sql);
        self.joined.push(schema.name());
        Ok(schema)
    }

    fn add_filter(&mut self, filter: &SearchFilter) -> StorageResult<()> {
        let column = self.column(&filter.path)?;
        if let Some(op) = filter.op.comparison() {
            self.params.push(bind_value(&filter.value)?);
            self.conditions.push(format!("{} {op} ?", column.expr));
            return Ok(());
        }

        let text = filter.value.as_str().ok_or_else(|| {
            StorageError::Argument(format!(
                "operator {} needs a string, got {}",
                filter.op.as_str(),
                filter.value
            ))
        })?;
        let escaped = escape_like(text);
        let pattern = match filter.op {
            SearchOp::Starts => format!("{escaped}%"),
            SearchOp::Ends => format!("%{escaped}"),
            _ => format!("%{escaped}%"),
        };
        self.params.push(SqlValue::Text(pattern));
        self.conditions
            .push(format!("{} LIKE ? ESCAPE '\\'", column.expr));
        Ok(())
    }

    pub fn sql(&self) -> String {
        let select: Vec<&str> = self.select.iter().map(|(s, _)| s.as_str()).collect();
        let mut sql = format!(
            "SELECT DISTINCT {} FROM {}{} WHERE {}",
            select.join(", "),
            quote(self.base.name()),
            self.joins,
            self.conditions.join(" AND ")
        );
        if !self.order.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", self.order.join(", ")));
        }
        sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn run(&self, conn: &Connection) -> StorageResult<RecordSet> {
        let sql = self.sql();
        debug!(sql = %sql, "search query");
        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt.query_map(params_from_iter(self.params.iter()), |row| {
            let mut map = Document::new();
            for (i, (name, (_, attr))) in names.iter().zip(&self.select).enumerate() {
                let raw: SqlValue = row.get(i)?;
                let value = match attr {
                    Some(a) => a.decode(raw),
                    None => sql_to_json(raw),
                };
                map.insert(name.clone(), value);
            }
            Ok(Record::new(map))
        })?;
        Ok(RecordSet::new(rows.collect::<Result<Vec<_>, _>>()?))
    }
}

/// Escapes LIKE wildcards for use with `ESCAPE '\'`.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
