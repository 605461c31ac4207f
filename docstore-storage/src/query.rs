//! List queries: structured filter, order and paging over one entity.
//!
//! A [`QueryOptions`] value is compiled into a [`ListQuery`], which holds
//! the SQL fragments and the bound parameters in placeholder order. Values
//! never appear in SQL text; names do, but only after being resolved
//! against the schema or validated as identifiers.

use crate::error::{StorageError, StorageResult};
use crate::record::{Record, RecordSet};
use crate::registry::Registry;
use docstore_model::ident::{qualified, quote};
use docstore_model::{
    Document, EntitySchema, Field, DATA_COLUMN, DELETED_COLUMN, ID_COLUMN, sql_to_json,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params_from_iter};
use serde_json::Value;
use std::fmt;
use tracing::debug;

pub const DEFAULT_PER_PAGE: u32 = 10;

/// Comparison operators allowed in a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
}

impl Operator {
    pub fn as_sql(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
        }
    }

    /// Parses an operator; `!=` is accepted as a synonym of `<>`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "=" => Some(Operator::Eq),
            "<>" | "!=" => Some(Operator::Ne),
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::Le),
            ">" => Some(Operator::Gt),
            ">=" => Some(Operator::Ge),
            "LIKE" => Some(Operator::Like),
            "NOT LIKE" => Some(Operator::NotLike),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A condition on one field of a where-clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field <op> value`. Equality with null compiles to `IS NULL`.
    Compare(Operator, Value),
    /// `field IN (...)`; an empty list matches nothing.
    In(Vec<Value>),
    /// Inclusive range; an absent bound is open.
    Range {
        from: Option<Value>,
        to: Option<Value>,
    },
}

impl Condition {
    pub fn eq(v: impl Into<Value>) -> Self {
        Condition::Compare(Operator::Eq, v.into())
    }

    pub fn ne(v: impl Into<Value>) -> Self {
        Condition::Compare(Operator::Ne, v.into())
    }

    pub fn lt(v: impl Into<Value>) -> Self {
        Condition::Compare(Operator::Lt, v.into())
    }

    pub fn le(v: impl Into<Value>) -> Self {
        Condition::Compare(Operator::Le, v.into())
    }

    pub fn gt(v: impl Into<Value>) -> Self {
        Condition::Compare(Operator::Gt, v.into())
    }

    pub fn ge(v: impl Into<Value>) -> Self {
        Condition::Compare(Operator::Ge, v.into())
    }

    pub fn like(pattern: impl Into<String>) -> Self {
        Condition::Compare(Operator::Like, Value::String(pattern.into()))
    }

    pub fn is_in<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Condition::In(values.into_iter().map(Into::into).collect())
    }

    pub fn between(from: impl Into<Value>, to: impl Into<Value>) -> Self {
        Condition::Range {
            from: Some(from.into()),
            to: Some(to.into()),
        }
    }

    pub fn at_least(from: impl Into<Value>) -> Self {
        Condition::Range {
            from: Some(from.into()),
            to: None,
        }
    }

    pub fn at_most(to: impl Into<Value>) -> Self {
        Condition::Range {
            from: None,
            to: Some(to.into()),
        }
    }

    /// Compiles the condition against `column`, pushing bound values onto
    /// `params`. Returns `None` for a condition that matches everything.
    fn compile(&self, column: &str, params: &mut Vec<SqlValue>) -> StorageResult<Option<String>> {
        let sql = match self {
            Condition::Compare(Operator::Eq, Value::Null) => format!("{column} IS NULL"),
            Condition::Compare(Operator::Ne, Value::Null) => format!("{column} IS NOT NULL"),
            Condition::Compare(op, Value::Null) => {
                return Err(StorageError::Argument(format!(
                    "operator {op} cannot compare with null"
                )));
            }
            Condition::Compare(op, v) => {
                params.push(bind_value(v)?);
                format!("{column} {op} ?")
            }
            Condition::In(values) if values.is_empty() => "1=0".to_string(),
            Condition::In(values) => {
                for v in values {
                    params.push(bind_value(v)?);
                }
                let marks = vec!["?"; values.len()].join(", ");
                format!("{column} IN ({marks})")
            }
            Condition::Range { from: None, to: None } => return Ok(None),
            Condition::Range {
                from: Some(a),
                to: None,
            } => {
                params.push(bind_value(a)?);
                format!("{column} >= ?")
            }
            Condition::Range {
                from: None,
                to: Some(b),
            } => {
                params.push(bind_value(b)?);
                format!("{column} <= ?")
            }
            Condition::Range {
                from: Some(a),
                to: Some(b),
            } => {
                params.push(bind_value(a)?);
                params.push(bind_value(b)?);
                format!("{column} BETWEEN ? AND ?")
            }
        };
        Ok(Some(sql))
    }
}

/// Reads a condition from its JSON form: a scalar means equality,
/// `[op, value]` a comparison (or `["IN", [...]]`), and
/// `{"from": a, "to": b}` a range with either end optional.
impl TryFrom<&Value> for Condition {
    type Error = StorageError;

    fn try_from(v: &Value) -> Result<Self, Self::Error> {
        match v {
            Value::Array(pair) => {
                let [op, value] = pair.as_slice() else {
                    return Err(StorageError::Argument(format!(
                        "condition {v} must be an [operator, value] pair"
                    )));
                };
                let op = op.as_str().ok_or_else(|| {
                    StorageError::Argument(format!("operator in {v} must be a string"))
                })?;
                if op.trim().eq_ignore_ascii_case("IN") {
                    let values = value.as_array().ok_or_else(|| {
                        StorageError::Argument(format!("IN value {value} is expected to be a list"))
                    })?;
                    return Ok(Condition::In(values.clone()));
                }
                let op = Operator::parse(op)
                    .ok_or_else(|| StorageError::Argument(format!("unknown operator {op:?}")))?;
                Ok(Condition::Compare(op, value.clone()))
            }
            Value::Object(range) => {
                if let Some(key) = range.keys().find(|k| *k != "from" && *k != "to") {
                    return Err(StorageError::Argument(format!(
                        "unexpected key {key:?} in range condition"
                    )));
                }
                let bound = |k: &str| range.get(k).filter(|b| !b.is_null()).cloned();
                Ok(Condition::Range {
                    from: bound("from"),
                    to: bound("to"),
                })
            }
            scalar => Ok(Condition::eq(scalar.clone())),
        }
    }
}

impl TryFrom<Value> for Condition {
    type Error = StorageError;

    fn try_from(v: Value) -> Result<Self, Self::Error> {
        Condition::try_from(&v)
    }
}

/// Converts a JSON scalar into a bound parameter.
pub(crate) fn bind_value(v: &Value) -> StorageResult<SqlValue> {
    match v {
        Value::Null => Ok(SqlValue::Null),
        Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(SqlValue::Integer(i)),
            None => n
                .as_f64()
                .map(SqlValue::Real)
                .ok_or_else(|| StorageError::Argument(format!("unsupported number {n}"))),
        },
        Value::String(s) => Ok(SqlValue::Text(s.clone())),
        other => Err(StorageError::Argument(format!(
            "cannot compare against {other}"
        ))),
    }
}

/// Options for [`crate::Entity::list`] and friends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Projection; `None` selects every column of the entity table.
    pub fields: Option<Vec<String>>,
    /// Conditions, all ANDed together in order.
    pub conditions: Vec<(String, Condition)>,
    /// Ordering; `None` orders by the header fields.
    pub order_by: Option<Vec<String>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// Join the target of every single relation, aliased by relation name.
    pub resolve: bool,
    pub include_deleted: bool,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter(mut self, field: impl Into<String>, condition: Condition) -> Self {
        self.conditions.push((field.into(), condition));
        self
    }

    pub fn order_by<S: Into<String>>(mut self, order: impl IntoIterator<Item = S>) -> Self {
        self.order_by = Some(order.into_iter().map(Into::into).collect());
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = Some(per_page);
        self
    }

    pub fn resolve(mut self, resolve: bool) -> Self {
        self.resolve = resolve;
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }

    /// Reads where-conditions from a JSON object of field to condition.
    pub fn filter_json(mut self, conditions: &Value) -> StorageResult<Self> {
        let map = conditions.as_object().ok_or_else(|| {
            StorageError::Argument(format!("where-clause {conditions} must be an object"))
        })?;
        for (field, cond) in map {
            self.conditions.push((field.clone(), Condition::try_from(cond)?));
        }
        Ok(self)
    }
}

/// A compiled list query over one entity.
#[derive(Debug, Clone)]
pub struct ListQuery<'a> {
    schema: &'a EntitySchema,
    fields: Vec<String>,
    tables: String,
    conditions: Vec<String>,
    params: Vec<SqlValue>,
    order_by: Vec<String>,
    /// `(page, per_page)` when paginating.
    paging: Option<(u32, u32)>,
}

impl<'a> ListQuery<'a> {
    pub fn new(
        schema: &'a EntitySchema,
        registry: &Registry,
        options: &QueryOptions,
    ) -> StorageResult<Self> {
        let name = schema.name();
        let mut query = Self {
            schema,
            fields: Vec::new(),
            tables: quote(name),
            conditions: Vec::new(),
            params: Vec::new(),
            order_by: Vec::new(),
            paging: options.page.map(|page| {
                (
                    page.max(1),
                    options.per_page.unwrap_or(DEFAULT_PER_PAGE).max(1),
                )
            }),
        };

        if options.resolve {
            query.join_relations(registry)?;
        }
        query.build_fields(options.fields.as_deref());
        for (field, condition) in &options.conditions {
            query.add_condition(field, condition)?;
        }
        if !options.include_deleted {
            query
                .conditions
                .push(format!("{} = 0", qualified(name, DELETED_COLUMN)));
        }
        query.build_order(options.order_by.as_deref());
        Ok(query)
    }

    fn join_relations(&mut self, registry: &Registry) -> StorageResult<()> {
        let name = self.schema.name();
        for rel in self.schema.relations() {
            if rel.is_multi() {
                return Err(StorageError::Argument(format!(
                    "unable to resolve multi-valued relation {:?} in a list",
                    rel.name()
                )));
            }
            // The alias would shadow the entity's own table.
            if rel.name() == name {
                continue;
            }
            if registry.entity(rel.target()).is_none() {
                return Err(StorageError::NotFound(format!(
                    "entity {:?} targeted by relation {:?} not found",
                    rel.target(),
                    rel.name()
                )));
            }
            self.tables.push_str(&format!(
                " LEFT JOIN {} AS {} ON {} = {}",
                quote(rel.target()),
                quote(rel.name()),
                qualified(rel.name(), ID_COLUMN),
                qualified(name, rel.name()),
            ));
        }
        Ok(())
    }

    fn build_fields(&mut self, fields: Option<&[String]>) {
        let name = self.schema.name();
        match fields {
            None => self.fields.push(format!("{}.*", quote(name))),
            Some(fields) => {
                for f in fields {
                    let expr = match self.schema.field(f) {
                        Some(Field::Attribute(a)) => format!(
                            "{} AS {}",
                            EntitySchema::column_expr(name, a),
                            quote(a.name())
                        ),
                        Some(Field::Relation(r)) if !r.is_multi() => qualified(name, r.name()),
                        _ if f == ID_COLUMN => qualified(name, ID_COLUMN),
                        _ => f.clone(),
                    };
                    self.fields.push(expr);
                }
            }
        }
        self.fields.push(format!(
            "{} AS {}",
            self.schema.header_expression(name),
            quote("_header")
        ));
        self.fields.push(format!(
            "{} AS {}",
            qualified(name, DATA_COLUMN),
            quote("_data_0")
        ));
    }

    fn add_condition(&mut self, field: &str, condition: &Condition) -> StorageResult<()> {
        let name = self.schema.name();
        let compiled = match self.schema.field(field) {
            Some(Field::Attribute(a)) => {
                if !a.is_indexed() {
                    return Err(StorageError::Argument(format!(
                        "field {field:?} is not indexed"
                    )));
                }
                condition.compile(&qualified(name, a.name()), &mut self.params)?
            }
            Some(Field::Relation(r)) if r.is_multi() => {
                let link = r.link_table();
                let (owner_col, target_col) = r.link_columns();
                condition
                    .compile(&qualified(link, target_col), &mut self.params)?
                    .map(|predicate| {
                        format!(
                            "EXISTS (SELECT 1 FROM {} WHERE {} = {} AND {predicate})",
                            quote(link),
                            qualified(link, owner_col),
                            qualified(name, ID_COLUMN),
                        )
                    })
            }
            Some(Field::Relation(r)) => {
                condition.compile(&qualified(name, r.name()), &mut self.params)?
            }
            None if field == ID_COLUMN => {
                condition.compile(&qualified(name, ID_COLUMN), &mut self.params)?
            }
            None => {
                return Err(StorageError::Argument(format!(
                    "invalid field name: {field:?}"
                )));
            }
        };
        if let Some(sql) = compiled {
            self.conditions.push(sql);
        }
        Ok(())
    }

    fn build_order(&mut self, order_by: Option<&[String]>) {
        let name = self.schema.name();
        match order_by {
            None => {
                self.order_by = self
                    .schema
                    .header()
                    .map(|a| EntitySchema::column_expr(name, a))
                    .collect();
                self.order_by.push(qualified(name, ID_COLUMN));
            }
            Some(order) => {
                self.order_by = order
                    .iter()
                    .map(|o| match self.schema.field(o) {
                        Some(Field::Attribute(a)) => EntitySchema::column_expr(name, a),
                        Some(Field::Relation(r)) if !r.is_multi() => qualified(name, r.name()),
                        _ if o == ID_COLUMN => qualified(name, ID_COLUMN),
                        _ => o.clone(),
                    })
                    .collect();
            }
        }
    }

    /// `WHERE ...`, or an empty string without conditions.
    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }

    /// `ORDER BY ...`, or an empty string.
    pub fn order_clause(&self) -> String {
        if self.order_by.is_empty() {
            String::new()
        } else {
            format!(" ORDER BY {}", self.order_by.join(", "))
        }
    }

    /// FROM target including joins.
    pub fn tables(&self) -> &str {
        &self.tables
    }

    /// Bound parameters of the where-clause, in placeholder order.
    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    /// The row query without paging.
    pub fn sql(&self) -> String {
        format!(
            "SELECT {} FROM {}{}{}",
            self.fields.join(", "),
            self.tables,
            self.where_clause(),
            self.order_clause()
        )
    }

    /// Runs the query, fetching the requested page only when paginating.
    pub fn run(&self, conn: &Connection) -> StorageResult<RecordSet> {
        let mut sql = self.sql();
        let mut params = self.params.clone();
        let mut page_info = None;
        if let Some((page, per_page)) = self.paging {
            let total = self.count(conn)?;
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(i64::from(per_page)));
            params.push(SqlValue::Integer(i64::from(page - 1) * i64::from(per_page)));
            page_info = Some((page, per_page, total));
        }
        debug!(sql = %sql, "list query");

        let mut stmt = conn.prepare(&sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            let mut map = Document::new();
            for (i, column) in columns.iter().enumerate() {
                let raw: SqlValue = row.get(i)?;
                map.insert(column.clone(), self.decode_column(column, raw));
            }
            Ok(Record::new(map))
        })?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;

        Ok(match page_info {
            Some((page, per_page, total)) => RecordSet::paginated(records, page, per_page, total),
            None => RecordSet::new(records),
        })
    }

    /// Number of rows matching the where-clause.
    pub fn count(&self, conn: &Connection) -> StorageResult<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}{}", self.tables, self.where_clause());
        debug!(sql = %sql, "count query");
        let n: i64 = conn.query_row(&sql, params_from_iter(self.params.iter()), |row| row.get(0))?;
        u64::try_from(n).map_err(|_| StorageError::Internal(format!("negative row count {n}")))
    }

    /// Row counts per distinct value of `field`, ordered by value.
    ///
    /// `field` may be any attribute, a single relation or `_id`.
    pub fn group_count(&self, conn: &Connection, field: &str) -> StorageResult<Vec<(Value, u64)>> {
        let name = self.schema.name();
        let (expr, attr) = match self.schema.field(field) {
            Some(Field::Attribute(a)) => (EntitySchema::column_expr(name, a), Some(a)),
            Some(Field::Relation(r)) if !r.is_multi() => (qualified(name, r.name()), None),
            None if field == ID_COLUMN => (qualified(name, ID_COLUMN), None),
            _ => {
                return Err(StorageError::Argument(format!(
                    "cannot group by {field:?}"
                )));
            }
        };
        let sql = format!(
            "SELECT {expr} AS \"k\", COUNT(*) FROM {}{} GROUP BY \"k\" ORDER BY \"k\"",
            self.tables,
            self.where_clause()
        );
        debug!(sql = %sql, "group count query");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(self.params.iter()), |row| {
            let key: SqlValue = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((key, count))
        })?;
        let mut groups = Vec::new();
        for row in rows {
            let (key, count) = row?;
            let key = match attr {
                Some(a) => a.decode(key),
                None => sql_to_json(key),
            };
            groups.push((key, u64::try_from(count).unwrap_or_default()));
        }
        Ok(groups)
    }

    fn decode_column(&self, column: &str, raw: SqlValue) -> Value {
        match self.schema.attr(column) {
            Some(a) => a.decode(raw),
            None => sql_to_json(raw),
        }
    }
}
