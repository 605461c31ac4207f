//! Mapping between logical documents and physical rows.
//!
//! A document is the full JSON object of a record. Its physical row is the
//! serialized document plus the subset of values materialized into real
//! columns (indexed attributes and single-relation foreign keys); values of
//! multi-valued relations live in link tables instead.

use crate::entity::{EntitySchema, HEADER_KEY};
use crate::error::{ValidationError, ValueError, Violation, ViolationKind};
use crate::relation::Relation;
use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value};

/// A record's JSON document.
pub type Document = Map<String, Value>;

/// Keys added to read output that never belong to a stored document.
pub const SYNTHESIZED_KEYS: &[&str] = &[HEADER_KEY, "_ts", "_user"];

/// Link rows of one multi-valued relation.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRows {
    pub relation: String,
    pub targets: Vec<i64>,
}

/// The physical row a document projects onto.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalRow {
    /// Canonical serialized document.
    pub data: String,
    /// Real columns other than `_id`, `_data` and `_deleted`.
    pub columns: Vec<(String, SqlValue)>,
    pub links: Vec<LinkRows>,
}

impl EntitySchema {
    /// Converts write input from presentation form to canonical form.
    ///
    /// Relation values may be bare IDs, `{"_id": ..}` stubs, or arrays of
    /// either. Single relations keep a scalar ID, multi relations an array
    /// of distinct IDs; empty or null relation values are dropped.
    pub fn canonicalize(&self, mut data: Document) -> Result<Document, ValueError> {
        for key in SYNTHESIZED_KEYS {
            data.remove(*key);
        }
        if let Some(unknown) = data.keys().find(|k| self.field(k).is_none()) {
            return Err(ValueError::UnknownField(unknown.clone()));
        }

        for rel in self.relations() {
            let Some(value) = data.remove(rel.name()) else {
                continue;
            };
            if let Some(canonical) = canonical_relation(rel, value)? {
                data.insert(rel.name().to_string(), canonical);
            }
        }

        Ok(data)
    }

    /// Checks that every mandatory attribute and relation is present and
    /// non-empty, reporting all violations at once.
    pub fn check_mandatories(&self, data: &Document) -> Result<(), ValidationError> {
        let mut violations = Vec::new();

        for attr in self.attributes().iter().filter(|a| a.is_mandatory()) {
            let kind = match data.get(attr.name()) {
                None | Some(Value::Null) => Some(ViolationKind::Missing),
                Some(v) if attr.is_empty(v) => Some(ViolationKind::Empty),
                Some(_) => None,
            };
            if let Some(kind) = kind {
                violations.push(Violation {
                    field: attr.name().to_string(),
                    relation: false,
                    kind,
                });
            }
        }

        for rel in self.relations().iter().filter(|r| r.is_mandatory()) {
            let kind = match data.get(rel.name()) {
                None | Some(Value::Null) => Some(ViolationKind::Missing),
                Some(Value::Array(ids)) if ids.is_empty() => Some(ViolationKind::Empty),
                Some(_) => None,
            };
            if let Some(kind) = kind {
                violations.push(Violation {
                    field: rel.name().to_string(),
                    relation: true,
                    kind,
                });
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError(violations))
        }
    }

    /// Projects a canonical document onto its physical row.
    ///
    /// Every attribute value is type-checked, including non-indexed ones,
    /// even though only indexed values get a column.
    pub fn project(&self, data: &Document) -> Result<PhysicalRow, ValueError> {
        if let Some(unknown) = data.keys().find(|k| self.field(k).is_none()) {
            return Err(ValueError::UnknownField(unknown.clone()));
        }

        let mut columns = Vec::new();
        for attr in self.attributes() {
            let Some(value) = data.get(attr.name()) else {
                continue;
            };
            let sql = attr.sql_value(Some(value))?;
            if attr.is_indexed() {
                columns.push((attr.name().to_string(), sql));
            }
        }

        let mut links = Vec::new();
        for rel in self.relations() {
            let Some(value) = data.get(rel.name()) else {
                continue;
            };
            let ids = relation_ids(rel, value)?;
            if rel.is_multi() {
                links.push(LinkRows {
                    relation: rel.name().to_string(),
                    targets: ids,
                });
            } else if let [id] = ids.as_slice() {
                columns.push((rel.name().to_string(), SqlValue::Integer(*id)));
            } else {
                return Err(ValueError::TooManyTargets {
                    relation: rel.name().to_string(),
                    count: ids.len(),
                });
            }
        }

        Ok(PhysicalRow {
            data: serde_json::to_string(data).map_err(|e| ValueError::WrongType {
                field: self.name().to_string(),
                expected: "serializable document",
                got: e.to_string(),
            })?,
            columns,
            links,
        })
    }

    /// Header label computed from a document, matching what
    /// [`EntitySchema::header_expression`] yields for the stored row.
    pub fn header_of(&self, data: &Document) -> Value {
        // SQLite has no boolean storage class; it hands back 1 and 0.
        let values: Vec<Value> = self
            .header()
            .map(|a| match data.get(a.name()) {
                Some(Value::Bool(b)) => Value::from(i64::from(*b)),
                Some(v) => v.clone(),
                None => Value::Null,
            })
            .collect();
        if let [single] = values.as_slice() {
            return single.clone();
        }
        let mut parts = Vec::with_capacity(values.len());
        for v in values {
            match v {
                Value::Null => return Value::Null,
                Value::String(s) => parts.push(s),
                other => parts.push(other.to_string()),
            }
        }
        Value::String(parts.join(" "))
    }

    /// Restores a document from the `_data` column of its physical row.
    pub fn document_from_row(&self, data: &str) -> Result<Document, serde_json::Error> {
        serde_json::from_str(data)
    }
}

fn canonical_relation(rel: &Relation, value: Value) -> Result<Option<Value>, ValueError> {
    if rel.is_multi() {
        let items = match value {
            Value::Null => return Ok(None),
            Value::Array(items) => items,
            other => {
                return Err(ValueError::InvalidRelation {
                    relation: rel.name().to_string(),
                    value: format!("expected a list, got {other}"),
                });
            }
        };
        let mut ids: Vec<i64> = Vec::with_capacity(items.len());
        for item in &items {
            let id = presentation_id(rel, item)?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok((!ids.is_empty()).then(|| Value::from(ids)))
    } else {
        match value {
            Value::Null => Ok(None),
            Value::Array(items) => match items.as_slice() {
                [] => Ok(None),
                [single] => presentation_id(rel, single).map(|id| Some(Value::from(id))),
                _ => Err(ValueError::TooManyTargets {
                    relation: rel.name().to_string(),
                    count: items.len(),
                }),
            },
            other => presentation_id(rel, &other).map(|id| Some(Value::from(id))),
        }
    }
}

/// Reads a record ID from a bare integer or an `{"_id": ..}` stub.
fn presentation_id(rel: &Relation, value: &Value) -> Result<i64, ValueError> {
    let id = match value {
        Value::Object(stub) => stub.get("_id"),
        other => Some(other),
    };
    id.and_then(Value::as_i64)
        .ok_or_else(|| ValueError::InvalidRelation {
            relation: rel.name().to_string(),
            value: value.to_string(),
        })
}

fn relation_ids(rel: &Relation, value: &Value) -> Result<Vec<i64>, ValueError> {
    let invalid = || ValueError::InvalidRelation {
        relation: rel.name().to_string(),
        value: value.to_string(),
    };
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_i64().ok_or_else(invalid))
            .collect(),
        other => other.as_i64().map(|id| vec![id]).ok_or_else(invalid),
    }
}
