//! Attribute descriptors: typed scalar fields of an entity.

use crate::error::{SchemaError, ValueError};
use crate::ident::validate_name;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Maximum number of values a `set` attribute may declare: one bit each in a
/// 64-bit integer column.
pub const MAX_SET_VALUES: usize = 64;

/// The semantic type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Str,
    Text,
    Password,
    Img,
    Url,
    Int,
    Float,
    Bool,
    Enum,
    Set,
}

impl AttributeType {
    pub const ALL: [AttributeType; 10] = [
        AttributeType::Str,
        AttributeType::Text,
        AttributeType::Password,
        AttributeType::Img,
        AttributeType::Url,
        AttributeType::Int,
        AttributeType::Float,
        AttributeType::Bool,
        AttributeType::Enum,
        AttributeType::Set,
    ];

    /// The name used in schema definitions.
    pub fn as_str(self) -> &'static str {
        match self {
            AttributeType::Str => "str",
            AttributeType::Text => "text",
            AttributeType::Password => "password",
            AttributeType::Img => "img",
            AttributeType::Url => "url",
            AttributeType::Int => "int",
            AttributeType::Float => "float",
            AttributeType::Bool => "bool",
            AttributeType::Enum => "enum",
            AttributeType::Set => "set",
        }
    }

    /// Types stored as character data.
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            AttributeType::Str
                | AttributeType::Text
                | AttributeType::Password
                | AttributeType::Img
                | AttributeType::Url
        )
    }

    /// Default column length for bounded string types, `None` for the rest.
    pub fn default_len(self) -> Option<u32> {
        match self {
            AttributeType::Str => Some(256),
            AttributeType::Password => Some(128),
            AttributeType::Img => Some(512),
            AttributeType::Url => Some(2048),
            _ => None,
        }
    }

    /// Types that carry a list of titled values.
    pub fn has_values(self) -> bool {
        matches!(self, AttributeType::Enum | AttributeType::Set)
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttributeType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or(())
    }
}

/// Attribute definition as written in schema JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opt: Option<Value>,
    #[serde(default)]
    pub mand: bool,
    #[serde(default)]
    pub ind: bool,
    #[serde(default)]
    pub uniq: bool,
}

/// A typed scalar field of an entity.
///
/// Built once from its definition when the entity schema is loaded and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    name: String,
    attr_type: AttributeType,
    title: Option<String>,
    len: Option<u32>,
    values: Vec<String>,
    unit: Option<String>,
    opt: Option<Value>,
    mandatory: bool,
    indexed: bool,
    unique: bool,
}

impl Attribute {
    /// Parses an attribute from its JSON definition.
    pub fn from_json(def: &Value) -> Result<Self, SchemaError> {
        let raw: AttributeDef = serde_json::from_value(def.clone())?;
        Self::from_def(raw, def)
    }

    fn from_def(raw: AttributeDef, original: &Value) -> Result<Self, SchemaError> {
        let name = raw.name.ok_or_else(|| SchemaError::MissingKey {
            kind: "attribute",
            key: "name",
            definition: original.to_string(),
        })?;
        let type_name = raw.type_name.ok_or_else(|| SchemaError::MissingKey {
            kind: "attribute",
            key: "type",
            definition: original.to_string(),
        })?;
        validate_name(&name)?;

        let attr_type: AttributeType =
            type_name.parse().map_err(|()| SchemaError::UnknownType {
                name: name.clone(),
                type_name: type_name.clone(),
            })?;

        let values = raw.values.unwrap_or_default();
        if attr_type.has_values() && values.is_empty() {
            return Err(SchemaError::MissingValues(name));
        }
        if attr_type == AttributeType::Set && values.len() > MAX_SET_VALUES {
            return Err(SchemaError::SetTooLarge {
                name,
                count: values.len(),
            });
        }
        if raw.uniq && !raw.ind {
            return Err(SchemaError::UniqueNotIndexed(name));
        }

        Ok(Self {
            name,
            attr_type,
            title: raw.title,
            len: raw.len,
            values,
            unit: raw.unit,
            opt: raw.opt,
            mandatory: raw.mand,
            indexed: raw.ind,
            unique: raw.uniq,
        })
    }

    /// Converts back into the schema definition format.
    pub fn to_def(&self) -> AttributeDef {
        AttributeDef {
            name: Some(self.name.clone()),
            type_name: Some(self.attr_type.as_str().to_string()),
            title: self.title.clone(),
            len: self.len,
            values: (!self.values.is_empty()).then(|| self.values.clone()),
            unit: self.unit.clone(),
            opt: self.opt.clone(),
            mand: self.mandatory,
            ind: self.indexed,
            uniq: self.unique,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr_type(&self) -> AttributeType {
        self.attr_type
    }

    /// Human-facing title, falling back to the name.
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    pub fn len(&self) -> Option<u32> {
        self.len
    }

    /// Titles of enum/set values; empty for other types.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Free-form presentation options, passed through untouched.
    pub fn opt(&self) -> Option<&Value> {
        self.opt.as_ref()
    }

    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Effective maximum length of a bounded string attribute.
    pub fn max_len(&self) -> Option<u32> {
        self.attr_type.default_len().map(|d| self.len.unwrap_or(d))
    }

    /// Storage column type for an indexed attribute.
    pub fn sql_type(&self) -> String {
        match self.attr_type {
            AttributeType::Str
            | AttributeType::Password
            | AttributeType::Img
            | AttributeType::Url => format!("VARCHAR({})", self.max_len().unwrap_or(256)),
            AttributeType::Text => "TEXT".to_string(),
            AttributeType::Int => "INTEGER".to_string(),
            AttributeType::Float => "DOUBLE".to_string(),
            AttributeType::Bool => "TINYINT".to_string(),
            AttributeType::Enum => "SMALLINT".to_string(),
            AttributeType::Set => "BIGINT".to_string(),
        }
    }

    /// Converts a document value into a bound SQL parameter.
    ///
    /// Absent and null values become SQL NULL. Values of the wrong JSON kind
    /// are rejected rather than coerced.
    pub fn sql_value(&self, raw: Option<&Value>) -> Result<SqlValue, ValueError> {
        let v = match raw {
            None | Some(Value::Null) => return Ok(SqlValue::Null),
            Some(v) => v,
        };

        match self.attr_type {
            AttributeType::Str
            | AttributeType::Text
            | AttributeType::Password
            | AttributeType::Img
            | AttributeType::Url => {
                let s = v.as_str().ok_or_else(|| self.wrong_type("string", v))?;
                if let Some(max) = self.max_len() {
                    let len = s.chars().count();
                    if len > max as usize {
                        return Err(ValueError::TooLong {
                            field: self.name.clone(),
                            len,
                            max,
                        });
                    }
                }
                Ok(SqlValue::Text(s.to_string()))
            }
            AttributeType::Int | AttributeType::Enum => v
                .as_i64()
                .map(SqlValue::Integer)
                .ok_or_else(|| self.wrong_type("integer", v)),
            AttributeType::Set => {
                let mask = set_mask(v).ok_or_else(|| self.wrong_type("integer bitmask", v))?;
                if self.values.len() < MAX_SET_VALUES && mask >> self.values.len() != 0 {
                    return Err(ValueError::SetOutOfRange {
                        field: self.name.clone(),
                        value: mask,
                        count: self.values.len(),
                    });
                }
                Ok(SqlValue::Integer(mask as i64))
            }
            AttributeType::Float => v
                .as_f64()
                .map(SqlValue::Real)
                .ok_or_else(|| self.wrong_type("number", v)),
            AttributeType::Bool => match v {
                Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
                Value::Number(n) if n.as_i64() == Some(0) || n.as_i64() == Some(1) => {
                    Ok(SqlValue::Integer(n.as_i64().unwrap_or_default()))
                }
                _ => Err(self.wrong_type("boolean", v)),
            },
        }
    }

    /// Decodes a column value read back from storage into a typed JSON value.
    pub fn decode(&self, sql: SqlValue) -> Value {
        match (self.attr_type, sql) {
            (_, SqlValue::Null) => Value::Null,
            (AttributeType::Bool, SqlValue::Integer(i)) => Value::Bool(i != 0),
            (AttributeType::Set, SqlValue::Integer(i)) => Value::from(i as u64),
            (AttributeType::Float, SqlValue::Integer(i)) => Value::from(i as f64),
            (_, other) => sql_to_json(other),
        }
    }

    /// Type-specific emptiness used by mandatory checks.
    pub fn is_empty(&self, value: &Value) -> bool {
        match self.attr_type {
            AttributeType::Str
            | AttributeType::Text
            | AttributeType::Password
            | AttributeType::Img
            | AttributeType::Url => match value {
                Value::Null => true,
                Value::String(s) => s.is_empty(),
                _ => false,
            },
            AttributeType::Set => set_mask(value).is_none_or(|m| m == 0),
            AttributeType::Int | AttributeType::Float | AttributeType::Bool | AttributeType::Enum => {
                value.is_null()
            }
        }
    }

    /// Converts a stored value into its human-facing shape.
    ///
    /// Enum indexes become their title (null when out of range), set
    /// bitmasks become the ordered list of titles whose bit is set. Other
    /// types pass through unchanged.
    pub fn resolve(&self, value: &Value) -> Value {
        if value.is_null() {
            return Value::Null;
        }
        match self.attr_type {
            AttributeType::Enum => value
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| self.values.get(i))
                .map_or(Value::Null, |s| Value::String(s.clone())),
            AttributeType::Set => {
                let mask = set_mask(value).unwrap_or(0);
                Value::Array(
                    self.values
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| mask & (1u64 << i) != 0)
                        .map(|(_, s)| Value::String(s.clone()))
                        .collect(),
                )
            }
            _ => value.clone(),
        }
    }

    fn wrong_type(&self, expected: &'static str, got: &Value) -> ValueError {
        ValueError::WrongType {
            field: self.name.clone(),
            expected,
            got: got.to_string(),
        }
    }
}

impl Serialize for Attribute {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_def().serialize(serializer)
    }
}

/// Reads a set bitmask. Masks with bit 63 set may arrive as either `u64` or
/// a negative `i64`, depending on where they came from.
fn set_mask(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_i64().map(|i| i as u64))
}

/// Generic conversion of an SQL value into JSON, for columns that are not
/// backed by an attribute.
pub fn sql_to_json(sql: SqlValue) -> Value {
    match sql {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(i),
        SqlValue::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
    }
}
