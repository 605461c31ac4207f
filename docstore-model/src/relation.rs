//! Relation descriptors: typed references from one entity to another.

use crate::error::SchemaError;
use crate::ident::{quote, validate_name};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// How many targets a relation holds and whether it may be empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// `01`: at most one target.
    Optional,
    /// `1`: exactly one target.
    One,
    /// `0n`: any number of targets.
    Many,
    /// `1n`: at least one target.
    AtLeastOne,
}

impl Cardinality {
    pub fn as_str(self) -> &'static str {
        match self {
            Cardinality::Optional => "01",
            Cardinality::One => "1",
            Cardinality::Many => "0n",
            Cardinality::AtLeastOne => "1n",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "01" => Some(Cardinality::Optional),
            "1" => Some(Cardinality::One),
            "0n" => Some(Cardinality::Many),
            "1n" => Some(Cardinality::AtLeastOne),
            _ => None,
        }
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relation definition as written in schema JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A foreign-key column definition for a single-valued relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyColumn {
    pub name: String,
    pub nullable: bool,
}

impl ForeignKeyColumn {
    /// Column definition fragment for `CREATE TABLE`.
    pub fn column_sql(&self) -> String {
        let null = if self.nullable { "NULL" } else { "NOT NULL" };
        format!("{} INTEGER {null}", quote(&self.name))
    }
}

/// A typed reference from an owning entity to a target entity.
///
/// The target is only a name; it is looked up in the registry when needed,
/// so entities may be defined in any order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    name: String,
    cardinality: Cardinality,
    target: String,
    title: Option<String>,
    source_column: String,
    target_column: String,
}

impl Relation {
    /// Parses a relation of entity `owner` from its JSON definition.
    pub fn from_json(owner: &str, def: &Value) -> Result<Self, SchemaError> {
        let raw: RelationDef = serde_json::from_value(def.clone())?;
        let missing = |key| SchemaError::MissingKey {
            kind: "relation",
            key,
            definition: def.to_string(),
        };
        let name = raw.name.ok_or_else(|| missing("name"))?;
        let type_name = raw.type_name.ok_or_else(|| missing("type"))?;
        let target = raw.target.ok_or_else(|| missing("target"))?;
        validate_name(&name)?;
        validate_name(&target)?;

        let cardinality =
            Cardinality::parse(&type_name).ok_or_else(|| SchemaError::UnknownCardinality {
                name: name.clone(),
                type_name,
            })?;

        let (source_column, target_column) = if owner == target {
            (format!("{owner}_1"), format!("{owner}_2"))
        } else {
            (owner.to_string(), target.clone())
        };

        Ok(Self {
            name,
            cardinality,
            target,
            title: raw.title,
            source_column,
            target_column,
        })
    }

    pub fn to_def(&self) -> RelationDef {
        RelationDef {
            name: Some(self.name.clone()),
            type_name: Some(self.cardinality.as_str().to_string()),
            target: Some(self.target.clone()),
            title: self.title.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Name of the target entity.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    pub fn is_mandatory(&self) -> bool {
        matches!(self.cardinality, Cardinality::One | Cardinality::AtLeastOne)
    }

    pub fn is_multi(&self) -> bool {
        matches!(self.cardinality, Cardinality::Many | Cardinality::AtLeastOne)
    }

    /// Name of the link table backing a multi-valued relation.
    pub fn link_table(&self) -> &str {
        &self.name
    }

    /// Link table columns: (owning record ID, target record ID).
    ///
    /// Self-references get `<entity>_1`/`<entity>_2` so the two columns
    /// don't collide.
    pub fn link_columns(&self) -> (&str, &str) {
        (&self.source_column, &self.target_column)
    }

    /// The FK column on the owning table, for single-valued relations only.
    pub fn foreign_key_column(&self) -> Option<ForeignKeyColumn> {
        match self.cardinality {
            Cardinality::Optional => Some(ForeignKeyColumn {
                name: self.name.clone(),
                nullable: true,
            }),
            Cardinality::One => Some(ForeignKeyColumn {
                name: self.name.clone(),
                nullable: false,
            }),
            Cardinality::Many | Cardinality::AtLeastOne => None,
        }
    }
}

impl Serialize for Relation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_def().serialize(serializer)
    }
}
