//! Entity schemas: the attribute/relation container behind every table.

use crate::attribute::{Attribute, AttributeDef};
use crate::ddl::{IndexDdl, TableDdl};
use crate::error::{NotFound, SchemaError};
use crate::ident::{qualified, quote, validate_name};
use crate::relation::{Relation, RelationDef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Primary key column of every entity table.
pub const ID_COLUMN: &str = "_id";
/// Serialized JSON document column.
pub const DATA_COLUMN: &str = "_data";
/// Soft-delete flag column.
pub const DELETED_COLUMN: &str = "_deleted";
/// Synthesized label key in read output.
pub const HEADER_KEY: &str = "_header";

/// Either kind of entity field, looked up by name.
#[derive(Debug, Clone, Copy)]
pub enum Field<'a> {
    Attribute(&'a Attribute),
    Relation(&'a Relation),
}

#[derive(Deserialize)]
struct RawEntity {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    header: Option<Vec<String>>,
    #[serde(default)]
    attr: Vec<Value>,
    #[serde(default)]
    rel: Vec<Value>,
}

#[derive(Serialize)]
struct EntityDef<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    header: Option<Vec<&'a str>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attr: Vec<AttributeDef>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    rel: Vec<RelationDef>,
}

/// The schema of one entity: its attributes, relations and header.
///
/// An `EntitySchema` carries no connection state. It knows how its records
/// are laid out in SQL and how a document maps onto that layout; binding it
/// to a database is the storage layer's job.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySchema {
    name: String,
    title: Option<String>,
    attributes: Vec<Attribute>,
    relations: Vec<Relation>,
    /// Indexes into `attributes`.
    header: Vec<usize>,
}

impl EntitySchema {
    /// Parses an entity definition.
    ///
    /// Attributes are parsed first, then the header (which refers to
    /// attributes), then relations.
    pub fn from_json(name: &str, def: &Value) -> Result<Self, SchemaError> {
        validate_name(name)?;
        if !def.is_object() {
            return Err(SchemaError::Malformed(format!(
                "entity {name:?} definition must be an object"
            )));
        }
        let raw: RawEntity = serde_json::from_value(def.clone())?;

        let mut seen = HashSet::new();
        let mut attributes = Vec::with_capacity(raw.attr.len());
        for a in &raw.attr {
            let attr = Attribute::from_json(a)?;
            if !seen.insert(attr.name().to_string()) {
                return Err(SchemaError::Duplicate(attr.name().to_string()));
            }
            attributes.push(attr);
        }

        let header = match raw.header {
            None => {
                let idx = attributes
                    .iter()
                    .position(|a| a.name() == "name")
                    .ok_or_else(|| SchemaError::MissingHeader(name.to_string()))?;
                vec![idx]
            }
            Some(fields) => {
                if fields.is_empty() {
                    return Err(SchemaError::MissingHeader(name.to_string()));
                }
                fields
                    .iter()
                    .map(|f| {
                        attributes
                            .iter()
                            .position(|a| a.name() == f)
                            .ok_or_else(|| SchemaError::UnknownHeaderField(f.clone()))
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        let mut relations = Vec::with_capacity(raw.rel.len());
        for r in &raw.rel {
            let rel = Relation::from_json(name, r)?;
            if !seen.insert(rel.name().to_string()) {
                return Err(SchemaError::Duplicate(rel.name().to_string()));
            }
            relations.push(rel);
        }

        Ok(Self {
            name: name.to_string(),
            title: raw.title,
            attributes,
            relations,
            header,
        })
    }

    /// Serializes back into the definition format accepted by
    /// [`EntitySchema::from_json`]. A default header is left out.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Header attributes in declared order.
    pub fn header(&self) -> impl Iterator<Item = &Attribute> {
        self.header.iter().map(|&i| &self.attributes[i])
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name() == name)
    }

    pub fn attr_or_fail(&self, name: &str) -> Result<&Attribute, NotFound> {
        self.attr(name).ok_or_else(|| NotFound::new("attribute", name))
    }

    pub fn rel(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name() == name)
    }

    pub fn rel_or_fail(&self, name: &str) -> Result<&Relation, NotFound> {
        self.rel(name).ok_or_else(|| NotFound::new("relation", name))
    }

    pub fn field(&self, name: &str) -> Option<Field<'_>> {
        self.attr(name)
            .map(Field::Attribute)
            .or_else(|| self.rel(name).map(Field::Relation))
    }

    pub fn history_table(&self) -> String {
        format!("{}_h", self.name)
    }

    /// Every table this entity owns: primary, history and link tables.
    pub fn table_names(&self) -> Vec<String> {
        let mut names = vec![self.name.clone(), self.history_table()];
        names.extend(
            self.relations
                .iter()
                .filter(|r| r.is_multi())
                .map(|r| r.link_table().to_string()),
        );
        names
    }

    /// SQL expression reading attribute `attr` of the row aliased `alias`.
    ///
    /// Indexed attributes have a real column; the rest are extracted from
    /// the JSON document.
    pub fn column_expr(alias: &str, attr: &Attribute) -> String {
        if attr.is_indexed() {
            qualified(alias, attr.name())
        } else {
            format!(
                "json_extract({}, '$.{}')",
                qualified(alias, DATA_COLUMN),
                attr.name()
            )
        }
    }

    /// SQL expression producing the header label of the row aliased `alias`.
    ///
    /// A single header attribute is used as is; several are joined with a
    /// single space.
    pub fn header_expression(&self, alias: &str) -> String {
        let parts: Vec<String> = self
            .header()
            .map(|a| Self::column_expr(alias, a))
            .collect();
        if parts.len() == 1 {
            parts[0].clone()
        } else {
            parts.join(" || ' ' || ")
        }
    }

    /// Primary table layout.
    pub fn schema_ddl(&self) -> TableDdl {
        let table = self.name.as_str();
        let mut ddl = TableDdl::new(table)
            .column(format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote(ID_COLUMN)))
            .column(format!("{} TEXT NOT NULL", quote(DATA_COLUMN)))
            .column(format!("{} INTEGER NOT NULL DEFAULT 0", quote(DELETED_COLUMN)))
            .index(IndexDdl::new(table, DELETED_COLUMN));

        for a in self.attributes.iter().filter(|a| a.is_indexed()) {
            ddl = ddl
                .column(format!("{} {}", quote(a.name()), a.sql_type()))
                .index(IndexDdl::new(table, a.name()));
            if a.is_unique() {
                ddl = ddl.index(IndexDdl::unique(table, a.name()));
            }
        }

        for fk in self.relations.iter().filter_map(Relation::foreign_key_column) {
            ddl = ddl
                .column(fk.column_sql())
                .index(IndexDdl::new(table, &fk.name));
        }

        ddl
    }

    /// History table layout.
    pub fn history_ddl(&self) -> TableDdl {
        let table = self.history_table();
        TableDdl::new(&table)
            .column("\"hid\" INTEGER PRIMARY KEY AUTOINCREMENT")
            .column(format!("{} INTEGER NOT NULL", quote(ID_COLUMN)))
            .column(format!("{} TEXT NOT NULL", quote(DATA_COLUMN)))
            .column("\"ts\" INTEGER NOT NULL")
            .column("\"user_id\" INTEGER NULL")
            .index(IndexDdl::new(&table, ID_COLUMN))
    }

    /// Link table layout of a multi-valued relation; `None` for single ones.
    pub fn link_ddl(&self, rel: &Relation) -> Option<TableDdl> {
        if !rel.is_multi() {
            return None;
        }
        let table = rel.link_table();
        let (c1, c2) = rel.link_columns();
        Some(
            TableDdl::new(table)
                .column(format!("{} INTEGER NOT NULL", quote(c1)))
                .column(format!("{} INTEGER NOT NULL", quote(c2)))
                .column(format!("PRIMARY KEY ({}, {})", quote(c1), quote(c2)))
                .index(IndexDdl::new(table, c1))
                .index(IndexDdl::new(table, c2)),
        )
    }

    /// Every table definition of this entity, primary table first.
    pub fn all_ddl(&self) -> Vec<TableDdl> {
        let mut tables = vec![self.schema_ddl(), self.history_ddl()];
        tables.extend(self.relations.iter().filter_map(|r| self.link_ddl(r)));
        tables
    }
}

impl Serialize for EntitySchema {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let default_header = self.header.len() == 1
            && self.attributes[self.header[0]].name() == "name";
        EntityDef {
            title: self.title.as_deref(),
            header: (!default_header).then(|| self.header().map(Attribute::name).collect()),
            attr: self.attributes.iter().map(Attribute::to_def).collect(),
            rel: self.relations.iter().map(Relation::to_def).collect(),
        }
        .serialize(serializer)
    }
}
