//! Schema model for docstore.
//!
//! Defines the pure, connection-free half of the document store:
//! - [`Attribute`]: a typed scalar field and its SQL value coding
//! - [`Relation`]: a typed reference to another entity (FK column or link table)
//! - [`EntitySchema`]: the attribute/relation container behind every table,
//!   its DDL, and the projection of a logical document onto a physical row
//!
//! Nothing here touches a database. The storage crate binds these types to a
//! connection and a schema registry.

mod attribute;
mod ddl;
mod document;
mod entity;
mod error;
pub mod ident;
mod relation;

pub use attribute::{sql_to_json, Attribute, AttributeDef, AttributeType, MAX_SET_VALUES};
pub use ddl::{IndexDdl, TableDdl};
pub use document::{Document, LinkRows, PhysicalRow, SYNTHESIZED_KEYS};
pub use entity::{EntitySchema, Field, DATA_COLUMN, DELETED_COLUMN, HEADER_KEY, ID_COLUMN};
pub use error::{NotFound, SchemaError, ValidationError, ValueError, Violation, ViolationKind};
pub use relation::{Cardinality, ForeignKeyColumn, Relation, RelationDef};
