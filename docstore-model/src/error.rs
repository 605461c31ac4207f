//! Error types for the schema model.

use std::fmt;
use thiserror::Error;

/// Errors raised while parsing an entity, attribute or relation definition.
///
/// These are fatal at load time; a definition that fails here never becomes
/// part of a registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A required key is absent from a definition.
    #[error("invalid {kind} {definition}: no {key}")]
    MissingKey {
        kind: &'static str,
        key: &'static str,
        definition: String,
    },

    /// A name cannot be used as an SQL identifier or is reserved.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// Unknown attribute type.
    #[error("attribute {name:?} has unknown type {type_name:?}")]
    UnknownType { name: String, type_name: String },

    /// Unknown relation cardinality.
    #[error("relation {name:?} has unknown type {type_name:?}")]
    UnknownCardinality { name: String, type_name: String },

    /// Two attributes or relations share a name.
    #[error("duplicate field {0:?}")]
    Duplicate(String),

    /// No explicit header and no `name` attribute to fall back on.
    #[error("entity {0:?} must include attribute \"name\" or specify alternative header fields")]
    MissingHeader(String),

    /// A header field names an attribute that is not declared.
    #[error("header field includes attribute {0:?}, but it doesn't exist")]
    UnknownHeaderField(String),

    /// An enum or set attribute without `values`.
    #[error("attribute {0:?} requires a list of values")]
    MissingValues(String),

    /// A set attribute with more values than fit into its bitmask.
    #[error("set attribute {name:?} declares {count} values, at most 64 are allowed")]
    SetTooLarge { name: String, count: usize },

    /// A unique attribute that is not indexed.
    #[error("attribute {0:?} is unique, so it must be indexed")]
    UniqueNotIndexed(String),

    /// Any other malformed definition.
    #[error("invalid definition: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for SchemaError {
    fn from(e: serde_json::Error) -> Self {
        SchemaError::Malformed(e.to_string())
    }
}

/// Errors raised while converting a document value for storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// A document key that is neither an attribute nor a relation.
    #[error("unknown argument {0:?}")]
    UnknownField(String),

    /// A value of the wrong JSON kind for the field's type.
    #[error("invalid value for {field:?}: expected {expected}, got {got}")]
    WrongType {
        field: String,
        expected: &'static str,
        got: String,
    },

    /// A string longer than the attribute's declared length.
    #[error("value for {field:?} is {len} characters long, at most {max} allowed")]
    TooLong { field: String, len: usize, max: u32 },

    /// A set bitmask with bits beyond the declared values.
    #[error("set value {value} for {field:?} has bits beyond its {count} values")]
    SetOutOfRange { field: String, value: u64, count: usize },

    /// A relation value that cannot be read as a record ID.
    #[error("unable to parse value for relation {relation:?}: {value}")]
    InvalidRelation { relation: String, value: String },

    /// More than one target for a single-valued relation.
    #[error("relation {relation:?} is single, but got {count} values")]
    TooManyTargets { relation: String, count: usize },
}

/// Why a mandatory field failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    Missing,
    Empty,
}

/// A single mandatory-field violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    /// `true` for relations, `false` for attributes.
    pub relation: bool,
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = if self.relation { "relation" } else { "attribute" };
        let state = match self.kind {
            ViolationKind::Missing => "missing",
            ViolationKind::Empty => "empty",
        };
        write!(f, "mandatory {what} {:?} is {state}", self.field)
    }
}

/// Every mandatory-field violation of one write, reported together.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed: {}", join_violations(.0))]
pub struct ValidationError(pub Vec<Violation>);

impl ValidationError {
    /// Returns true if some violation concerns `field`.
    pub fn mentions(&self, field: &str) -> bool {
        self.0.iter().any(|v| v.field == field)
    }

    pub fn violations(&self) -> &[Violation] {
        &self.0
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A named attribute or relation that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} {name:?} not found")]
pub struct NotFound {
    pub kind: &'static str,
    pub name: String,
}

impl NotFound {
    pub fn new(kind: &'static str, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
        }
    }
}
