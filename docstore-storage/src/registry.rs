//! The schema registry: every entity definition plus a version stamp.

use docstore_model::{EntitySchema, Relation, SchemaError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Serialize)]
struct RegistryDef<'a> {
    version: i64,
    entities: &'a BTreeMap<String, EntitySchema>,
}

#[derive(Deserialize)]
struct RawRegistry {
    #[serde(default)]
    entities: BTreeMap<String, Value>,
}

/// In-memory copy of the persisted schema registry.
///
/// The version is the one read from the registry row, so comparing it with
/// the stored version tells whether this copy is stale.
#[derive(Debug, Clone, PartialEq)]
pub struct Registry {
    version: i64,
    entities: BTreeMap<String, EntitySchema>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            version: 1,
            entities: BTreeMap::new(),
        }
    }
}

impl Registry {
    /// Parses the serialized registry blob stored under `version`.
    pub fn parse(json: &str, version: i64) -> Result<Self, SchemaError> {
        let raw: RawRegistry = serde_json::from_str(json)?;
        let entities: BTreeMap<String, EntitySchema> = raw
            .entities
            .iter()
            .map(|(name, def)| Ok((name.clone(), EntitySchema::from_json(name, def)?)))
            .collect::<Result<_, SchemaError>>()?;
        Ok(Self { version, entities })
    }

    /// Serializes the registry into its stored form.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&RegistryDef {
            version: self.version,
            entities: &self.entities,
        })
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn entity(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.get(name)
    }

    /// Entity names in sorted order.
    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntitySchema> {
        self.entities.values()
    }

    /// Every relation, of any entity, whose target is `name`.
    pub fn relations_targeting(&self, name: &str) -> Vec<(&EntitySchema, &Relation)> {
        self.entities
            .values()
            .flat_map(|e| e.relations().iter().map(move |r| (e, r)))
            .filter(|(_, r)| r.target() == name)
            .collect()
    }

    /// Copy with `schema` added and the version advanced.
    pub(crate) fn with_entity(&self, schema: EntitySchema) -> Self {
        let mut next = self.clone();
        next.entities.insert(schema.name().to_string(), schema);
        next.version += 1;
        next
    }

    /// Copy with entity `name` removed and the version advanced.
    pub(crate) fn without_entity(&self, name: &str) -> Self {
        let mut next = self.clone();
        next.entities.remove(name);
        next.version += 1;
        next
    }
}
