use docstore_model::{EntitySchema, Field, SchemaError};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

fn book_def() -> Value {
    json!({
        "title": "Books",
        "attr": [
            {"name": "name", "type": "str", "ind": true, "mand": true},
            {"name": "yr", "type": "int", "ind": true},
            {"name": "isbn", "type": "str", "len": 13, "ind": true, "uniq": true},
            {"name": "blurb", "type": "text"}
        ],
        "rel": [
            {"name": "publisher", "type": "01", "target": "company"},
            {"name": "authors", "type": "1n", "target": "person"}
        ]
    })
}

fn book() -> EntitySchema {
    EntitySchema::from_json("book", &book_def()).unwrap()
}

// ── Parsing ──────────────────────────────────────────────────────

#[test]
fn parses_attributes_and_relations_in_order() {
    let e = book();
    assert_eq!(e.name(), "book");
    assert_eq!(e.title(), "Books");
    let attrs: Vec<&str> = e.attributes().iter().map(|a| a.name()).collect();
    assert_eq!(attrs, ["name", "yr", "isbn", "blurb"]);
    let rels: Vec<&str> = e.relations().iter().map(|r| r.name()).collect();
    assert_eq!(rels, ["publisher", "authors"]);
}

#[test]
fn default_header_is_name_attribute() {
    let e = book();
    let header: Vec<&str> = e.header().map(|a| a.name()).collect();
    assert_eq!(header, ["name"]);
}

#[test]
fn missing_name_without_header_is_rejected() {
    let err = EntitySchema::from_json("t", &json!({"attr": [{"name": "x", "type": "int"}]}))
        .unwrap_err();
    assert_eq!(err, SchemaError::MissingHeader("t".into()));
}

#[test]
fn empty_explicit_header_is_rejected() {
    let err = EntitySchema::from_json(
        "t",
        &json!({"header": [], "attr": [{"name": "name", "type": "str"}]}),
    )
    .unwrap_err();
    assert_eq!(err, SchemaError::MissingHeader("t".into()));
}

#[test]
fn header_must_reference_declared_attributes() {
    let err = EntitySchema::from_json(
        "t",
        &json!({"header": ["first", "last"], "attr": [{"name": "first", "type": "str"}]}),
    )
    .unwrap_err();
    assert_eq!(err, SchemaError::UnknownHeaderField("last".into()));
}

#[test]
fn header_cannot_reference_relations() {
    let err = EntitySchema::from_json(
        "t",
        &json!({
            "header": ["owner"],
            "attr": [{"name": "name", "type": "str"}],
            "rel": [{"name": "owner", "type": "1", "target": "person"}]
        }),
    )
    .unwrap_err();
    assert_eq!(err, SchemaError::UnknownHeaderField("owner".into()));
}

#[test]
fn attributes_and_relations_share_a_namespace() {
    let err = EntitySchema::from_json(
        "t",
        &json!({
            "attr": [{"name": "name", "type": "str"}, {"name": "owner", "type": "int"}],
            "rel": [{"name": "owner", "type": "1", "target": "person"}]
        }),
    )
    .unwrap_err();
    assert_eq!(err, SchemaError::Duplicate("owner".into()));
}

#[test]
fn duplicate_attribute_is_rejected() {
    let err = EntitySchema::from_json(
        "t",
        &json!({"attr": [{"name": "name", "type": "str"}, {"name": "name", "type": "int"}]}),
    )
    .unwrap_err();
    assert_eq!(err, SchemaError::Duplicate("name".into()));
}

#[test]
fn invalid_entity_name_is_rejected() {
    let err = EntitySchema::from_json("my table", &json!({"attr": [{"name": "name", "type": "str"}]}))
        .unwrap_err();
    assert_eq!(err, SchemaError::InvalidName("my table".into()));
}

#[test]
fn non_object_definition_is_malformed() {
    let err = EntitySchema::from_json("t", &json!([1, 2])).unwrap_err();
    assert!(matches!(err, SchemaError::Malformed(_)));
}

#[test]
fn to_json_round_trips_and_omits_default_header() {
    let e = book();
    let json = e.to_json();
    assert!(json.get("header").is_none());
    assert_eq!(EntitySchema::from_json("book", &json).unwrap(), e);
}

#[test]
fn to_json_keeps_explicit_header() {
    let def = json!({
        "header": ["first", "last"],
        "attr": [{"name": "first", "type": "str"}, {"name": "last", "type": "str"}]
    });
    let e = EntitySchema::from_json("person", &def).unwrap();
    assert_eq!(e.to_json()["header"], json!(["first", "last"]));
    assert_eq!(EntitySchema::from_json("person", &e.to_json()).unwrap(), e);
}

// ── Lookups ──────────────────────────────────────────────────────

#[test]
fn field_lookup_distinguishes_kinds() {
    let e = book();
    assert!(matches!(e.field("yr"), Some(Field::Attribute(_))));
    assert!(matches!(e.field("authors"), Some(Field::Relation(_))));
    assert!(e.field("nope").is_none());
    assert!(e.attr_or_fail("authors").is_err());
    assert_eq!(e.rel_or_fail("nope").unwrap_err().to_string(), "relation \"nope\" not found");
}

#[test]
fn table_names_cover_history_and_links() {
    assert_eq!(book().table_names(), ["book", "book_h", "authors"]);
}

// ── DDL ──────────────────────────────────────────────────────────

#[test]
fn schema_ddl_layout() {
    let ddl = book().schema_ddl();
    assert_eq!(
        ddl.create_table_sql(),
        "CREATE TABLE \"book\" (\
         \"_id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
         \"_data\" TEXT NOT NULL, \
         \"_deleted\" INTEGER NOT NULL DEFAULT 0, \
         \"name\" VARCHAR(256), \
         \"yr\" INTEGER, \
         \"isbn\" VARCHAR(13), \
         \"publisher\" INTEGER NULL)"
    );
    let indexes: Vec<String> = ddl.indexes.iter().map(|i| i.to_sql()).collect();
    assert_eq!(
        indexes,
        [
            "CREATE INDEX \"book._deleted.idx\" ON \"book\" (\"_deleted\")",
            "CREATE INDEX \"book.name.idx\" ON \"book\" (\"name\")",
            "CREATE INDEX \"book.yr.idx\" ON \"book\" (\"yr\")",
            "CREATE INDEX \"book.isbn.idx\" ON \"book\" (\"isbn\")",
            "CREATE UNIQUE INDEX \"book.isbn.uniq\" ON \"book\" (\"isbn\")",
            "CREATE INDEX \"book.publisher.idx\" ON \"book\" (\"publisher\")",
        ]
    );
}

#[test]
fn history_ddl_layout() {
    let ddl = book().history_ddl();
    assert_eq!(ddl.table, "book_h");
    assert_eq!(
        ddl.create_table_sql(),
        "CREATE TABLE \"book_h\" (\"hid\" INTEGER PRIMARY KEY AUTOINCREMENT, \
         \"_id\" INTEGER NOT NULL, \"_data\" TEXT NOT NULL, \
         \"ts\" INTEGER NOT NULL, \"user_id\" INTEGER NULL)"
    );
}

#[test]
fn link_ddl_only_for_multi_relations() {
    let e = book();
    assert!(e.link_ddl(e.rel("publisher").unwrap()).is_none());
    let ddl = e.link_ddl(e.rel("authors").unwrap()).unwrap();
    assert_eq!(
        ddl.create_table_sql(),
        "CREATE TABLE \"authors\" (\"book\" INTEGER NOT NULL, \"person\" INTEGER NOT NULL, \
         PRIMARY KEY (\"book\", \"person\"))"
    );
    assert_eq!(ddl.indexes.len(), 2);
    assert_eq!(e.all_ddl().len(), 3);
}

#[test]
fn self_link_ddl_uses_numbered_columns() {
    let e = EntitySchema::from_json(
        "node",
        &json!({
            "attr": [{"name": "name", "type": "str"}],
            "rel": [{"name": "edges", "type": "0n", "target": "node"}]
        }),
    )
    .unwrap();
    let ddl = e.link_ddl(e.rel("edges").unwrap()).unwrap();
    assert!(ddl.create_table_sql().contains("\"node_1\" INTEGER NOT NULL, \"node_2\""));
}

// ── Header expression ────────────────────────────────────────────

#[test]
fn single_indexed_header_is_bare_column() {
    assert_eq!(book().header_expression("book"), "\"book\".\"name\"");
}

#[test]
fn multi_field_header_joins_with_space_and_reads_json() {
    let e = EntitySchema::from_json(
        "person",
        &json!({
            "header": ["first", "last"],
            "attr": [{"name": "first", "type": "str", "ind": true}, {"name": "last", "type": "str"}]
        }),
    )
    .unwrap();
    assert_eq!(
        e.header_expression("p"),
        "\"p\".\"first\" || ' ' || json_extract(\"p\".\"_data\", '$.last')"
    );
}
