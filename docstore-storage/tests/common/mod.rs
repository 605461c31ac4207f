#![allow(dead_code)]

use docstore_model::{Document, EntitySchema};
use docstore_storage::{Engine, WriteMeta};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

/// Routes `tracing` output to the test harness; `RUST_LOG` controls the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn doc(v: Value) -> Document {
    match v {
        Value::Object(map) => map,
        other => panic!("not a document: {other}"),
    }
}

pub fn schema(name: &str, def: Value) -> EntitySchema {
    EntitySchema::from_json(name, &def).unwrap()
}

pub fn engine() -> Engine {
    init_tracing();
    Engine::open_in_memory().unwrap()
}

pub fn book_schema() -> EntitySchema {
    schema(
        "book",
        json!({
            "attr": [
                {"name": "name", "type": "str", "ind": true, "mand": true},
                {"name": "yr", "type": "int", "ind": true}
            ]
        }),
    )
}

/// Engine with a `book` entity holding the given `(name, yr)` rows.
pub fn books(rows: &[(&str, i64)]) -> Engine {
    let mut engine = engine();
    engine.entity_create(book_schema()).unwrap();
    let book = engine.entity("book").unwrap();
    for (name, yr) in rows {
        book.insert(doc(json!({"name": name, "yr": yr})), WriteMeta::default())
            .unwrap();
    }
    engine
}

/// Organisations, people employed by them and books written by people.
///
/// IDs: org 1 Princeton, 2 Stanford, 3 Harvard, 4 Bell Labs; person
/// 1 Knuth, 2 Ritchie, 3 Kernighan; book 1 TAOCP, 2 The C Programming
/// Language.
pub fn library() -> Engine {
    let mut engine = engine();
    engine
        .entity_create(schema(
            "org",
            json!({"attr": [{"name": "name", "type": "str", "ind": true, "mand": true}]}),
        ))
        .unwrap();
    engine
        .entity_create(schema(
            "person",
            json!({
                "header": ["last_name", "first_name"],
                "attr": [
                    {"name": "last_name", "type": "str", "ind": true, "mand": true},
                    {"name": "first_name", "type": "str"}
                ],
                "rel": [{"name": "employer", "type": "0n", "target": "org"}]
            }),
        ))
        .unwrap();
    engine
        .entity_create(schema(
            "book",
            json!({
                "attr": [
                    {"name": "name", "type": "str", "ind": true, "mand": true},
                    {"name": "yr", "type": "int", "ind": true}
                ],
                "rel": [{"name": "author", "type": "1n", "target": "person"}]
            }),
        ))
        .unwrap();

    let org = engine.entity("org").unwrap();
    for name in ["Princeton", "Stanford", "Harvard", "Bell Labs"] {
        org.insert(doc(json!({"name": name})), WriteMeta::default())
            .unwrap();
    }
    let person = engine.entity("person").unwrap();
    for (last, first, employer) in [
        ("Knuth", "Donald", json!([2])),
        ("Ritchie", "Dennis", json!([3, 4])),
        ("Kernighan", "Brian", json!([1, 4])),
    ] {
        person
            .insert(
                doc(json!({"last_name": last, "first_name": first, "employer": employer})),
                WriteMeta::default(),
            )
            .unwrap();
    }
    let book = engine.entity("book").unwrap();
    book.insert(
        doc(json!({"name": "The Art of Computer Programming", "yr": 1968, "author": [1]})),
        WriteMeta::default(),
    )
    .unwrap();
    book.insert(
        doc(json!({"name": "The C Programming Language", "yr": 1978, "author": [2, 3]})),
        WriteMeta::default(),
    )
    .unwrap();
    engine
}
