use docstore_model::{Cardinality, ForeignKeyColumn, Relation, SchemaError};
use pretty_assertions::assert_eq;
use serde_json::json;

fn rel(owner: &str, ty: &str, target: &str) -> Relation {
    Relation::from_json(owner, &json!({"name": "link", "type": ty, "target": target})).unwrap()
}

// ── Cardinality ──────────────────────────────────────────────────

#[test]
fn cardinality_flags() {
    let cases = [
        ("01", false, false),
        ("1", true, false),
        ("0n", false, true),
        ("1n", true, true),
    ];
    for (ty, mandatory, multi) in cases {
        let r = rel("book", ty, "author");
        assert_eq!(r.is_mandatory(), mandatory, "{ty}");
        assert_eq!(r.is_multi(), multi, "{ty}");
        assert_eq!(r.cardinality().as_str(), ty);
    }
}

#[test]
fn unknown_cardinality_is_rejected() {
    let err = Relation::from_json("book", &json!({"name": "r", "type": "n1", "target": "a"}))
        .unwrap_err();
    assert_eq!(
        err,
        SchemaError::UnknownCardinality {
            name: "r".into(),
            type_name: "n1".into()
        }
    );
    assert_eq!(Cardinality::parse("2"), None);
}

#[test]
fn missing_keys_are_reported() {
    for (def, key) in [
        (json!({"type": "1", "target": "a"}), "name"),
        (json!({"name": "r", "target": "a"}), "type"),
        (json!({"name": "r", "type": "1"}), "target"),
    ] {
        let err = Relation::from_json("book", &def).unwrap_err();
        assert!(
            matches!(err, SchemaError::MissingKey { kind: "relation", key: k, .. } if k == key),
            "{def}"
        );
    }
}

#[test]
fn target_must_be_a_valid_name() {
    let err = Relation::from_json("book", &json!({"name": "r", "type": "1", "target": "a b"}))
        .unwrap_err();
    assert_eq!(err, SchemaError::InvalidName("a b".into()));
}

// ── Storage naming ───────────────────────────────────────────────

#[test]
fn link_table_is_named_after_relation() {
    let r = rel("book", "0n", "author");
    assert_eq!(r.link_table(), "link");
    assert_eq!(r.link_columns(), ("book", "author"));
}

#[test]
fn self_reference_gets_distinct_link_columns() {
    let r = rel("person", "0n", "person");
    assert_eq!(r.link_columns(), ("person_1", "person_2"));
}

#[test]
fn foreign_key_column_for_single_relations_only() {
    assert_eq!(
        rel("book", "01", "author").foreign_key_column(),
        Some(ForeignKeyColumn {
            name: "link".into(),
            nullable: true
        })
    );
    let fk = rel("book", "1", "author").foreign_key_column().unwrap();
    assert!(!fk.nullable);
    assert_eq!(fk.column_sql(), "\"link\" INTEGER NOT NULL");
    assert_eq!(rel("book", "0n", "author").foreign_key_column(), None);
    assert_eq!(rel("book", "1n", "author").foreign_key_column(), None);
}

#[test]
fn title_falls_back_to_name() {
    assert_eq!(rel("book", "1", "author").title(), "link");
    let titled = Relation::from_json(
        "book",
        &json!({"name": "author", "type": "1", "target": "person", "title": "Written by"}),
    )
    .unwrap();
    assert_eq!(titled.title(), "Written by");
    assert_eq!(titled.target(), "person");
}

#[test]
fn to_def_round_trips() {
    let r = rel("book", "1n", "author");
    let back = Relation::from_json("book", &serde_json::to_value(&r).unwrap()).unwrap();
    assert_eq!(back, r);
}
