mod common;

use common::{books, doc, engine, library, schema};
use docstore_storage::{Condition, ListQuery, Operator, QueryOptions, StorageError, WriteMeta};
use pretty_assertions::assert_eq;
use rusqlite::types::Value as SqlValue;
use serde_json::{Value, json};

fn names(set: &docstore_storage::RecordSet) -> Vec<String> {
    set.iter()
        .map(|r| r.get("name").and_then(Value::as_str).unwrap_or_default().to_string())
        .collect()
}

// ── Pagination ───────────────────────────────────────────────────

#[test]
fn one_record_per_page_over_five_rows() {
    let engine = books(&[("a", 1), ("b", 2), ("c", 3), ("d", 4), ("e", 5)]);
    let book = engine.entity("book").unwrap();

    for page in 1..=5u32 {
        let set = book
            .list(&QueryOptions::new().page(page).per_page(1))
            .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.current_page(), page);
        assert_eq!(set.total_pages(), 5);
        assert_eq!(set.total_count(), 5);
    }

    let past_end = book
        .list(&QueryOptions::new().page(6).per_page(1))
        .unwrap();
    assert!(past_end.is_empty());
    assert_eq!(past_end.total_pages(), 5);
}

#[test]
fn default_page_size_is_ten() {
    let rows: Vec<(String, i64)> = (0..25).map(|i| (format!("b{i:02}"), i)).collect();
    let refs: Vec<(&str, i64)> = rows.iter().map(|(n, y)| (n.as_str(), *y)).collect();
    let engine = books(&refs);
    let book = engine.entity("book").unwrap();

    let last = book.list(&QueryOptions::new().page(3)).unwrap();
    assert_eq!(last.len(), 5);
    assert_eq!(last.total_pages(), 3);
    assert_eq!(names(&last)[0], "b20");
}

#[test]
fn page_zero_is_clamped_to_first_page() {
    let engine = books(&[("a", 1), ("b", 2)]);
    let set = engine
        .entity("book")
        .unwrap()
        .list(&QueryOptions::new().page(0).per_page(0))
        .unwrap();
    assert_eq!(set.current_page(), 1);
    assert_eq!(names(&set), ["a"]);
    assert_eq!(set.total_pages(), 2);
}

#[test]
fn unpaginated_list_is_a_single_page() {
    let engine = books(&[("a", 1), ("b", 2), ("c", 3)]);
    let set = engine
        .entity("book")
        .unwrap()
        .list(&QueryOptions::new())
        .unwrap();
    assert_eq!(set.current_page(), 1);
    assert_eq!(set.total_pages(), 1);
    assert_eq!(set.total_count(), 3);
}

#[test]
fn empty_paginated_result_has_no_pages() {
    let engine = books(&[]);
    let set = engine
        .entity("book")
        .unwrap()
        .list(&QueryOptions::new().page(1))
        .unwrap();
    assert_eq!(set.total_count(), 0);
    assert_eq!(set.total_pages(), 0);
}

// ── Conditions ───────────────────────────────────────────────────

#[test]
fn between_selects_inclusive_range() {
    let engine = books(&[
        ("a", 1912),
        ("b", 1980),
        ("c", 1983),
        ("d", 1989),
        ("e", 2005),
    ]);
    let book = engine.entity("book").unwrap();
    let set = book
        .list(&QueryOptions::new().filter("yr", Condition::between(1980, 1985)))
        .unwrap();
    assert_eq!(names(&set), ["b", "c"]);

    let open_ended = book
        .list(&QueryOptions::new().filter("yr", Condition::at_least(1989)))
        .unwrap();
    assert_eq!(names(&open_ended), ["d", "e"]);
}

#[test]
fn empty_in_matches_nothing() {
    let engine = books(&[("a", 1), ("b", 2)]);
    let book = engine.entity("book").unwrap();
    let options = QueryOptions::new().filter("yr", Condition::is_in(Vec::<i64>::new()));
    assert!(book.list(&options).unwrap().is_empty());

    let query = ListQuery::new(book.schema(), engine.registry(), &options).unwrap();
    assert_eq!(
        query.where_clause(),
        " WHERE 1=0 AND \"book\".\"_deleted\" = 0"
    );
}

#[test]
fn in_list_and_comparisons() {
    let engine = books(&[("a", 1), ("b", 2), ("c", 3), ("d", 4)]);
    let book = engine.entity("book").unwrap();

    let set = book
        .list(&QueryOptions::new().filter("yr", Condition::is_in([1, 3, 9])))
        .unwrap();
    assert_eq!(names(&set), ["a", "c"]);

    let set = book
        .list(
            &QueryOptions::new()
                .filter("yr", Condition::gt(1))
                .filter("name", Condition::ne("c")),
        )
        .unwrap();
    assert_eq!(names(&set), ["b", "d"]);

    let set = book
        .list(&QueryOptions::new().filter("name", Condition::like("%d")))
        .unwrap();
    assert_eq!(names(&set), ["d"]);
}

#[test]
fn fully_open_range_adds_no_predicate() {
    let engine = books(&[("a", 1)]);
    let book = engine.entity("book").unwrap();
    let options = QueryOptions::new().filter(
        "yr",
        Condition::Range {
            from: None,
            to: None,
        },
    );
    let query = ListQuery::new(book.schema(), engine.registry(), &options).unwrap();
    assert_eq!(query.where_clause(), " WHERE \"book\".\"_deleted\" = 0");
    assert!(query.params().is_empty());
}

#[test]
fn values_are_bound_not_inlined() {
    let engine = books(&[]);
    let book = engine.entity("book").unwrap();
    let options = QueryOptions::new()
        .filter("name", Condition::eq("x' OR 1=1 --"))
        .filter("yr", Condition::between(1, 2));
    let query = ListQuery::new(book.schema(), engine.registry(), &options).unwrap();
    assert_eq!(
        query.where_clause(),
        " WHERE \"book\".\"name\" = ? AND \"book\".\"yr\" BETWEEN ? AND ? AND \"book\".\"_deleted\" = 0"
    );
    assert_eq!(
        query.params(),
        [
            SqlValue::Text("x' OR 1=1 --".into()),
            SqlValue::Integer(1),
            SqlValue::Integer(2)
        ]
    );
}

#[test]
fn null_equality_compiles_to_is_null() {
    let mut engine = engine();
    engine
        .entity_create(schema(
            "task",
            json!({
                "attr": [{"name": "name", "type": "str"}],
                "rel": [{"name": "owner", "type": "01", "target": "task"}]
            }),
        ))
        .unwrap();
    let task = engine.entity("task").unwrap();
    task.insert(doc(json!({"name": "root"})), WriteMeta::default())
        .unwrap();
    task.insert(doc(json!({"name": "leaf", "owner": 1})), WriteMeta::default())
        .unwrap();

    let roots = task
        .list(&QueryOptions::new().filter("owner", Condition::eq(Value::Null)))
        .unwrap();
    assert_eq!(names(&roots), ["root"]);
    let children = task
        .list(&QueryOptions::new().filter("owner", Condition::ne(Value::Null)))
        .unwrap();
    assert_eq!(names(&children), ["leaf"]);
}

#[test]
fn non_indexed_field_cannot_be_filtered() {
    let mut engine = engine();
    engine
        .entity_create(schema(
            "note",
            json!({"attr": [{"name": "name", "type": "str"}, {"name": "body", "type": "text"}]}),
        ))
        .unwrap();
    let note = engine.entity("note").unwrap();
    let err = note
        .list(&QueryOptions::new().filter("body", Condition::eq("x")))
        .unwrap_err();
    assert!(matches!(err, StorageError::Argument(ref m) if m.contains("not indexed")), "{err}");

    let err = note
        .list(&QueryOptions::new().filter("nope", Condition::eq("x")))
        .unwrap_err();
    assert!(matches!(err, StorageError::Argument(_)));
}

#[test]
fn multi_relation_condition_uses_link_table() {
    let engine = library();
    let person = engine.entity("person").unwrap();
    let options = QueryOptions::new().filter("employer", Condition::eq(4));

    let query = ListQuery::new(person.schema(), engine.registry(), &options).unwrap();
    assert_eq!(
        query.where_clause(),
        " WHERE EXISTS (SELECT 1 FROM \"employer\" WHERE \"employer\".\"person\" = \"person\".\"_id\" \
         AND \"employer\".\"org\" = ?) AND \"person\".\"_deleted\" = 0"
    );

    let set = person.list(&options).unwrap();
    let last: Vec<&Value> = set.iter().filter_map(|r| r.get("last_name")).collect();
    assert_eq!(last, [&json!("Kernighan"), &json!("Ritchie")]);
}

#[test]
fn id_condition_and_count() {
    let engine = books(&[("a", 1), ("b", 2), ("c", 3)]);
    let book = engine.entity("book").unwrap();
    let options = QueryOptions::new().filter("_id", Condition::le(2));
    assert_eq!(book.count(&options).unwrap(), 2);
}

// ── Condition JSON form ──────────────────────────────────────────

#[test]
fn conditions_read_from_json() {
    assert_eq!(Condition::try_from(&json!(5)).unwrap(), Condition::eq(5));
    assert_eq!(
        Condition::try_from(&json!(["!=", "x"])).unwrap(),
        Condition::Compare(Operator::Ne, json!("x"))
    );
    assert_eq!(
        Condition::try_from(&json!(["not like", "a%"])).unwrap(),
        Condition::Compare(Operator::NotLike, json!("a%"))
    );
    assert_eq!(
        Condition::try_from(&json!(["IN", [1, 2]])).unwrap(),
        Condition::is_in([1, 2])
    );
    assert_eq!(
        Condition::try_from(&json!({"from": 1980})).unwrap(),
        Condition::at_least(1980)
    );
    assert_eq!(
        Condition::try_from(&json!({"from": 1, "to": 2})).unwrap(),
        Condition::between(1, 2)
    );
}

#[test]
fn malformed_json_conditions_are_rejected() {
    for bad in [
        json!(["~", 1]),
        json!(["=", 1, 2]),
        json!([1, 2]),
        json!(["IN", 3]),
        json!({"from": 1, "upto": 2}),
    ] {
        assert!(
            matches!(Condition::try_from(&bad), Err(StorageError::Argument(_))),
            "accepted {bad}"
        );
    }
}

#[test]
fn filter_json_builds_conditions_in_order() {
    let engine = books(&[("a", 1980), ("b", 1983), ("c", 1990)]);
    let book = engine.entity("book").unwrap();
    let options = QueryOptions::new()
        .filter_json(&json!({"yr": {"from": 1981}, "name": ["<>", "c"]}))
        .unwrap();
    assert_eq!(names(&book.list(&options).unwrap()), ["b"]);
}

// ── Ordering and projection ──────────────────────────────────────

#[test]
fn default_order_follows_header_fields() {
    let engine = books(&[("c", 1), ("a", 2), ("b", 3)]);
    let set = engine
        .entity("book")
        .unwrap()
        .list(&QueryOptions::new())
        .unwrap();
    assert_eq!(names(&set), ["a", "b", "c"]);
}

#[test]
fn explicit_order_escapes_attributes_and_passes_raw_sql() {
    let engine = books(&[("c", 1), ("a", 2), ("b", 3)]);
    let book = engine.entity("book").unwrap();

    let by_year = book
        .list(&QueryOptions::new().order_by(["yr"]))
        .unwrap();
    assert_eq!(names(&by_year), ["c", "a", "b"]);

    let desc = book
        .list(&QueryOptions::new().order_by(["\"book\".\"yr\" DESC"]))
        .unwrap();
    assert_eq!(names(&desc), ["b", "a", "c"]);
}

#[test]
fn projection_always_carries_header_and_document() {
    let engine = books(&[("Ulysses", 1922)]);
    let book = engine.entity("book").unwrap();
    let set = book
        .list(&QueryOptions::new().fields(["yr"]))
        .unwrap();
    let record = set.first().unwrap();

    let columns: Vec<&str> = record.row().keys().map(String::as_str).collect();
    assert_eq!(columns, ["_data_0", "_header", "yr"]);
    assert_eq!(record.header(), Some(&json!("Ulysses")));
    // Not selected as a column, but read from the document.
    assert_eq!(record.get("name"), Some(&json!("Ulysses")));
}

// ── Resolve mode ─────────────────────────────────────────────────

#[test]
fn resolve_joins_single_relation_targets() {
    let mut engine = engine();
    engine
        .entity_create(schema(
            "city",
            json!({"attr": [{"name": "name", "type": "str", "ind": true}]}),
        ))
        .unwrap();
    engine
        .entity_create(schema(
            "shop",
            json!({
                "attr": [{"name": "name", "type": "str", "ind": true}],
                "rel": [
                    {"name": "location", "type": "1", "target": "city"},
                    {"name": "parent", "type": "01", "target": "shop"}
                ]
            }),
        ))
        .unwrap();
    let city = engine.entity("city").unwrap();
    city.insert(doc(json!({"name": "Oslo"})), WriteMeta::default())
        .unwrap();
    let shop = engine.entity("shop").unwrap();
    shop.insert(doc(json!({"name": "Main", "location": 1})), WriteMeta::default())
        .unwrap();
    shop.insert(
        doc(json!({"name": "Kiosk", "location": 1, "parent": 1})),
        WriteMeta::default(),
    )
    .unwrap();

    let options = QueryOptions::new()
        .fields(["name", "\"location\".\"name\" AS \"city\"", "\"parent\".\"name\" AS \"parent_name\""])
        .resolve(true);
    let set = shop.list(&options).unwrap();
    let rows: Vec<(Value, Value, Value)> = set
        .iter()
        .map(|r| {
            (
                r.row()["name"].clone(),
                r.row()["city"].clone(),
                r.row()["parent_name"].clone(),
            )
        })
        .collect();
    assert_eq!(
        rows,
        [
            (json!("Kiosk"), json!("Oslo"), json!("Main")),
            (json!("Main"), json!("Oslo"), Value::Null),
        ]
    );
}

#[test]
fn resolve_rejects_multi_relations() {
    let engine = library();
    let err = engine
        .entity("person")
        .unwrap()
        .list(&QueryOptions::new().resolve(true))
        .unwrap_err();
    assert!(matches!(err, StorageError::Argument(_)), "{err}");
}
