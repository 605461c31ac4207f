mod common;

use common::{books, doc, init_tracing};
use docstore_storage::{QueryOptions, Record, RecordSet};
use pretty_assertions::assert_eq;
use serde_json::json;

// ── Record ───────────────────────────────────────────────────────

#[test]
fn columns_win_over_document_fields() {
    let record = Record::new(doc(json!({
        "_id": 4,
        "name": "column",
        "_data_0": "{\"name\":\"document\",\"note\":\"only here\"}"
    })));
    assert_eq!(record.get("name"), Some(&json!("column")));
    assert_eq!(record.get("note"), Some(&json!("only here")));
    assert_eq!(record.get("missing"), None);
    assert_eq!(record.id(), Some(4));
}

#[test]
fn plain_data_column_is_read_when_no_alias() {
    let record = Record::new(doc(json!({"_data": "{\"a\":1}"})));
    assert_eq!(record.get("a"), Some(&json!(1)));
}

#[test]
fn undecodable_document_reads_as_empty() {
    init_tracing();
    let record = Record::new(doc(json!({"_id": 1, "_data_0": "{not json"})));
    assert!(record.data().is_empty());
    assert_eq!(record.get("anything"), None);
}

#[test]
fn to_map_drops_storage_columns() {
    let record = Record::new(doc(json!({
        "_id": 1,
        "_deleted": 0,
        "_header": "x",
        "_data": "{\"name\":\"x\",\"yr\":3}",
        "_data_0": "{\"name\":\"x\",\"yr\":3}"
    })));
    assert_eq!(
        record.to_map(),
        doc(json!({"_id": 1, "_header": "x", "name": "x", "yr": 3}))
    );
}

#[test]
fn records_compare_structurally() {
    let a = Record::new(doc(json!({"_id": 1, "_data_0": "{\"name\":\"x\"}"})));
    let b = Record::new(doc(json!({"_id": 1, "name": "x"})));
    assert_eq!(a, b);
    assert!(a == json!({"_id": 1, "name": "x"}));
    assert!(a != json!([1]));
}

// ── RecordSet ────────────────────────────────────────────────────

#[test]
fn record_set_positions_and_iteration() {
    let engine = books(&[("a", 1), ("b", 2), ("c", 3)]);
    let set = engine
        .entity("book")
        .unwrap()
        .list(&QueryOptions::new())
        .unwrap();

    assert_eq!(set.len(), 3);
    assert_eq!(set.first().unwrap().get("name"), Some(&json!("a")));
    assert_eq!(set.last().unwrap().get("name"), Some(&json!("c")));
    assert_eq!(set.get(1).unwrap().get("yr"), Some(&json!(2)));
    assert!(set.get(3).is_none());

    let years: Vec<i64> = set
        .iter()
        .filter_map(|r| r.get("yr").and_then(|v| v.as_i64()))
        .collect();
    assert_eq!(years, [1, 2, 3]);

    let ids: Vec<i64> = set.into_iter().filter_map(|r| r.id()).collect();
    assert_eq!(ids, [1, 2, 3]);
}

#[test]
fn listed_record_equals_stored_document() {
    let engine = books(&[("a", 1)]);
    let set = engine
        .entity("book")
        .unwrap()
        .list(&QueryOptions::new())
        .unwrap();
    let record = set.first().unwrap();
    assert_eq!(
        record.to_map(),
        doc(json!({"_id": 1, "_header": "a", "name": "a", "yr": 1}))
    );
}

#[test]
fn paginated_set_computes_page_count() {
    let set = RecordSet::paginated(Vec::new(), 2, 4, 9);
    assert_eq!(set.current_page(), 2);
    assert_eq!(set.total_pages(), 3);
    assert_eq!(set.total_count(), 9);
    assert!(set.is_empty());
}
