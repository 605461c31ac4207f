//! Query results: records over raw rows and paginated record sets.

use docstore_model::{DATA_COLUMN, DELETED_COLUMN, Document, HEADER_KEY, ID_COLUMN};
use serde_json::Value;
use std::cell::OnceCell;
use tracing::warn;

/// Alias under which list queries always select the entity's JSON column.
pub const DATA_ALIAS: &str = "_data_0";

/// One result row.
///
/// Column values are read first; any other key is looked up in the
/// record's JSON document, which is parsed on first access.
#[derive(Debug, Clone)]
pub struct Record {
    row: Document,
    data: OnceCell<Document>,
}

impl Record {
    pub fn new(row: Document) -> Self {
        Self {
            row,
            data: OnceCell::new(),
        }
    }

    /// Value of a column, or else of a document field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.row.get(key).or_else(|| self.data().get(key))
    }

    pub fn id(&self) -> Option<i64> {
        self.row.get(ID_COLUMN).and_then(Value::as_i64)
    }

    pub fn header(&self) -> Option<&Value> {
        self.row.get(HEADER_KEY)
    }

    /// The raw columns as selected.
    pub fn row(&self) -> &Document {
        &self.row
    }

    /// The record's JSON document; empty when the row carries none.
    pub fn data(&self) -> &Document {
        self.data.get_or_init(|| {
            let Some(blob) = self.row.get(DATA_ALIAS).or_else(|| self.row.get(DATA_COLUMN))
            else {
                return Document::new();
            };
            match blob.as_str().map(serde_json::from_str::<Document>) {
                Some(Ok(doc)) => doc,
                Some(Err(e)) => {
                    warn!(id = ?self.id(), error = %e, "undecodable record document");
                    Document::new()
                }
                None => {
                    warn!(id = ?self.id(), "record document is not a string");
                    Document::new()
                }
            }
        })
    }

    /// Columns merged with the document, without the JSON columns and the
    /// soft-delete flag. Columns win over document fields.
    pub fn to_map(&self) -> Document {
        let mut map = self.data().clone();
        for (k, v) in &self.row {
            map.insert(k.clone(), v.clone());
        }
        for k in [DATA_COLUMN, DATA_ALIAS, DELETED_COLUMN] {
            map.remove(k);
        }
        map
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.to_map() == other.to_map()
    }
}

impl PartialEq<Document> for Record {
    fn eq(&self, other: &Document) -> bool {
        &self.to_map() == other
    }
}

impl PartialEq<Value> for Record {
    fn eq(&self, other: &Value) -> bool {
        other.as_object().is_some_and(|o| self == o)
    }
}

/// The records of one query, with paging information.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    records: Vec<Record>,
    current_page: u32,
    total_pages: u64,
    total_count: u64,
}

impl RecordSet {
    /// An unpaginated result: one page holding every record.
    pub fn new(records: Vec<Record>) -> Self {
        let total_count = records.len() as u64;
        Self {
            records,
            current_page: 1,
            total_pages: 1,
            total_count,
        }
    }

    pub fn paginated(records: Vec<Record>, page: u32, per_page: u32, total_count: u64) -> Self {
        Self {
            records,
            current_page: page,
            total_pages: total_count.div_ceil(u64::from(per_page.max(1))),
            total_count,
        }
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn total_pages(&self) -> u64 {
        self.total_pages
    }

    /// Rows matching the query across all pages.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn first(&self) -> Option<&Record> {
        self.records.first()
    }

    pub fn last(&self) -> Option<&Record> {
        self.records.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl IntoIterator for RecordSet {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a RecordSet {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
