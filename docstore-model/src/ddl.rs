//! Table and index definitions emitted for entity storage.

use crate::ident::quote;

/// A single index on one or more columns of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDdl {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDdl {
    // Index names share one namespace per database. Identifiers never
    // contain '.', so `table.column.kind` cannot clash across tables.
    pub fn new(table: &str, column: &str) -> Self {
        Self {
            name: format!("{table}.{column}.idx"),
            table: table.to_string(),
            columns: vec![column.to_string()],
            unique: false,
        }
    }

    pub fn unique(table: &str, column: &str) -> Self {
        Self {
            name: format!("{table}.{column}.uniq"),
            table: table.to_string(),
            columns: vec![column.to_string()],
            unique: true,
        }
    }

    pub fn to_sql(&self) -> String {
        let unique = if self.unique { "UNIQUE " } else { "" };
        let columns: Vec<String> = self.columns.iter().map(|c| quote(c)).collect();
        format!(
            "CREATE {unique}INDEX {} ON {} ({})",
            quote(&self.name),
            quote(&self.table),
            columns.join(", ")
        )
    }
}

/// Column and index list for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDdl {
    pub table: String,
    /// Column definitions and table constraints, in order.
    pub columns: Vec<String>,
    pub indexes: Vec<IndexDdl>,
}

impl TableDdl {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, definition: impl Into<String>) -> Self {
        self.columns.push(definition.into());
        self
    }

    pub fn index(mut self, index: IndexDdl) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn create_table_sql(&self) -> String {
        format!("CREATE TABLE {} ({})", quote(&self.table), self.columns.join(", "))
    }

    pub fn drop_table_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", quote(&self.table))
    }

    /// `CREATE TABLE` followed by one `CREATE INDEX` per index.
    pub fn statements(&self) -> Vec<String> {
        std::iter::once(self.create_table_sql())
            .chain(self.indexes.iter().map(IndexDdl::to_sql))
            .collect()
    }
}
