//! Records: the rows handed to the matcher.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::source::DataTable;

/// One row from one source file. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    source_id: String,
    row_index: usize,
    raw_fields: IndexMap<String, String>,
}

impl Record {
    pub fn new(
        source_id: impl Into<String>,
        row_index: usize,
        raw_fields: IndexMap<String, String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            row_index,
            raw_fields,
        }
    }

    /// Which file this record came from.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Zero-based position of the row in its source (header excluded).
    pub fn row_index(&self) -> usize {
        self.row_index
    }

    /// Column name to original cell value, in source column order.
    pub fn raw_fields(&self) -> &IndexMap<String, String> {
        &self.raw_fields
    }

    pub fn field(&self, column: &str) -> Option<&str> {
        self.raw_fields.get(column).map(String::as_str)
    }
}

/// All records loaded from one source file.
#[derive(Debug, Clone)]
pub struct Dataset {
    source_id: String,
    headers: Vec<String>,
    records: Vec<Arc<Record>>,
}

impl Dataset {
    /// Build a dataset directly from records that share `source_id`.
    pub fn new(source_id: impl Into<String>, headers: Vec<String>, records: Vec<Record>) -> Self {
        Self {
            source_id: source_id.into(),
            headers,
            records: records.into_iter().map(Arc::new).collect(),
        }
    }

    /// A dataset sharing records with another one, e.g. a filtered view.
    pub(crate) fn from_shared(
        source_id: impl Into<String>,
        headers: Vec<String>,
        records: Vec<Arc<Record>>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            headers,
            records,
        }
    }

    /// Turn a loaded table into records tagged with `source_id`.
    pub fn from_table(source_id: impl Into<String>, table: &DataTable) -> Self {
        let source_id = source_id.into();
        let records = table
            .rows
            .iter()
            .enumerate()
            .map(|(row_index, row)| {
                let raw_fields = table
                    .headers
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                Arc::new(Record::new(source_id.clone(), row_index, raw_fields))
            })
            .collect();

        Self {
            source_id,
            headers: table.headers.clone(),
            records,
        }
    }

    /// Convenience for tests and small callers: one column of values.
    pub fn from_column(
        source_id: impl Into<String>,
        column: impl Into<String>,
        values: &[&str],
    ) -> Self {
        let column = column.into();
        let table = DataTable::new(
            vec![column],
            values.iter().map(|v| vec![v.to_string()]).collect(),
        );
        Self::from_table(source_id, &table)
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn records(&self) -> &[Arc<Record>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_table_keeps_row_positions() {
        let table = DataTable::new(
            vec!["ISSN".into(), "Title".into()],
            vec![
                vec!["1234-5678".into(), "Nature".into()],
                vec!["".into(), "Cell".into()],
            ],
        );
        let dataset = Dataset::from_table("a.csv", &table);

        assert_eq!(dataset.len(), 2);
        let second = &dataset.records()[1];
        assert_eq!(second.source_id(), "a.csv");
        assert_eq!(second.row_index(), 1);
        assert_eq!(second.field("Title"), Some("Cell"));
        assert_eq!(second.field("ISSN"), Some(""));
        assert_eq!(second.field("Missing"), None);
    }
}
