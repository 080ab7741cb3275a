//! Removing repeated rows within a single file.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{CollateError, Result};
use crate::input::{DataTable, Dataset, Record};
use crate::normalize::{self, FieldType};

/// Result of [`drop_duplicates`].
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    /// First occurrence of every distinct key, in original order.
    pub kept: Dataset,
    /// Later occurrences that were dropped.
    pub removed: Vec<Arc<Record>>,
}

/// Drop rows whose values in `columns` repeat an earlier row.
///
/// With `normalized` set each value is compared through the normalizer for
/// its inferred field type (ISSN columns by canonical ISSN, title columns
/// by folded title, anything else case-insensitively); cells that fail to
/// normalize are compared as written. Otherwise values are compared
/// exactly after trimming. Missing values compare equal to each other.
pub fn drop_duplicates(dataset: &Dataset, columns: &[&str], normalized: bool) -> Result<DedupOutcome> {
    if columns.is_empty() {
        return Err(CollateError::Config(
            "at least one column is needed to detect duplicates".to_string(),
        ));
    }

    let mut resolved = Vec::with_capacity(columns.len());
    for column in columns {
        let header = dataset
            .headers()
            .iter()
            .find(|h| h.trim().eq_ignore_ascii_case(column.trim()))
            .ok_or_else(|| {
                CollateError::Config(format!(
                    "column '{}' not found in '{}'",
                    column,
                    dataset.source_id()
                ))
            })?;
        let field_type = FieldType::from_header(header).unwrap_or(FieldType::Generic);
        resolved.push((header.clone(), field_type));
    }

    let mut seen: HashSet<Vec<String>> = HashSet::new();
    let mut kept = Vec::new();
    let mut removed = Vec::new();

    for record in dataset.records() {
        let key: Vec<String> = resolved
            .iter()
            .map(|(header, field_type)| comparable(record.field(header), *field_type, normalized))
            .collect();
        if seen.insert(key) {
            kept.push(Arc::clone(record));
        } else {
            removed.push(Arc::clone(record));
        }
    }

    tracing::info!(
        source = dataset.source_id(),
        kept = kept.len(),
        removed = removed.len(),
        "Dropped duplicate rows"
    );

    Ok(DedupOutcome {
        kept: Dataset::from_shared(dataset.source_id(), dataset.headers().to_vec(), kept),
        removed,
    })
}

fn comparable(value: Option<&str>, field_type: FieldType, normalized: bool) -> String {
    let value = value.unwrap_or_default();
    if DataTable::is_null_value(value) {
        return String::new();
    }
    if !normalized {
        return value.trim().to_string();
    }
    match normalize::normalize(value, field_type) {
        Ok(key) => key.value().to_string(),
        Err(_) => value.trim().to_string(),
    }
}

impl DedupOutcome {
    /// The kept rows as a table with the original headers.
    pub fn to_table(&self) -> DataTable {
        let headers = self.kept.headers().to_vec();
        let rows = self
            .kept
            .records()
            .iter()
            .map(|r| {
                headers
                    .iter()
                    .map(|h| r.field(h).unwrap_or_default().to_string())
                    .collect()
            })
            .collect();
        DataTable::new(headers, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn journals() -> Dataset {
        let table = DataTable::new(
            vec!["ISSN".into(), "Title".into()],
            vec![
                vec!["1234-5678".into(), "Journal of Biology".into()],
                vec!["12345678".into(), "journal of biology".into()],
                vec!["2345-6789".into(), "Annals of Physics".into()],
                vec!["".into(), "Annals of Physics".into()],
                vec!["nan".into(), "The Annals of Physics".into()],
            ],
        );
        Dataset::from_table("A", &table)
    }

    #[test]
    fn test_exact_comparison() {
        let outcome = drop_duplicates(&journals(), &["ISSN"], false).unwrap();
        // "1234-5678" and "12345678" differ as written; "" and "nan" are both missing.
        assert_eq!(outcome.kept.len(), 4);
        assert_eq!(outcome.removed.len(), 1);
        assert_eq!(outcome.removed[0].row_index(), 4);
    }

    #[test]
    fn test_normalized_comparison() {
        let outcome = drop_duplicates(&journals(), &["issn"], true).unwrap();
        assert_eq!(outcome.kept.len(), 3);
        assert_eq!(
            outcome.removed.iter().map(|r| r.row_index()).collect::<Vec<_>>(),
            vec![1, 4]
        );
    }

    #[test]
    fn test_title_folding_and_first_kept() {
        let outcome = drop_duplicates(&journals(), &["Title"], true).unwrap();
        assert_eq!(outcome.kept.len(), 2);
        let table = outcome.to_table();
        assert_eq!(table.rows[0][1], "Journal of Biology");
        assert_eq!(table.rows[1][0], "2345-6789");
    }

    #[test]
    fn test_missing_column() {
        let result = drop_duplicates(&journals(), &["Publisher"], false);
        assert!(matches!(result, Err(CollateError::Config(_))));
    }
}
