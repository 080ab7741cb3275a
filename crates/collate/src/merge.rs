//! Joining match groups with their enrichment results.
//!
//! Merging is pure: the same groups and entries always produce the same
//! rows, in group order. A group whose key was never looked up, or whose
//! lookup is missing because the run was cancelled, is `NotEnriched`.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::enrich::EnrichmentEntry;
use crate::input::DataTable;
use crate::matching::{MatchGroup, MatchOutcome, MatchStatus};
use crate::normalize::NormalizedKey;

/// Prefix for catalog columns in the flat table.
pub const CATALOG_PREFIX: &str = "catalog_";

/// Enrichment attached to a consolidated row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EnrichmentState {
    NotEnriched,
    Resolved(EnrichmentEntry),
}

impl fmt::Display for EnrichmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnrichmentState::NotEnriched => write!(f, "NotEnriched"),
            EnrichmentState::Resolved(entry) => write!(f, "{}", entry.status),
        }
    }
}

/// One match group with its status and enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedRow {
    pub group: MatchGroup,
    pub status: MatchStatus,
    pub enrichment: EnrichmentState,
}

impl ConsolidatedRow {
    pub fn key(&self) -> &NormalizedKey {
        &self.group.key
    }

    pub fn entry(&self) -> Option<&EnrichmentEntry> {
        match &self.enrichment {
            EnrichmentState::Resolved(entry) => Some(entry),
            EnrichmentState::NotEnriched => None,
        }
    }
}

/// Attach enrichment entries to every group of `outcome`, preserving order.
pub fn merge(
    outcome: &MatchOutcome,
    entries: &HashMap<NormalizedKey, EnrichmentEntry>,
) -> Vec<ConsolidatedRow> {
    outcome
        .groups
        .iter()
        .zip(outcome.statuses())
        .map(|(group, status)| {
            let enrichment = entries
                .get(&group.key)
                .filter(|_| !group.key.is_empty())
                .cloned()
                .map_or(EnrichmentState::NotEnriched, EnrichmentState::Resolved);
            ConsolidatedRow {
                group: group.clone(),
                status,
                enrichment,
            }
        })
        .collect()
}

/// Flatten rows to one line per member record.
///
/// Columns: `match_status`, `match_key`, `source_id`, `row_index`, the
/// union of all raw headers in first-seen order, `enrichment_status`, then
/// the union of catalog fields prefixed with [`CATALOG_PREFIX`]. Cells a
/// record or entry does not have are empty.
pub fn to_table(rows: &[ConsolidatedRow]) -> DataTable {
    let mut raw_headers: IndexSet<&str> = IndexSet::new();
    let mut catalog_fields: IndexSet<&str> = IndexSet::new();
    for row in rows {
        for member in &row.group.members {
            raw_headers.extend(member.raw_fields().keys().map(String::as_str));
        }
        if let Some(entry) = row.entry() {
            catalog_fields.extend(entry.metadata.keys().map(String::as_str));
        }
    }

    let mut headers: Vec<String> = ["match_status", "match_key", "source_id", "row_index"]
        .iter()
        .map(|h| h.to_string())
        .collect();
    headers.extend(raw_headers.iter().map(|h| h.to_string()));
    headers.push("enrichment_status".to_string());
    headers.extend(catalog_fields.iter().map(|f| format!("{}{}", CATALOG_PREFIX, f)));

    let mut table_rows = Vec::new();
    for row in rows {
        let status = row.status.to_string();
        let key = row.group.key.display_value();
        let enrichment = row.enrichment.to_string();
        for member in &row.group.members {
            let mut line = Vec::with_capacity(headers.len());
            line.push(status.clone());
            line.push(key.clone());
            line.push(member.source_id().to_string());
            line.push(member.row_index().to_string());
            for header in &raw_headers {
                line.push(member.field(header).unwrap_or_default().to_string());
            }
            line.push(enrichment.clone());
            for field in &catalog_fields {
                let value = row
                    .entry()
                    .and_then(|e| e.metadata.get(*field))
                    .cloned()
                    .unwrap_or_default();
                line.push(value);
            }
            table_rows.push(line);
        }
    }

    DataTable::new(headers, table_rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::{EnrichmentStatus, Metadata};
    use crate::input::Dataset;
    use crate::matching::Matcher;
    use crate::normalize::{FieldType, KeyNamespace};

    fn outcome() -> MatchOutcome {
        let a = Dataset::from_column("A", "ISSN", &["1234-5678", "2345-6789"]);
        let b = Dataset::from_column("B", "ISSN", &["12345678", "3456-7890"]);
        Matcher::new(vec![FieldType::Issn]).match_datasets(&[a, b])
    }

    #[test]
    fn test_merge_preserves_order_and_attaches_entries() {
        let outcome = outcome();
        let mut metadata = Metadata::new();
        metadata.insert("title".into(), "Example Journal".into());
        let common_key = NormalizedKey::new(KeyNamespace::Issn, "12345678");
        let mut entries = HashMap::new();
        entries.insert(
            common_key.clone(),
            EnrichmentEntry::success(common_key.clone(), metadata),
        );

        let rows = merge(&outcome, &entries);

        assert_eq!(rows.len(), outcome.groups.len());
        for (row, group) in rows.iter().zip(&outcome.groups) {
            assert_eq!(row.key(), &group.key);
        }
        assert_eq!(rows[0].status, MatchStatus::Common);
        assert_eq!(rows[0].entry().map(|e| e.status), Some(EnrichmentStatus::Success));
        assert_eq!(rows[1].enrichment, EnrichmentState::NotEnriched);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let outcome = outcome();
        let entries = HashMap::new();
        let first = to_table(&merge(&outcome, &entries));
        let second = to_table(&merge(&outcome, &entries));
        assert_eq!(first, second);
    }

    #[test]
    fn test_table_has_one_line_per_member() {
        let outcome = outcome();
        let key = NormalizedKey::new(KeyNamespace::Issn, "12345678");
        let mut metadata = Metadata::new();
        metadata.insert("publisher".into(), "Example Press".into());
        let mut entries = HashMap::new();
        entries.insert(key.clone(), EnrichmentEntry::success(key, metadata));

        let table = to_table(&merge(&outcome, &entries));

        assert_eq!(table.row_count(), 4);
        assert_eq!(
            table.headers,
            vec![
                "match_status",
                "match_key",
                "source_id",
                "row_index",
                "ISSN",
                "enrichment_status",
                "catalog_publisher"
            ]
        );
        assert_eq!(table.rows[0][0], "Common");
        assert_eq!(table.rows[0][1], "1234-5678");
        assert_eq!(table.rows[1][2], "B");
        assert_eq!(table.rows[1][6], "Example Press");
        assert_eq!(table.rows[2][5], "NotEnriched");
        assert_eq!(table.rows[2][6], "");
    }
}
