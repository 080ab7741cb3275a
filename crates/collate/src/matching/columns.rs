//! Mapping spreadsheet headers onto key field types.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::normalize::FieldType;

/// A header resolved to the field type it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyColumn {
    pub field_type: FieldType,
    pub header: String,
}

/// Resolves field types to headers, per dataset.
///
/// Explicit overrides win when the dataset has that header; otherwise the
/// header is inferred with [`FieldType::from_header`]. `Generic` columns are
/// only ever explicit.
#[derive(Debug, Clone, Default)]
pub struct ColumnMapping {
    overrides: IndexMap<FieldType, String>,
}

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field_type: FieldType, header: impl Into<String>) -> Self {
        self.overrides.insert(field_type, header.into());
        self
    }

    pub fn from_overrides(overrides: IndexMap<FieldType, String>) -> Self {
        Self { overrides }
    }

    /// The header holding `field_type` in a dataset with `headers`.
    pub fn header_for<'h>(&self, headers: &'h [String], field_type: FieldType) -> Option<&'h str> {
        if let Some(wanted) = self.overrides.get(&field_type) {
            let wanted = wanted.trim();
            if let Some(h) = headers.iter().find(|h| h.trim().eq_ignore_ascii_case(wanted)) {
                return Some(h.as_str());
            }
        }
        if field_type == FieldType::Generic {
            return None;
        }
        headers
            .iter()
            .find(|h| FieldType::from_header(h) == Some(field_type))
            .map(String::as_str)
    }

    /// Key columns available in a dataset, in `priority` order. Field types
    /// with no matching header are skipped.
    pub fn resolve(&self, headers: &[String], priority: &[FieldType]) -> Vec<KeyColumn> {
        priority
            .iter()
            .filter_map(|&field_type| {
                self.header_for(headers, field_type).map(|header| KeyColumn {
                    field_type,
                    header: header.to_string(),
                })
            })
            .collect()
    }
}
