//! Exact-key grouping.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use super::columns::{ColumnMapping, KeyColumn};
use super::duplicates::{DuplicateDetector, SingletonTitle};
use super::{MatchGroup, MatchOutcome, MatchWarning};
use crate::config::{CollateConfig, MatchMode, SimilarityMetric};
use crate::input::{Dataset, Record};
use crate::normalize::{self, FieldType, KeyNamespace, NormalizationError, NormalizedKey};

/// A record with its keys computed. Output of the normalizing stage.
#[derive(Debug, Clone)]
pub struct KeyedRecord {
    pub record: Arc<Record>,
    /// First non-empty key in priority order; empty if there is none.
    pub key: NormalizedKey,
    /// Which key column produced `key`.
    pub key_field: Option<FieldType>,
    /// The record's title folded for near-duplicate comparison.
    pub title_key: NormalizedKey,
    /// Cells the normalizer rejected while searching for a key.
    pub issues: Vec<NormalizationError>,
    pub checksum_mismatch: bool,
}

/// Groups records from several datasets on their effective key.
#[derive(Debug, Clone)]
pub struct Matcher {
    priority: Vec<FieldType>,
    mapping: ColumnMapping,
    mode: MatchMode,
    duplicate_threshold: usize,
    singleton_cap: usize,
    metric: SimilarityMetric,
}

impl Matcher {
    /// A matcher with default thresholds trying `priority` in order.
    pub fn new(priority: Vec<FieldType>) -> Self {
        Self::from_config(&CollateConfig::default().with_priority(priority))
    }

    pub fn from_config(config: &CollateConfig) -> Self {
        Self {
            priority: config.key_column_priority.clone(),
            mapping: ColumnMapping::from_overrides(config.columns.clone()),
            mode: config.mode,
            duplicate_threshold: config.duplicate_threshold,
            singleton_cap: config.singleton_cap,
            metric: config.similarity,
        }
    }

    pub fn with_mapping(mut self, mapping: ColumnMapping) -> Self {
        self.mapping = mapping;
        self
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_duplicate_threshold(mut self, threshold: usize) -> Self {
        self.duplicate_threshold = threshold;
        self
    }

    pub fn with_singleton_cap(mut self, cap: usize) -> Self {
        self.singleton_cap = cap;
        self
    }

    /// The key columns this matcher would use for `dataset`.
    pub fn key_columns(&self, dataset: &Dataset) -> Vec<KeyColumn> {
        self.mapping.resolve(dataset.headers(), &self.priority)
    }

    /// Match datasets in one go: normalize every record, then group.
    pub fn match_datasets(&self, datasets: &[Dataset]) -> MatchOutcome {
        let mut warnings = Vec::new();
        let keyed: Vec<Vec<KeyedRecord>> = datasets
            .iter()
            .map(|d| {
                let (records, warning) = self.key_records(d);
                warnings.extend(warning);
                records
            })
            .collect();
        let sources = datasets.iter().map(|d| d.source_id().to_string()).collect();

        let mut outcome = self.group(sources, keyed.into_iter().flatten());
        warnings.append(&mut outcome.warnings);
        outcome.warnings = warnings;
        outcome
    }

    /// Compute the effective key of every record in `dataset`.
    ///
    /// Returns a warning alongside when the dataset has none of the key
    /// columns; its records are then all keyed empty.
    pub fn key_records(&self, dataset: &Dataset) -> (Vec<KeyedRecord>, Option<MatchWarning>) {
        let columns = self.key_columns(dataset);
        let title_header = self
            .mapping
            .header_for(dataset.headers(), FieldType::Title)
            .map(str::to_string);

        let warning = columns.is_empty().then(|| MatchWarning::NoKeyColumns {
            source: dataset.source_id().to_string(),
        });
        if let Some(w) = &warning {
            tracing::warn!("{}", w);
        }

        let keyed = dataset
            .records()
            .iter()
            .map(|record| key_record(record, &columns, title_header.as_deref()))
            .collect();
        (keyed, warning)
    }

    /// Group keyed records. `sources` lists every input, including ones that
    /// contributed no records.
    pub fn group(
        &self,
        sources: IndexSet<String>,
        keyed: impl IntoIterator<Item = KeyedRecord>,
    ) -> MatchOutcome {
        let mut groups: Vec<MatchGroup> = Vec::new();
        let mut index: IndexMap<NormalizedKey, usize> = IndexMap::new();
        let mut titles: Vec<NormalizedKey> = Vec::new();
        let mut normalization_errors = 0;
        let mut checksum_mismatches = 0;

        for item in keyed {
            normalization_errors += item.issues.len();
            if item.checksum_mismatch {
                checksum_mismatches += 1;
            }

            if item.key.is_empty() {
                groups.push(MatchGroup::new(item.key, item.record));
                titles.push(item.title_key);
                continue;
            }

            match index.get(&item.key) {
                Some(&i) => groups[i].push(item.record),
                None => {
                    index.insert(item.key.clone(), groups.len());
                    groups.push(MatchGroup::new(item.key, item.record));
                    titles.push(item.title_key);
                }
            }
        }

        let mut outcome = MatchOutcome {
            sources,
            groups,
            normalization_errors,
            checksum_mismatches,
            ..MatchOutcome::default()
        };

        if self.mode == MatchMode::Advanced {
            let singletons = outcome
                .groups
                .iter()
                .zip(&titles)
                .enumerate()
                .filter(|(_, (g, title))| g.is_singleton() && !title.is_empty())
                .map(|(i, (g, title))| SingletonTitle {
                    group: i,
                    source: g.members[0].source_id(),
                    title: title.value(),
                });
            let detector =
                DuplicateDetector::new(self.duplicate_threshold, self.singleton_cap, self.metric);
            let (duplicates, warnings) = detector.detect(&outcome.sources, singletons);
            outcome.duplicates = duplicates;
            outcome.warnings = warnings;
        }

        tracing::debug!(
            groups = outcome.groups.len(),
            duplicates = outcome.duplicates.len(),
            "Grouped records"
        );
        outcome
    }
}

fn key_record(record: &Arc<Record>, columns: &[KeyColumn], title_header: Option<&str>) -> KeyedRecord {
    let mut issues = Vec::new();
    let mut effective = None;

    for column in columns {
        match normalize::normalize_cell(record.field(&column.header), column.field_type) {
            Ok(key) if key.is_empty() => {}
            Ok(key) => {
                effective = Some((key, column.field_type));
                break;
            }
            Err(e) => issues.push(e),
        }
    }

    let title_key = match (&effective, title_header) {
        (Some((key, _)), _) if key.namespace() == KeyNamespace::Title => key.clone(),
        (_, Some(header)) => normalize::normalize_cell(record.field(header), FieldType::Title)
            .unwrap_or_else(|_| NormalizedKey::empty()),
        (_, None) => NormalizedKey::empty(),
    };

    let (key, key_field) = match effective {
        Some((key, field)) => (key, Some(field)),
        None => (NormalizedKey::empty(), None),
    };
    let checksum_mismatch =
        key.namespace() == KeyNamespace::Issn && !normalize::issn::check_digit_valid(key.value());

    KeyedRecord {
        record: Arc::clone(record),
        key,
        key_field,
        title_key,
        issues,
        checksum_mismatch,
    }
}
