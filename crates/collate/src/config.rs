//! Run configuration.
//!
//! Every option has a default; [`CollateConfig::validate`] rejects
//! combinations that cannot produce a meaningful run before any file or
//! network I/O happens.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{CollateError, Result};
use crate::normalize::FieldType;

/// Upper bound on keys per catalog request. OpenAlex rejects OR-filters
/// with more than 100 alternatives.
pub const MAX_BATCH_SIZE: usize = 100;

/// Matching mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Exact key grouping only.
    Fast,
    /// Exact grouping plus near-duplicate detection among singletons.
    #[default]
    Advanced,
}

/// Whether the enrichment cache survives between runs of one pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePersistence {
    /// Every run starts with a cold cache.
    None,
    #[default]
    InMemoryAcrossRuns,
}

/// Which match groups are submitted to the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichTarget {
    #[default]
    None,
    /// Groups found in more than one file.
    Common,
    All,
}

/// Edit-distance policy for near-duplicate titles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Levenshtein,
    /// Levenshtein plus adjacent transpositions counted as one edit.
    OptimalStringAlignment,
}

impl SimilarityMetric {
    pub fn distance(self, a: &str, b: &str) -> usize {
        match self {
            SimilarityMetric::Levenshtein => strsim::levenshtein(a, b),
            SimilarityMetric::OptimalStringAlignment => strsim::osa_distance(a, b),
        }
    }
}

/// Options for the catalog enrichment phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub target: EnrichTarget,
    /// Keys per catalog request.
    pub batch_size: usize,
    /// Simultaneous in-flight requests.
    pub max_concurrency: usize,
    /// Retries after the first attempt for transient failures.
    pub retry_ceiling: u32,
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Minimum spacing between two requests issued by the same slot.
    #[serde(with = "duration_secs")]
    pub min_request_interval: Duration,
    #[serde(with = "duration_secs")]
    pub backoff_base: Duration,
    #[serde(with = "duration_secs")]
    pub max_backoff: Duration,
    /// Floor for the delay after a rate-limit response.
    #[serde(with = "duration_secs")]
    pub rate_limit_backoff: Duration,
    /// Longest server `Retry-After` honoured; longer hints are clamped.
    #[serde(with = "duration_secs")]
    pub max_retry_after: Duration,
    /// Look up again keys whose cached entry is `Failed`.
    pub refresh_failed: bool,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            target: EnrichTarget::None,
            batch_size: 50,
            max_concurrency: 4,
            retry_ceiling: 3,
            request_timeout: Duration::from_secs(60),
            min_request_interval: Duration::from_secs(1),
            backoff_base: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            rate_limit_backoff: Duration::from_secs(5),
            max_retry_after: Duration::from_secs(120),
            refresh_failed: false,
        }
    }
}

/// Configuration for a reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollateConfig {
    pub mode: MatchMode,
    /// Key columns tried in order; the first non-empty key wins.
    pub key_column_priority: Vec<FieldType>,
    /// Explicit header for a field type, overriding header inference.
    pub columns: IndexMap<FieldType, String>,
    /// Largest edit distance still reported as a probable duplicate.
    pub duplicate_threshold: usize,
    /// Per file pair, the most singletons compared for near-duplicates.
    pub singleton_cap: usize,
    pub similarity: SimilarityMetric,
    pub enrichment: EnrichmentConfig,
    pub cache_persistence: CachePersistence,
    /// Year that closes open-ended coverage; the current year when unset.
    pub reference_year: Option<i32>,
}

impl Default for CollateConfig {
    fn default() -> Self {
        Self {
            mode: MatchMode::Advanced,
            key_column_priority: vec![FieldType::Issn, FieldType::Eissn, FieldType::Title],
            columns: IndexMap::new(),
            duplicate_threshold: 2,
            singleton_cap: 2000,
            similarity: SimilarityMetric::Levenshtein,
            enrichment: EnrichmentConfig::default(),
            cache_persistence: CachePersistence::InMemoryAcrossRuns,
            reference_year: None,
        }
    }
}

impl CollateConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| CollateError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        Ok(config)
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_priority(mut self, priority: Vec<FieldType>) -> Self {
        self.key_column_priority = priority;
        self
    }

    /// Use `header` for `field_type` instead of inferring it.
    pub fn with_column(mut self, field_type: FieldType, header: impl Into<String>) -> Self {
        self.columns.insert(field_type, header.into());
        self
    }

    pub fn with_enrich_target(mut self, target: EnrichTarget) -> Self {
        self.enrichment.target = target;
        self
    }

    /// Check the options. Any error here is fatal to the run.
    pub fn validate(&self) -> Result<()> {
        if self.key_column_priority.is_empty() {
            return Err(CollateError::Config(
                "key column priority must name at least one field type".to_string(),
            ));
        }
        for (i, ft) in self.key_column_priority.iter().enumerate() {
            if self.key_column_priority[..i].contains(ft) {
                return Err(CollateError::Config(format!(
                    "field type '{}' appears more than once in the key column priority",
                    ft
                )));
            }
        }
        if self.mode == MatchMode::Advanced && self.duplicate_threshold == 0 {
            return Err(CollateError::Config(
                "duplicate threshold must be at least 1 in advanced mode".to_string(),
            ));
        }

        let e = &self.enrichment;
        if e.batch_size == 0 || e.batch_size > MAX_BATCH_SIZE {
            return Err(CollateError::Config(format!(
                "batch size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, e.batch_size
            )));
        }
        if e.max_concurrency == 0 {
            return Err(CollateError::Config(
                "max concurrency must be at least 1".to_string(),
            ));
        }
        if e.request_timeout.is_zero() {
            return Err(CollateError::Config(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        if e.max_backoff < e.backoff_base {
            return Err(CollateError::Config(
                "max backoff must not be shorter than the backoff base".to_string(),
            ));
        }
        if e.max_retry_after < e.rate_limit_backoff {
            return Err(CollateError::Config(
                "max retry-after must not be shorter than the rate-limit backoff".to_string(),
            ));
        }
        Ok(())
    }
}

/// Durations as fractional seconds in config files.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
