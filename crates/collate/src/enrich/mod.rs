//! Batch enrichment against an external bibliographic catalog.
//!
//! The [`EnrichmentClient`] takes a set of keys, answers what it can from
//! the [`EnrichmentCache`], and sends the rest to a [`CatalogTransport`] in
//! fixed-size batches from a bounded pool of workers. Each worker spaces its
//! own requests, retries transient failures with jittered exponential
//! backoff, and gives up on a batch after the retry ceiling. A batch that
//! gives up turns into `Failed` entries; it never stops the other batches.
//!
//! # Transports
//!
//! - [`OpenAlexTransport`] - the OpenAlex `sources` endpoint, ISSN keys only
//! - [`MockTransport`] - scripted responses for tests and dry runs

mod backoff;
mod cache;
mod client;
mod mock;
mod openalex;
mod transport;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::normalize::NormalizedKey;

pub use backoff::RetryPolicy;
pub use cache::EnrichmentCache;
pub use client::{EnrichmentClient, EnrichmentReport};
pub use mock::{MockOutcome, MockTransport};
pub use openalex::{OpenAlexConfig, OpenAlexTransport};
pub use transport::{CatalogResponse, CatalogTransport, ErrorClass, TransportError};

/// Catalog fields for one key, in the order the transport produced them.
pub type Metadata = IndexMap<String, String>;

/// Terminal outcome of looking a key up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnrichmentStatus {
    Success,
    /// The catalog answered and does not know the key. A valid outcome.
    NotFound,
    /// The lookup could not be completed.
    Failed,
}

impl std::fmt::Display for EnrichmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnrichmentStatus::Success => write!(f, "Success"),
            EnrichmentStatus::NotFound => write!(f, "NotFound"),
            EnrichmentStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Cached result of one lookup. Never mutated; a new lookup replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentEntry {
    pub key: NormalizedKey,
    pub status: EnrichmentStatus,
    #[serde(default)]
    pub metadata: Metadata,
    pub fetched_at: DateTime<Utc>,
    /// Why the lookup failed, for `Failed` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EnrichmentEntry {
    pub fn success(key: NormalizedKey, metadata: Metadata) -> Self {
        Self {
            key,
            status: EnrichmentStatus::Success,
            metadata,
            fetched_at: Utc::now(),
            error: None,
        }
    }

    pub fn not_found(key: NormalizedKey) -> Self {
        Self {
            key,
            status: EnrichmentStatus::NotFound,
            metadata: Metadata::new(),
            fetched_at: Utc::now(),
            error: None,
        }
    }

    pub fn failed(key: NormalizedKey, error: impl Into<String>) -> Self {
        Self {
            key,
            status: EnrichmentStatus::Failed,
            metadata: Metadata::new(),
            fetched_at: Utc::now(),
            error: Some(error.into()),
        }
    }
}
