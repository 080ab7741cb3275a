//! Catalog transport trait and failure classification.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::Metadata;
use crate::normalize::NormalizedKey;

/// Metadata for the requested keys the catalog knows. Keys absent from the
/// map were not found.
pub type CatalogResponse = HashMap<NormalizedKey, Metadata>;

/// Why a single catalog request did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("server error (HTTP {status})")]
    Server { status: u16 },

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request rejected (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// How the client reacts to a [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with exponential backoff.
    Transient,
    /// Retry after a longer delay.
    RateLimited,
    /// Do not retry.
    Permanent,
}

impl TransportError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TransportError::Timeout
            | TransportError::Connection(_)
            | TransportError::Server { .. } => ErrorClass::Transient,
            TransportError::RateLimited { .. } => ErrorClass::RateLimited,
            TransportError::Client { .. } | TransportError::Malformed(_) => ErrorClass::Permanent,
        }
    }

    /// Map an unsuccessful HTTP status to an error.
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: String) -> Self {
        match status {
            429 => TransportError::RateLimited { retry_after },
            408 | 500..=599 => TransportError::Server { status },
            _ => TransportError::Client {
                status,
                message: body,
            },
        }
    }
}

/// A remote catalog answering batched key lookups.
///
/// Implementations issue exactly one request per call and leave retries,
/// pacing and timeouts to the caller.
#[async_trait]
pub trait CatalogTransport: Send + Sync {
    /// Look up `keys` in one request.
    async fn fetch_batch(&self, keys: &[NormalizedKey]) -> Result<CatalogResponse, TransportError>;

    /// Whether this catalog can look up `key` at all.
    fn supports(&self, key: &NormalizedKey) -> bool;

    /// Short name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            TransportError::from_status(429, None, String::new()).class(),
            ErrorClass::RateLimited
        );
        assert_eq!(
            TransportError::from_status(503, None, String::new()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            TransportError::from_status(408, None, String::new()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            TransportError::from_status(400, None, "bad filter".into()).class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            TransportError::from_status(404, None, String::new()).class(),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn test_malformed_is_permanent() {
        assert_eq!(
            TransportError::Malformed("not json".into()).class(),
            ErrorClass::Permanent
        );
        assert_eq!(TransportError::Timeout.class(), ErrorClass::Transient);
    }
}
