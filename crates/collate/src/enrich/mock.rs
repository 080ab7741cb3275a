//! Mock catalog transport for testing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::transport::{CatalogResponse, CatalogTransport, TransportError};
use super::Metadata;
use crate::normalize::{KeyNamespace, NormalizedKey};

/// Scripted result of one call to [`MockTransport::fetch_batch`].
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Answer from the mock catalog.
    Respond,
    /// Fail with the given error.
    Fail(TransportError),
    /// Never answer, so the caller's timeout fires.
    Hang,
}

/// In-memory catalog with scripted failures.
///
/// Calls consume the script front to back; once it runs out every call
/// answers from the catalog. Batches containing a key registered with
/// [`MockTransport::with_failing_key`] always fail with HTTP 503.
#[derive(Debug, Default)]
pub struct MockTransport {
    catalog: HashMap<NormalizedKey, Metadata>,
    failing: HashSet<NormalizedKey>,
    script: Mutex<VecDeque<MockOutcome>>,
    calls: Mutex<Vec<Vec<NormalizedKey>>>,
    completed: Mutex<Vec<Vec<NormalizedKey>>>,
    latency: Duration,
    key_latency: HashMap<NormalizedKey, Duration>,
    echo: bool,
}

impl MockTransport {
    /// Create an empty mock catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every ISSN key with placeholder metadata.
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    /// Add a catalog record.
    pub fn with_record(mut self, key: NormalizedKey, metadata: Metadata) -> Self {
        self.catalog.insert(key, metadata);
        self
    }

    /// Add a catalog record with only a title, keyed by a canonical ISSN.
    pub fn with_title(self, issn: &str, title: &str) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("title".to_string(), title.to_string());
        self.with_record(NormalizedKey::new(KeyNamespace::Issn, issn), metadata)
    }

    pub fn with_script(self, outcomes: impl IntoIterator<Item = MockOutcome>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(outcomes);
        self
    }

    pub fn with_failing_key(mut self, key: NormalizedKey) -> Self {
        self.failing.insert(key);
        self
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Delay batches containing `key` by at least `latency`. A batch waits
    /// for its slowest key.
    pub fn with_key_latency(mut self, key: NormalizedKey, latency: Duration) -> Self {
        self.key_latency.insert(key, latency);
        self
    }

    /// Keys of every call received, in order.
    pub fn calls(&self) -> Vec<Vec<NormalizedKey>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Keys of every call that answered, in the order the answers came.
    pub fn completed(&self) -> Vec<Vec<NormalizedKey>> {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lookup(&self, key: &NormalizedKey) -> Option<Metadata> {
        if let Some(metadata) = self.catalog.get(key) {
            return Some(metadata.clone());
        }
        if self.echo {
            let mut metadata = Metadata::new();
            metadata.insert("title".to_string(), format!("Mock title {}", key.display_value()));
            metadata.insert("source".to_string(), "mock".to_string());
            return Some(metadata);
        }
        None
    }
}

#[async_trait]
impl CatalogTransport for MockTransport {
    async fn fetch_batch(&self, keys: &[NormalizedKey]) -> Result<CatalogResponse, TransportError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(keys.to_vec());

        let outcome = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(MockOutcome::Respond);

        match outcome {
            MockOutcome::Fail(error) => return Err(error),
            MockOutcome::Hang => {
                std::future::pending::<()>().await;
            }
            MockOutcome::Respond => {}
        }

        let latency = keys
            .iter()
            .filter_map(|k| self.key_latency.get(k))
            .fold(self.latency, |slowest, &d| slowest.max(d));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if keys.iter().any(|k| self.failing.contains(k)) {
            return Err(TransportError::Server { status: 503 });
        }

        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(keys.to_vec());
        Ok(keys
            .iter()
            .filter_map(|k| self.lookup(k).map(|m| (k.clone(), m)))
            .collect())
    }

    fn supports(&self, key: &NormalizedKey) -> bool {
        key.namespace() == KeyNamespace::Issn
    }

    fn name(&self) -> &str {
        "mock"
    }
}
