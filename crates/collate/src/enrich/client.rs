//! Concurrent batched lookups with caching, pacing, retries and cancellation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use indexmap::IndexSet;
use tokio_util::sync::CancellationToken;

use super::backoff::{RetryPolicy, SlotPacer};
use super::transport::{CatalogResponse, CatalogTransport, TransportError};
use super::{EnrichmentCache, EnrichmentEntry, EnrichmentStatus};
use crate::config::EnrichmentConfig;
use crate::normalize::NormalizedKey;
use crate::progress::Progress;

/// What one call to [`EnrichmentClient::enrich`] resolved.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentReport {
    /// One entry per resolved key, whether from the cache or the catalog.
    pub entries: HashMap<NormalizedKey, EnrichmentEntry>,
    /// Distinct keys the catalog supports.
    pub requested: usize,
    /// Distinct keys skipped because the catalog cannot look them up.
    pub unsupported: usize,
    pub cache_hits: usize,
    pub batches: usize,
    /// Requests sent, retries included.
    pub requests: usize,
    /// Cancellation stopped the run before every batch finished.
    pub cancelled: bool,
}

impl EnrichmentReport {
    pub fn count(&self, status: EnrichmentStatus) -> usize {
        self.entries.values().filter(|e| e.status == status).count()
    }
}

#[derive(Default)]
struct SlotOutput {
    entries: Vec<EnrichmentEntry>,
    requests: usize,
}

/// Resolves keys against a [`CatalogTransport`], consulting a shared
/// [`EnrichmentCache`] first.
pub struct EnrichmentClient {
    transport: Arc<dyn CatalogTransport>,
    cache: Arc<EnrichmentCache>,
    config: EnrichmentConfig,
    policy: RetryPolicy,
    progress: Option<Arc<Progress>>,
}

impl EnrichmentClient {
    pub fn new(
        transport: Arc<dyn CatalogTransport>,
        cache: Arc<EnrichmentCache>,
        config: EnrichmentConfig,
    ) -> Self {
        let policy = RetryPolicy::from_config(&config);
        Self {
            transport,
            cache,
            config,
            policy,
            progress: None,
        }
    }

    /// Report batch counts to `progress`.
    pub fn with_progress(mut self, progress: Arc<Progress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cache(&self) -> &Arc<EnrichmentCache> {
        &self.cache
    }

    /// Resolve `keys`.
    ///
    /// Duplicate and empty keys are dropped, cached keys are answered from
    /// the cache, and the rest are fetched in batches. Each distinct key is
    /// sent in at most one batch. When `cancel` fires, in-flight batches
    /// are abandoned and whatever resolved so far is returned with
    /// [`EnrichmentReport::cancelled`] set.
    pub async fn enrich(
        &self,
        keys: impl IntoIterator<Item = NormalizedKey>,
        cancel: &CancellationToken,
    ) -> EnrichmentReport {
        let mut report = EnrichmentReport::default();

        let mut distinct = IndexSet::new();
        for key in keys {
            if key.is_empty() {
                continue;
            }
            if !self.transport.supports(&key) {
                report.unsupported += 1;
                continue;
            }
            distinct.insert(key);
        }
        report.requested = distinct.len();

        let mut misses = Vec::new();
        for key in distinct {
            if self.config.refresh_failed
                && self
                    .cache
                    .get(&key)
                    .is_some_and(|e| e.status == EnrichmentStatus::Failed)
            {
                self.cache.evict(&key);
            }
            match self.cache.get(&key) {
                Some(entry) => {
                    report.cache_hits += 1;
                    report.entries.insert(key, entry);
                }
                None => misses.push(key),
            }
        }

        let batch_size = self.config.batch_size.max(1);
        let queue: VecDeque<Vec<NormalizedKey>> =
            misses.chunks(batch_size).map(|c| c.to_vec()).collect();
        report.batches = queue.len();
        if let Some(progress) = &self.progress {
            progress.add_batches_total(report.batches);
        }

        tracing::info!(
            transport = self.transport.name(),
            keys = report.requested,
            cached = report.cache_hits,
            batches = report.batches,
            "Starting enrichment"
        );

        if queue.is_empty() {
            return report;
        }

        let slots = self.config.max_concurrency.max(1).min(queue.len());
        let queue = Mutex::new(queue);
        let outputs = join_all((0..slots).map(|slot| self.run_slot(slot, &queue, cancel))).await;

        let mut fetched = 0;
        for output in outputs {
            report.requests += output.requests;
            for entry in output.entries {
                fetched += 1;
                report.entries.insert(entry.key.clone(), entry);
            }
        }
        report.cancelled = fetched < misses.len();

        tracing::info!(
            success = report.count(EnrichmentStatus::Success),
            not_found = report.count(EnrichmentStatus::NotFound),
            failed = report.count(EnrichmentStatus::Failed),
            requests = report.requests,
            cancelled = report.cancelled,
            "Enrichment finished"
        );
        report
    }

    /// Pull batches off the shared queue until it is empty or the run is
    /// cancelled.
    async fn run_slot(
        &self,
        slot: usize,
        queue: &Mutex<VecDeque<Vec<NormalizedKey>>>,
        cancel: &CancellationToken,
    ) -> SlotOutput {
        let mut pacer = SlotPacer::new(self.config.min_request_interval);
        let mut output = SlotOutput::default();

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            let Some(batch) = next else {
                break;
            };

            let Some(entries) = self
                .fetch_with_retry(slot, &batch, &mut pacer, cancel, &mut output.requests)
                .await
            else {
                tracing::debug!(slot, keys = batch.len(), "Batch abandoned on cancellation");
                break;
            };

            for entry in entries {
                let (cached, _) = self.cache.insert(entry);
                output.entries.push(cached);
            }
            if let Some(progress) = &self.progress {
                progress.batch_done();
            }
        }
        output
    }

    /// One batch through the retry loop. `None` means cancelled.
    async fn fetch_with_retry(
        &self,
        slot: usize,
        batch: &[NormalizedKey],
        pacer: &mut SlotPacer,
        cancel: &CancellationToken,
        requests: &mut usize,
    ) -> Option<Vec<EnrichmentEntry>> {
        let mut retries = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = pacer.wait() => {}
            }

            *requests += 1;
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = tokio::time::timeout(
                    self.config.request_timeout,
                    self.transport.fetch_batch(batch),
                ) => result,
            };

            let error = match attempt {
                Ok(Ok(response)) => return Some(resolve(batch, response)),
                Ok(Err(error)) => error,
                Err(_) => TransportError::Timeout,
            };

            if !self.policy.can_retry(retries, &error) {
                tracing::warn!(
                    slot,
                    keys = batch.len(),
                    retries,
                    error = %error,
                    "Giving up on batch"
                );
                let reason = error.to_string();
                return Some(
                    batch
                        .iter()
                        .map(|key| EnrichmentEntry::failed(key.clone(), reason.clone()))
                        .collect(),
                );
            }

            retries += 1;
            let delay = self.policy.delay_for(retries, &error);
            tracing::debug!(slot, retry = retries, ?delay, error = %error, "Retrying batch");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Keys present in the response succeed; the rest were not found.
fn resolve(batch: &[NormalizedKey], mut response: CatalogResponse) -> Vec<EnrichmentEntry> {
    batch
        .iter()
        .map(|key| match response.remove(key) {
            Some(metadata) => EnrichmentEntry::success(key.clone(), metadata),
            None => EnrichmentEntry::not_found(key.clone()),
        })
        .collect()
}
