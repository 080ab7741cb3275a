//! Main Pipeline struct and public API.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Datelike;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{CachePersistence, CollateConfig, EnrichTarget};
use crate::coverage::{CoverageAnalyzer, CoverageReport};
use crate::enrich::{
    CatalogTransport, EnrichmentCache, EnrichmentClient, EnrichmentReport, EnrichmentStatus,
};
use crate::error::{CollateError, Result};
use crate::input::{DataTable, Dataset, TableParser};
use crate::matching::{MatchOutcome, MatchStatus, MatchWarning, Matcher};
use crate::merge::{self, ConsolidatedRow, EnrichmentState};
use crate::normalize::NormalizedKey;
use crate::progress::{Progress, ProgressSnapshot, RunState};

/// Enrichment tallies for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentCounts {
    pub success: usize,
    pub not_found: usize,
    pub failed: usize,
    /// Rows with no enrichment entry.
    pub not_enriched: usize,
    pub cache_hits: usize,
    /// Requests sent, retries included.
    pub requests: usize,
}

/// Summary of a reconciliation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub files: usize,
    pub total_records: usize,
    pub records_per_source: IndexMap<String, usize>,
    pub groups: usize,
    pub common: usize,
    pub partial: usize,
    pub exclusive: usize,
    /// Groups found only in each source, flagged duplicates included.
    pub exclusive_per_source: IndexMap<String, usize>,
    /// Groups flagged as probable duplicates.
    pub flagged: usize,
    /// Probable-duplicate pairs.
    pub probable_duplicates: usize,
    pub normalization_errors: usize,
    pub checksum_mismatches: usize,
    pub enrichment: EnrichmentCounts,
    pub warnings: Vec<MatchWarning>,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// `Done`, or `Failed` for a cancelled run.
    pub state: RunState,
    /// The stage the run was in when it stopped. Equal to `state` when the
    /// run completed.
    pub state_before_failure: RunState,
    pub progress: ProgressSnapshot,
    pub outcome: MatchOutcome,
    pub rows: Vec<ConsolidatedRow>,
    /// Date coverage of the records common to every file.
    pub coverage: CoverageReport,
    pub summary: RunSummary,
}

impl RunReport {
    /// Whether this report holds the partial results of a cancelled run.
    pub fn is_partial(&self) -> bool {
        self.state != RunState::Done
    }

    /// One line per record; see [`merge::to_table`].
    pub fn to_table(&self) -> DataTable {
        merge::to_table(&self.rows)
    }
}

/// Intermediate results, kept so a cancelled run can still report them.
#[derive(Default)]
struct Artifacts {
    outcome: MatchOutcome,
    enrichment: EnrichmentReport,
    rows: Option<Vec<ConsolidatedRow>>,
}

struct Cancelled;

/// Ends a run however it ends: installs a fresh cancellation token for the
/// next run, then clears the single-flight flag. Both happen under the
/// token lock so [`Pipeline::cancel`] never reaches a later run.
struct RunGuard<'a> {
    running: &'a AtomicBool,
    cancel: &'a Mutex<CancellationToken>,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool, cancel: &'a Mutex<CancellationToken>) -> Result<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CollateError::RunInProgress)?;
        Ok(Self { running, cancel })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        *token = CancellationToken::new();
        self.running.store(false, Ordering::Release);
    }
}

/// The reconciliation engine: normalize, match, enrich, merge.
///
/// One pipeline runs one reconciliation at a time. A second request while
/// a run is active fails with [`CollateError::RunInProgress`]. The
/// enrichment cache belongs to the pipeline and, with
/// [`CachePersistence::InMemoryAcrossRuns`], answers repeated keys of later
/// runs without touching the network.
pub struct Pipeline {
    config: CollateConfig,
    transport: Option<Arc<dyn CatalogTransport>>,
    cache: Arc<EnrichmentCache>,
    progress: Arc<Progress>,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl Pipeline {
    /// Create a pipeline with default configuration.
    pub fn new() -> Self {
        Self::with_config(CollateConfig::default())
    }

    /// Create a pipeline with custom configuration.
    pub fn with_config(config: CollateConfig) -> Self {
        Self {
            config,
            transport: None,
            cache: Arc::new(EnrichmentCache::new()),
            progress: Arc::new(Progress::new()),
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Set the catalog used for enrichment.
    pub fn with_transport(self, transport: impl CatalogTransport + 'static) -> Self {
        self.with_shared_transport(Arc::new(transport))
    }

    pub fn with_shared_transport(mut self, transport: Arc<dyn CatalogTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use an existing cache, e.g. one loaded from disk.
    pub fn with_cache(mut self, cache: Arc<EnrichmentCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &CollateConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<EnrichmentCache> {
        &self.cache
    }

    /// Drop every cached enrichment entry.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn state(&self) -> RunState {
        self.progress.state()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Whether a run is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The token that cancels the current (or next) run. It is retired when
    /// that run ends.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Request cancellation of the current run. In-flight requests are
    /// abandoned and the run fails with [`CollateError::RunCancelled`],
    /// carrying whatever it had computed.
    ///
    /// Does nothing when no run is active.
    pub fn cancel(&self) {
        let token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_running() {
            tracing::debug!("Cancellation requested with no active run");
            return;
        }
        tracing::info!("Cancellation requested");
        token.cancel();
    }

    /// Load files into datasets named after their file stems.
    pub fn load(&self, paths: &[impl AsRef<Path>], parser: &TableParser) -> Result<Vec<Dataset>> {
        let mut datasets = Vec::with_capacity(paths.len());
        for path in paths {
            let (table, source) = parser.parse_file(path)?;
            tracing::info!(
                file = %source.file,
                rows = source.row_count,
                columns = source.column_count,
                "Loaded source"
            );
            datasets.push(Dataset::from_table(source.stem(), &table));
        }
        Ok(datasets)
    }

    /// Run a reconciliation, blocking until it finishes.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`Pipeline::run_async`] there.
    pub fn run(&self, datasets: &[Dataset]) -> Result<RunReport> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(CollateError::Runtime(
                "run() called from within an async runtime; use run_async()".to_string(),
            ));
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CollateError::Runtime(format!("Failed to start runtime: {}", e)))?;
        runtime.block_on(self.run_async(datasets))
    }

    /// Run a reconciliation.
    pub async fn run_async(&self, datasets: &[Dataset]) -> Result<RunReport> {
        let _guard = RunGuard::acquire(&self.running, &self.cancel)?;
        self.progress.reset();

        if let Err(e) = self
            .config
            .validate()
            .and_then(|()| self.check_inputs(datasets))
        {
            self.enter(RunState::Failed);
            tracing::warn!(error = %e, "Reconciliation rejected");
            return Err(e);
        }

        let cancel = self.cancel_token();
        if self.config.cache_persistence == CachePersistence::None {
            self.cache.clear();
        }

        tracing::info!(
            files = datasets.len(),
            mode = ?self.config.mode,
            enrich = ?self.config.enrichment.target,
            "Starting reconciliation run"
        );

        let mut artifacts = Artifacts::default();
        let result = self.execute(datasets, &cancel, &mut artifacts).await;
        let state_before_failure = self.progress.state();

        match result {
            Ok(()) => {
                let report = self.report(datasets, artifacts, state_before_failure);
                tracing::info!(
                    groups = report.summary.groups,
                    common = report.summary.common,
                    duplicates = report.summary.probable_duplicates,
                    "Reconciliation finished"
                );
                Ok(report)
            }
            Err(Cancelled) => {
                self.enter(RunState::Failed);
                let report = self.report(datasets, artifacts, state_before_failure);
                tracing::warn!(stage = %state_before_failure, "Reconciliation cancelled");
                Err(CollateError::RunCancelled {
                    partial: Box::new(report),
                })
            }
        }
    }

    fn check_inputs(&self, datasets: &[Dataset]) -> Result<()> {
        if datasets.is_empty() {
            return Err(CollateError::Config("no input files to reconcile".to_string()));
        }
        let mut seen = IndexSet::new();
        for dataset in datasets {
            if !seen.insert(dataset.source_id()) {
                return Err(CollateError::Config(format!(
                    "source id '{}' is used by more than one input",
                    dataset.source_id()
                )));
            }
        }
        if self.config.enrichment.target != EnrichTarget::None && self.transport.is_none() {
            return Err(CollateError::Config(
                "enrichment is enabled but no catalog transport is configured".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(
        &self,
        datasets: &[Dataset],
        cancel: &CancellationToken,
        artifacts: &mut Artifacts,
    ) -> std::result::Result<(), Cancelled> {
        let matcher = Matcher::from_config(&self.config);

        self.enter(RunState::Normalizing);
        let mut keyed = Vec::with_capacity(datasets.len());
        let mut warnings = Vec::new();
        for dataset in datasets {
            checkpoint(cancel)?;
            let (records, warning) = matcher.key_records(dataset);
            self.progress.add_normalized(records.len());
            warnings.extend(warning);
            keyed.push(records);
        }

        checkpoint(cancel)?;
        self.enter(RunState::Matching);
        let sources = datasets.iter().map(|d| d.source_id().to_string()).collect();
        let mut outcome = matcher.group(sources, keyed.into_iter().flatten());
        warnings.append(&mut outcome.warnings);
        outcome.warnings = warnings;
        self.progress.add_matched(outcome.record_count());
        artifacts.outcome = outcome;

        checkpoint(cancel)?;
        self.enter(RunState::Enriching);
        let keys = self.enrichment_keys(&artifacts.outcome);
        if let Some(transport) = &self.transport {
            if !keys.is_empty() {
                let client = EnrichmentClient::new(
                    Arc::clone(transport),
                    Arc::clone(&self.cache),
                    self.config.enrichment.clone(),
                )
                .with_progress(Arc::clone(&self.progress));
                artifacts.enrichment = client.enrich(keys, cancel).await;
                if artifacts.enrichment.cancelled {
                    return Err(Cancelled);
                }
            }
        }

        checkpoint(cancel)?;
        self.enter(RunState::Merging);
        let rows = merge::merge(&artifacts.outcome, &artifacts.enrichment.entries);
        self.progress.add_merged(rows.len());
        artifacts.rows = Some(rows);

        self.enter(RunState::Done);
        Ok(())
    }

    fn enter(&self, next: RunState) {
        let advanced = self.progress.advance(next);
        debug_assert!(advanced.is_ok(), "illegal run state transition to {}", next);
    }

    /// Keys of the groups selected for enrichment, in group order.
    fn enrichment_keys(&self, outcome: &MatchOutcome) -> Vec<NormalizedKey> {
        let target = self.config.enrichment.target;
        outcome
            .groups
            .iter()
            .filter(|g| !g.key.is_empty())
            .filter(|g| match target {
                EnrichTarget::None => false,
                EnrichTarget::Common => g.presence.len() > 1,
                EnrichTarget::All => true,
            })
            .map(|g| g.key.clone())
            .collect()
    }

    fn report(&self, datasets: &[Dataset], artifacts: Artifacts, state_before_failure: RunState) -> RunReport {
        let Artifacts {
            outcome,
            enrichment,
            rows,
        } = artifacts;
        // A cancelled run still merges whatever it has.
        let rows = rows.unwrap_or_else(|| merge::merge(&outcome, &enrichment.entries));
        let summary = summarize(datasets.len(), &outcome, &rows, &enrichment);

        let year = self
            .config
            .reference_year
            .unwrap_or_else(|| chrono::Local::now().year());
        let coverage = CoverageAnalyzer::new(year)
            .with_mode(self.config.mode)
            .analyze_matches(datasets, &outcome);

        RunReport {
            state: self.progress.state(),
            state_before_failure,
            progress: self.progress.snapshot(),
            outcome,
            rows,
            coverage,
            summary,
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn checkpoint(cancel: &CancellationToken) -> std::result::Result<(), Cancelled> {
    if cancel.is_cancelled() {
        Err(Cancelled)
    } else {
        Ok(())
    }
}

fn summarize(
    files: usize,
    outcome: &MatchOutcome,
    rows: &[ConsolidatedRow],
    enrichment: &EnrichmentReport,
) -> RunSummary {
    let mut records_per_source: IndexMap<String, usize> =
        outcome.sources.iter().map(|s| (s.clone(), 0)).collect();
    for group in &outcome.groups {
        for member in &group.members {
            *records_per_source
                .entry(member.source_id().to_string())
                .or_insert(0) += 1;
        }
    }

    let exclusive_per_source = outcome
        .sources
        .iter()
        .map(|s| (s.clone(), outcome.exclusive_groups(s).count()))
        .collect();

    let mut summary = RunSummary {
        files,
        total_records: outcome.record_count(),
        records_per_source,
        groups: outcome.groups.len(),
        exclusive_per_source,
        probable_duplicates: outcome.duplicates.len(),
        normalization_errors: outcome.normalization_errors,
        checksum_mismatches: outcome.checksum_mismatches,
        warnings: outcome.warnings.clone(),
        ..RunSummary::default()
    };

    for row in rows {
        match &row.status {
            MatchStatus::Common => summary.common += 1,
            MatchStatus::Partial(_) => summary.partial += 1,
            MatchStatus::Exclusive(_) => summary.exclusive += 1,
            MatchStatus::ProbableDuplicate => summary.flagged += 1,
        }
        match &row.enrichment {
            EnrichmentState::NotEnriched => summary.enrichment.not_enriched += 1,
            EnrichmentState::Resolved(entry) => match entry.status {
                EnrichmentStatus::Success => summary.enrichment.success += 1,
                EnrichmentStatus::NotFound => summary.enrichment.not_found += 1,
                EnrichmentStatus::Failed => summary.enrichment.failed += 1,
            },
        }
    }
    summary.enrichment.cache_hits = enrichment.cache_hits;
    summary.enrichment.requests = enrichment.requests;
    summary
}
