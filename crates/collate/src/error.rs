//! Error types for the collate library.

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::RunReport;

/// Main error type for collate operations.
#[derive(Debug, Error)]
pub enum CollateError {
    /// Error reading or accessing a file.
    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error from the CSV library.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Empty file or no data to reconcile.
    #[error("Empty data: {0}")]
    EmptyData(String),

    /// Invalid run options. Raised before any I/O takes place.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error saving or loading persisted state.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The async runtime backing enrichment could not be started.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// A second run was requested while one is still active.
    #[error("A reconciliation run is already in progress")]
    RunInProgress,

    /// The run was cancelled. Whatever was computed before cancellation is
    /// carried along instead of being discarded.
    #[error("Run cancelled during {stage} ({completed} of {total} batches enriched)", stage = .partial.state_before_failure, completed = .partial.progress.batches_done, total = .partial.progress.batches_total)]
    RunCancelled { partial: Box<RunReport> },
}

/// Result type alias for collate operations.
pub type Result<T> = std::result::Result<T, CollateError>;
