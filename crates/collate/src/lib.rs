//! Collate: reconciliation of bibliographic journal lists.
//!
//! Collate takes several spreadsheet exports of journal lists (library
//! holdings, indexing databases, publisher catalogs) and works out which
//! journals they share, which only one of them carries, and which rows look
//! like the same journal written two different ways. Optionally it looks
//! the keys up in an external catalog and attaches what it finds.
//!
//! # Stages
//!
//! - **Normalize**: reduce ISSNs and titles to canonical keys
//! - **Match**: group records on their key; flag near-duplicate titles
//! - **Enrich**: batched, cached, retried catalog lookups
//! - **Merge**: join groups and lookups into consolidated rows
//!
//! Alongside, [`coverage`] derives date coverage of the shared records
//! from start, end and embargo columns.
//!
//! # Example
//!
//! ```no_run
//! use collate::{Pipeline, TableParser};
//!
//! let pipeline = Pipeline::new();
//! let datasets = pipeline
//!     .load(&["scopus.csv", "wos.csv"], &TableParser::new())
//!     .unwrap();
//! let report = pipeline.run(&datasets).unwrap();
//!
//! println!("Common: {}", report.summary.common);
//! println!("Probable duplicates: {}", report.summary.probable_duplicates);
//! ```

pub mod config;
pub mod coverage;
pub mod dedup;
pub mod enrich;
pub mod error;
pub mod export;
pub mod input;
pub mod matching;
pub mod merge;
pub mod normalize;
pub mod progress;

mod pipeline;

pub use crate::pipeline::{EnrichmentCounts, Pipeline, RunReport, RunSummary};
pub use config::{CollateConfig, EnrichTarget, EnrichmentConfig, MatchMode};
pub use coverage::{CoverageAnalyzer, CoverageReport, FileCoverage};
pub use enrich::{EnrichmentCache, EnrichmentEntry, EnrichmentStatus};
pub use error::{CollateError, Result};
pub use input::{DataTable, Dataset, ParserConfig, Record, SourceMetadata, TableParser};
pub use matching::{MatchGroup, MatchOutcome, MatchStatus, Matcher};
pub use merge::{ConsolidatedRow, EnrichmentState};
pub use normalize::{FieldType, NormalizedKey};
pub use progress::{ProgressSnapshot, RunState};
