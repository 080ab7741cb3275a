//! Temporal coverage of holdings.
//!
//! Journal lists often say which years a subscription covers: a start
//! date, an end date (empty while the subscription is running) and an
//! embargo in months. From those a coverage span is derived per record,
//! e.g. `1995 - 2023` for a title running to 2024 with a 12 month
//! embargo. Some lists carry the span ready-made in a single range column,
//! which then takes precedence.
//!
//! Records whose start date holds no recognizable year are *reference*
//! resources (continuously updated works without a dated run). They are
//! counted per file and left out of the duration statistics.

use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::MatchMode;
use crate::input::{DataTable, Dataset, Record};
use crate::matching::MatchOutcome;

static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:19|20)\d{2}").unwrap());
static RANGE_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})").unwrap());
static RANGE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"-\s*(\d{4})").unwrap());

const RANGE_HEADERS: &[&str] = &["fecharango", "coveragerange", "daterange", "coverage"];
const START_HEADERS: &[&str] = &["fechainicio", "startdate", "coveragestart", "start", "from"];
const END_HEADERS: &[&str] = &[
    "fechatermino",
    "fechatérmino",
    "enddate",
    "coverageend",
    "end",
    "to",
];
const EMBARGO_HEADERS: &[&str] = &["retraso", "embargo", "embargomonths", "delay"];

/// First year between 1900 and 2099 written anywhere in `value`.
pub fn extract_year(value: &str) -> Option<i32> {
    if DataTable::is_null_value(value) {
        return None;
    }
    YEAR.find(value).and_then(|m| m.as_str().parse().ok())
}

/// Whole years removed from the end of coverage by an embargo of `months`.
///
/// Unreadable or empty cells mean no embargo. Fractional months are
/// truncated before dividing.
pub fn embargo_years(months: &str) -> i32 {
    let trimmed = months.trim();
    if DataTable::is_null_value(trimmed) {
        return 0;
    }
    match trimmed.parse::<f64>() {
        Ok(m) if m.is_finite() && m.abs() < f64::from(i32::MAX) => (m.trunc() as i32).div_euclid(12),
        _ => 0,
    }
}

/// Years a record is covered for, both ends inclusive as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSpan {
    pub start: i32,
    pub end: i32,
}

impl CoverageSpan {
    /// Read a span written as `YYYY - YYYY`. The first four-digit number is
    /// the start, the first one after a hyphen the end.
    pub fn parse(text: &str) -> Option<Self> {
        let start = RANGE_START.captures(text)?.get(1)?.as_str().parse().ok()?;
        let end = RANGE_END.captures(text)?.get(1)?.as_str().parse().ok()?;
        Some(Self { start, end })
    }

    /// Length in years. Negative when an embargo reaches past the start.
    pub fn years(&self) -> i32 {
        self.end - self.start
    }
}

impl fmt::Display for CoverageSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}

/// The date columns found in one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateColumns {
    pub range: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub embargo: Option<String>,
}

impl DateColumns {
    /// Recognize date columns by header, ignoring case, spacing and
    /// punctuation.
    pub fn resolve(headers: &[String]) -> Self {
        let find = |names: &[&str]| {
            headers
                .iter()
                .find(|h| names.contains(&squash(h).as_str()))
                .cloned()
        };
        Self {
            range: find(RANGE_HEADERS),
            start: find(START_HEADERS),
            end: find(END_HEADERS),
            embargo: find(EMBARGO_HEADERS),
        }
    }

    /// Whether spans can be derived at all.
    pub fn has_dates(&self) -> bool {
        self.range.is_some() || self.start.is_some()
    }

    /// Reference detection needs a start column.
    pub fn detects_reference(&self) -> bool {
        self.start.is_some()
    }

    /// Evaluate one record. Open-ended coverage runs to `current_year`.
    pub fn evaluate(&self, record: &Record, current_year: i32) -> RecordCoverage {
        let cell = |column: &Option<String>| {
            column
                .as_deref()
                .and_then(|c| record.field(c))
                .unwrap_or_default()
        };

        let start = self.start.as_ref().map(|_| extract_year(cell(&self.start)));
        let reference = start.map(|year| year.is_none());

        let span = if self.range.is_some() {
            CoverageSpan::parse(cell(&self.range))
        } else {
            start.flatten().map(|start| {
                let end = extract_year(cell(&self.end)).unwrap_or(current_year);
                CoverageSpan {
                    start,
                    end: end - embargo_years(cell(&self.embargo)),
                }
            })
        };

        RecordCoverage { reference, span }
    }
}

fn squash(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// What the date columns say about one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCoverage {
    /// `Some(true)` for a reference resource; `None` when the file has no
    /// start column to tell.
    pub reference: Option<bool>,
    pub span: Option<CoverageSpan>,
}

impl RecordCoverage {
    fn counts_toward_duration(&self) -> Option<CoverageSpan> {
        if self.reference == Some(true) {
            None
        } else {
            self.span
        }
    }
}

/// Coverage statistics for one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileCoverage {
    pub source: String,
    /// Records considered.
    pub records: usize,
    /// Reference records, or `None` without a start column.
    pub reference: Option<usize>,
    /// Row positions of the reference records.
    pub reference_rows: Vec<usize>,
    /// Records with a readable span that are not reference resources.
    pub analyzed: usize,
    pub mean_years: Option<f64>,
    pub min_years: Option<i32>,
    pub max_years: Option<i32>,
    /// Relative coverage against the other files, between 0 and 1.
    pub index: Option<f64>,
}

impl FileCoverage {
    fn collect<'a>(
        source: &str,
        columns: &DateColumns,
        records: impl IntoIterator<Item = &'a Record>,
        current_year: i32,
    ) -> Self {
        let mut stats = FileCoverage {
            source: source.to_string(),
            reference: columns.detects_reference().then_some(0),
            ..Self::default()
        };
        let mut durations = Vec::new();

        for record in records {
            stats.records += 1;
            let coverage = columns.evaluate(record, current_year);
            if coverage.reference == Some(true) {
                stats.reference_rows.push(record.row_index());
            }
            if let Some(span) = coverage.counts_toward_duration() {
                durations.push(span.years());
            }
        }

        if let Some(reference) = stats.reference.as_mut() {
            *reference = stats.reference_rows.len();
        }
        stats.analyzed = durations.len();
        if !durations.is_empty() {
            let total: i64 = durations.iter().map(|&d| i64::from(d)).sum();
            stats.mean_years = Some(total as f64 / durations.len() as f64);
            stats.min_years = durations.iter().min().copied();
            stats.max_years = durations.iter().max().copied();
        }
        stats
    }

    /// Share of reference records, in percent.
    pub fn reference_percent(&self) -> Option<f64> {
        match self.reference {
            Some(reference) if self.records > 0 => {
                Some(reference as f64 / self.records as f64 * 100.0)
            }
            _ => None,
        }
    }
}

/// Coverage of the records shared by every file, per file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub mode: MatchMode,
    pub files: Vec<FileCoverage>,
    /// Sources without any recognizable date column.
    pub without_dates: Vec<String>,
}

impl CoverageReport {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Reference records over every file that can tell.
    pub fn total_reference(&self) -> usize {
        self.files.iter().filter_map(|f| f.reference).sum()
    }

    pub fn total_records(&self) -> usize {
        self.files.iter().map(|f| f.records).sum()
    }

    /// One row per file. Minimum and maximum durations are only listed in
    /// advanced mode.
    pub fn to_table(&self) -> DataTable {
        let advanced = self.mode == MatchMode::Advanced;
        let mut headers = vec![
            "source",
            "records",
            "reference",
            "reference_pct",
            "analyzed",
            "mean_years",
        ];
        if advanced {
            headers.extend(["min_years", "max_years"]);
        }
        headers.push("coverage_index");

        let optional = |v: Option<String>| v.unwrap_or_default();
        let rows = self
            .files
            .iter()
            .map(|f| {
                let mut row = vec![
                    f.source.clone(),
                    f.records.to_string(),
                    optional(f.reference.map(|r| r.to_string())),
                    optional(f.reference_percent().map(|p| format!("{:.1}", p))),
                    f.analyzed.to_string(),
                    optional(f.mean_years.map(|m| format!("{:.1}", m))),
                ];
                if advanced {
                    row.push(optional(f.min_years.map(|m| m.to_string())));
                    row.push(optional(f.max_years.map(|m| m.to_string())));
                }
                row.push(optional(f.index.map(|i| format!("{:.2}", i))));
                row
            })
            .collect();

        DataTable::new(headers.into_iter().map(String::from).collect(), rows)
    }
}

/// Computes coverage for datasets and match outcomes.
#[derive(Debug, Clone)]
pub struct CoverageAnalyzer {
    current_year: i32,
    mode: MatchMode,
}

impl CoverageAnalyzer {
    /// `current_year` closes coverage that has no end date.
    pub fn new(current_year: i32) -> Self {
        Self {
            current_year,
            mode: MatchMode::Advanced,
        }
    }

    pub fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Coverage of every record of one file. `None` without date columns.
    pub fn analyze_dataset(&self, dataset: &Dataset) -> Option<FileCoverage> {
        let columns = DateColumns::resolve(dataset.headers());
        if !columns.has_dates() {
            return None;
        }
        Some(FileCoverage::collect(
            dataset.source_id(),
            &columns,
            dataset.records().iter().map(|r| &**r),
            self.current_year,
        ))
    }

    /// Coverage of the records in groups common to every file, per file,
    /// with a coverage index ranking the files against each other.
    pub fn analyze_matches(&self, datasets: &[Dataset], outcome: &MatchOutcome) -> CoverageReport {
        let mut shared: HashMap<&str, Vec<&Record>> = HashMap::new();
        for group in outcome.groups.iter().filter(|g| g.is_common(&outcome.sources)) {
            for member in &group.members {
                shared.entry(member.source_id()).or_default().push(member);
            }
        }

        let mut report = CoverageReport {
            mode: self.mode,
            ..CoverageReport::default()
        };
        for dataset in datasets {
            let columns = DateColumns::resolve(dataset.headers());
            if !columns.has_dates() {
                report.without_dates.push(dataset.source_id().to_string());
                continue;
            }
            let records = shared.remove(dataset.source_id()).unwrap_or_default();
            report.files.push(FileCoverage::collect(
                dataset.source_id(),
                &columns,
                records,
                self.current_year,
            ));
        }

        assign_index(&mut report.files);
        if !report.without_dates.is_empty() {
            tracing::debug!(sources = ?report.without_dates, "No date columns for coverage");
        }
        report
    }

    /// The dataset as a table with the derived span and reference flag
    /// appended to every row.
    pub fn annotate(&self, dataset: &Dataset) -> DataTable {
        let columns = DateColumns::resolve(dataset.headers());
        let mut headers = dataset.headers().to_vec();
        headers.push("coverage_range".to_string());
        headers.push("reference".to_string());

        let rows = dataset
            .records()
            .iter()
            .map(|record| {
                let coverage = columns.evaluate(record, self.current_year);
                let mut row: Vec<String> = dataset
                    .headers()
                    .iter()
                    .map(|h| record.field(h).unwrap_or_default().to_string())
                    .collect();
                row.push(coverage.span.map(|s| s.to_string()).unwrap_or_default());
                row.push(coverage.reference.map(|r| r.to_string()).unwrap_or_default());
                row
            })
            .collect();
        DataTable::new(headers, rows)
    }
}

/// Weighted percentile rank: 60% mean duration, 40% analyzed records.
/// Files without analyzed records get no index.
fn assign_index(files: &mut [FileCoverage]) {
    let ranked: Vec<usize> = (0..files.len())
        .filter(|&i| files[i].mean_years.is_some())
        .collect();
    let means: Vec<f64> = ranked
        .iter()
        .map(|&i| files[i].mean_years.unwrap_or_default())
        .collect();
    let counts: Vec<f64> = ranked.iter().map(|&i| files[i].analyzed as f64).collect();

    let mean_ranks = percentile_ranks(&means);
    let count_ranks = percentile_ranks(&counts);
    for (pos, &i) in ranked.iter().enumerate() {
        let index = mean_ranks[pos] * 0.6 + count_ranks[pos] * 0.4;
        files[i].index = Some((index * 100.0).round() / 100.0);
    }
}

/// Rank of each value divided by the number of values, ties sharing their
/// average rank.
fn percentile_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len() as f64;
    values
        .iter()
        .map(|&v| {
            let below = values.iter().filter(|&&o| o < v).count() as f64;
            let equal = values.iter().filter(|&&o| o == v).count() as f64;
            (below + (equal + 1.0) / 2.0) / n
        })
        .collect()
}
