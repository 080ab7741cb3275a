//! Writing run results as CSV files.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CollateError, Result};
use crate::input::DataTable;
use crate::matching::MatchStatus;
use crate::merge::{self, ConsolidatedRow};
use crate::pipeline::{RunReport, RunSummary};

/// Write `table` as a delimited file with a header row.
pub fn write_table(path: impl AsRef<Path>, table: &DataTable, delimiter: u8) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(path)?;
    writer.write_record(&table.headers)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer.flush().map_err(|e| CollateError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Write every table of a report into `dir`:
///
/// - `consolidated.csv`: all rows
/// - `summary.csv`: run statistics
/// - `common.csv`: rows present in every file
/// - `exclusive_<source>.csv`: one per source, rows found only there
/// - `duplicates.csv`: probable-duplicate pairs
/// - `coverage.csv`: date coverage per file, when any file has dates
///
/// Sources whose names sanitize to the same file name get a numeric suffix
/// (`exclusive_wos_2024_2.csv`).
///
/// Returns the written paths in that order.
pub fn write_report(dir: impl AsRef<Path>, report: &RunReport) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(|e| CollateError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut written = Vec::new();
    let mut emit = |name: String, table: DataTable| -> Result<()> {
        let path = dir.join(name);
        write_table(&path, &table, b',')?;
        tracing::debug!(path = %path.display(), rows = table.row_count(), "Wrote table");
        written.push(path);
        Ok(())
    };

    emit("consolidated.csv".to_string(), report.to_table())?;
    emit("summary.csv".to_string(), summary_table(&report.summary))?;
    emit(
        "common.csv".to_string(),
        filtered(&report.rows, |row| row.status == MatchStatus::Common),
    )?;
    let mut taken = HashSet::new();
    for source in &report.outcome.sources {
        emit(
            format!("exclusive_{}.csv", unique_name(&sanitize_name(source), &mut taken)),
            filtered(&report.rows, |row| {
                row.group.presence.len() == 1 && row.group.presence.contains(source)
            }),
        )?;
    }
    emit("duplicates.csv".to_string(), duplicates_table(report))?;
    if !report.coverage.is_empty() {
        emit("coverage.csv".to_string(), report.coverage.to_table())?;
    }

    tracing::info!(dir = %dir.display(), files = written.len(), "Exported report");
    Ok(written)
}

/// Make a source id safe to use in a file name.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '[' | ']' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '_' || c == '.');
    if cleaned.is_empty() {
        "source".to_string()
    } else {
        cleaned.to_string()
    }
}

/// `name`, or `name_2`, `name_3`... if it is already in `taken`.
/// Case-insensitive, for case-folding file systems.
fn unique_name(name: &str, taken: &mut HashSet<String>) -> String {
    let mut candidate = name.to_string();
    let mut n = 2;
    while !taken.insert(candidate.to_lowercase()) {
        candidate = format!("{}_{}", name, n);
        n += 1;
    }
    candidate
}

fn filtered(rows: &[ConsolidatedRow], keep: impl Fn(&ConsolidatedRow) -> bool) -> DataTable {
    let selected: Vec<ConsolidatedRow> = rows.iter().filter(|r| keep(r)).cloned().collect();
    merge::to_table(&selected)
}

fn summary_table(summary: &RunSummary) -> DataTable {
    let counts = [
        ("files", summary.files),
        ("total_records", summary.total_records),
        ("groups", summary.groups),
        ("common", summary.common),
        ("partial", summary.partial),
        ("exclusive", summary.exclusive),
        ("flagged_duplicates", summary.flagged),
        ("probable_duplicate_pairs", summary.probable_duplicates),
        ("normalization_errors", summary.normalization_errors),
        ("checksum_mismatches", summary.checksum_mismatches),
        ("enriched_success", summary.enrichment.success),
        ("enriched_not_found", summary.enrichment.not_found),
        ("enriched_failed", summary.enrichment.failed),
        ("not_enriched", summary.enrichment.not_enriched),
        ("cache_hits", summary.enrichment.cache_hits),
        ("catalog_requests", summary.enrichment.requests),
    ];
    let mut rows: Vec<Vec<String>> = counts
        .iter()
        .map(|(metric, value)| vec![metric.to_string(), value.to_string()])
        .collect();
    for (source, count) in &summary.records_per_source {
        rows.push(vec![format!("records:{}", source), count.to_string()]);
    }
    for (source, count) in &summary.exclusive_per_source {
        rows.push(vec![format!("exclusive:{}", source), count.to_string()]);
    }
    for warning in &summary.warnings {
        rows.push(vec!["warning".to_string(), warning.to_string()]);
    }

    DataTable::new(vec!["metric".to_string(), "value".to_string()], rows)
}

fn duplicates_table(report: &RunReport) -> DataTable {
    let groups = &report.outcome.groups;
    let describe = |index: usize| -> (String, String) {
        groups
            .get(index)
            .map(|g| {
                let source = g.presence.first().cloned().unwrap_or_default();
                let row = g
                    .members
                    .first()
                    .map(|m| m.row_index().to_string())
                    .unwrap_or_default();
                (source, row)
            })
            .unwrap_or_default()
    };

    let rows = report
        .outcome
        .duplicates
        .iter()
        .map(|d| {
            let (left_source, left_row) = describe(d.left);
            let (right_source, right_row) = describe(d.right);
            vec![
                left_source,
                left_row,
                d.left_title.clone(),
                right_source,
                right_row,
                d.right_title.clone(),
                d.distance.to_string(),
            ]
        })
        .collect();

    DataTable::new(
        [
            "left_source",
            "left_row",
            "left_title",
            "right_source",
            "right_row",
            "right_title",
            "distance",
        ]
        .iter()
        .map(|h| h.to_string())
        .collect(),
        rows,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{Dataset, ParserConfig, TableParser};
    use crate::Pipeline;
    use tempfile::tempdir;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("journals 2024/Q1"), "journals_2024_Q1");
        assert_eq!(sanitize_name("a:b*c?"), "a_b_c");
        assert_eq!(sanitize_name("///"), "source");
    }

    #[test]
    fn test_write_report_files() {
        let datasets = vec![
            Dataset::from_column("scopus", "ISSN", &["1234-5678", "2345-6789"]),
            Dataset::from_column("wos", "ISSN", &["12345678"]),
        ];
        let report = Pipeline::new().run(&datasets).unwrap();

        let dir = tempdir().unwrap();
        let written = write_report(dir.path(), &report).unwrap();

        let names: Vec<String> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "consolidated.csv",
                "summary.csv",
                "common.csv",
                "exclusive_scopus.csv",
                "exclusive_wos.csv",
                "duplicates.csv"
            ]
        );

        let parser = TableParser::with_config(ParserConfig {
            delimiter: Some(b','),
            max_rows: None,
        });
        let (common, _) = parser.parse_file(dir.path().join("common.csv")).unwrap();
        assert_eq!(common.row_count(), 2);
        let (exclusive, _) = parser.parse_file(dir.path().join("exclusive_scopus.csv")).unwrap();
        assert_eq!(exclusive.row_count(), 1);
        let (wos_only, _) = parser.parse_file(dir.path().join("exclusive_wos.csv")).unwrap();
        assert_eq!(wos_only.row_count(), 0);
    }

    fn csv_parser() -> TableParser {
        TableParser::with_config(ParserConfig {
            delimiter: Some(b','),
            max_rows: None,
        })
    }

    #[test]
    fn test_colliding_source_names_kept_apart() {
        let datasets = vec![
            Dataset::from_column("wos 2024", "ISSN", &["1234-5678"]),
            Dataset::from_column("wos_2024", "ISSN", &["2345-6789"]),
        ];
        let report = Pipeline::new().run(&datasets).unwrap();

        let dir = tempdir().unwrap();
        write_report(dir.path(), &report).unwrap();

        let (first, _) = csv_parser()
            .parse_file(dir.path().join("exclusive_wos_2024.csv"))
            .unwrap();
        let (second, _) = csv_parser()
            .parse_file(dir.path().join("exclusive_wos_2024_2.csv"))
            .unwrap();
        assert_eq!(first.row_count(), 1);
        assert_eq!(second.row_count(), 1);
        assert_ne!(first.rows[0], second.rows[0]);
    }

    #[test]
    fn test_unique_name_is_case_insensitive() {
        let mut taken = HashSet::new();
        assert_eq!(unique_name("WoS", &mut taken), "WoS");
        assert_eq!(unique_name("wos", &mut taken), "wos_2");
        assert_eq!(unique_name("wos", &mut taken), "wos_3");
    }

    #[test]
    fn test_summary_lists_warnings() {
        let datasets = vec![
            Dataset::from_column("A", "ISSN", &["1234-5678"]),
            Dataset::from_column("B", "Publisher", &["Elsevier"]),
        ];
        let report = Pipeline::new().run(&datasets).unwrap();

        let table = summary_table(&report.summary);
        let warnings: Vec<&Vec<String>> = table.rows.iter().filter(|r| r[0] == "warning").collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0][1].contains("'B'"));
    }

    #[test]
    fn test_coverage_written_when_dates_present() {
        let dated = |source: &str, start: &str| {
            let table = DataTable::new(
                vec!["ISSN".into(), "Fecha Inicio".into()],
                vec![vec!["0028-0836".into(), start.into()]],
            );
            Dataset::from_table(source, &table)
        };
        let datasets = vec![dated("A", "1990"), dated("B", "")];
        let report = Pipeline::new().run(&datasets).unwrap();

        let dir = tempdir().unwrap();
        let written = write_report(dir.path(), &report).unwrap();
        assert_eq!(written.last().unwrap().file_name().unwrap(), "coverage.csv");

        let (coverage, _) = csv_parser().parse_file(dir.path().join("coverage.csv")).unwrap();
        assert_eq!(coverage.row_count(), 2);
        // B's only shared record has no start year.
        assert_eq!(coverage.rows[1][2], "1");
        assert_eq!(coverage.rows[1][3], "100.0");
    }
}
