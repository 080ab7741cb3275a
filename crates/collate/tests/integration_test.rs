//! Integration tests for Collate.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::{tempdir, TempDir};

use collate::enrich::MockTransport;
use collate::export;
use collate::{
    CollateConfig, CollateError, EnrichTarget, EnrichmentStatus, MatchMode, MatchStatus, Pipeline,
    RunState, TableParser,
};

/// Write `files` into a fresh temporary directory.
fn create_sources(files: &[(&str, &str)]) -> (TempDir, Vec<PathBuf>) {
    let dir = tempdir().expect("Failed to create temp dir");
    let paths = files
        .iter()
        .map(|(name, content)| {
            let path = dir.path().join(name);
            fs::write(&path, content).expect("Failed to write source");
            path
        })
        .collect();
    (dir, paths)
}

fn run(pipeline: &Pipeline, paths: &[PathBuf]) -> collate::RunReport {
    let datasets = pipeline
        .load(paths, &TableParser::new())
        .expect("Failed to load sources");
    pipeline.run(&datasets).expect("Run failed")
}

// =============================================================================
// Matching
// =============================================================================

#[test]
fn test_issn_reconciliation_across_formats() {
    let (_dir, paths) = create_sources(&[
        (
            "scopus.csv",
            "Title,ISSN\n\
             Example Journal,1234-5678\n\
             Only In Scopus,0000-0001\n",
        ),
        (
            "wos.csv",
            "Title;ISSN\n\
             Example Journal;12345678\n\
             Only In WoS;2345-6789\n",
        ),
    ]);

    let report = run(&Pipeline::new(), &paths);

    assert_eq!(report.summary.files, 2);
    assert_eq!(report.summary.total_records, 4);
    assert_eq!(report.summary.groups, 3);
    assert_eq!(report.summary.common, 1);
    assert_eq!(report.rows[0].status, MatchStatus::Common);
    assert_eq!(report.rows[0].group.members.len(), 2);
    assert_eq!(report.summary.exclusive_per_source["scopus"], 1);
    assert_eq!(report.summary.exclusive_per_source["wos"], 1);
}

#[test]
fn test_composite_key_falls_back_to_title() {
    let (_dir, paths) = create_sources(&[
        (
            "a.csv",
            "ISSN,Title\n\
             ,The Lancet\n\
             1234-5678,Example Journal\n",
        ),
        (
            "b.csv",
            "ISSN,Title\n\
             ,Lancet\n",
        ),
    ]);

    let report = run(&Pipeline::new(), &paths);

    let lancet = &report.rows[0];
    assert_eq!(lancet.status, MatchStatus::Common);
    assert_eq!(lancet.group.key.value(), "lancet");
}

#[test]
fn test_near_duplicates_flagged_not_merged() {
    let (_dir, paths) = create_sources(&[
        ("a.csv", "Title\nJournal of Biology\n"),
        ("b.csv", "Title\nJournal of Biologie\n"),
    ]);

    let report = run(&Pipeline::new(), &paths);

    assert_eq!(report.summary.groups, 2);
    assert_eq!(report.summary.probable_duplicates, 1);
    assert_eq!(report.summary.flagged, 2);
    assert!(report
        .rows
        .iter()
        .all(|r| r.status == MatchStatus::ProbableDuplicate));

    let fast = Pipeline::with_config(CollateConfig::default().with_mode(MatchMode::Fast));
    let report = run(&fast, &paths);
    assert_eq!(report.summary.probable_duplicates, 0);
    assert_eq!(report.summary.exclusive, 2);
}

#[test]
fn test_three_files_partial_presence() {
    let (_dir, paths) = create_sources(&[
        ("a.csv", "ISSN\n1234-5678\n"),
        ("b.csv", "ISSN\n1234-5678\n"),
        ("c.csv", "ISSN\n2345-6789\n"),
    ]);

    let report = run(&Pipeline::new(), &paths);

    assert_eq!(
        report.rows[0].status,
        MatchStatus::Partial(vec!["a".to_string(), "b".to_string()])
    );
    assert_eq!(report.summary.partial, 1);
    assert_eq!(report.summary.common, 0);
}

#[test]
fn test_invalid_identifiers_kept_as_unmatched() {
    let (_dir, paths) = create_sources(&[
        ("a.csv", "ISSN\nnot-an-issn\n1234-5678\n"),
        ("b.csv", "ISSN\nnot-an-issn\n"),
    ]);

    let report = run(&Pipeline::new(), &paths);

    assert_eq!(report.summary.total_records, 3);
    assert_eq!(report.summary.groups, 3);
    assert_eq!(report.summary.normalization_errors, 2);
}

#[test]
fn test_missing_file_is_io_error() {
    let pipeline = Pipeline::new();
    let result = pipeline.load(&[Path::new("/no/such/file.csv")], &TableParser::new());
    assert!(matches!(result, Err(CollateError::Io { .. })));
}

#[test]
fn test_duplicate_file_stems_rejected() {
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    let a = dir_a.path().join("list.csv");
    let b = dir_b.path().join("list.csv");
    fs::write(&a, "ISSN\n1234-5678\n").unwrap();
    fs::write(&b, "ISSN\n1234-5678\n").unwrap();

    let pipeline = Pipeline::new();
    let datasets = pipeline.load(&[a, b], &TableParser::new()).unwrap();
    assert!(matches!(pipeline.run(&datasets), Err(CollateError::Config(_))));
}

// =============================================================================
// Enrichment and Export
// =============================================================================

#[test]
fn test_enriched_run_and_export() {
    let (dir, paths) = create_sources(&[
        ("scopus.csv", "ISSN,Title\n0028-0836,Nature\n2345-6789,Local Bulletin\n"),
        ("wos.csv", "ISSN,Title\n00280836,Nature\n"),
    ]);
    let transport = Arc::new(MockTransport::new().with_title("00280836", "Nature"));
    let mut config = CollateConfig::default().with_enrich_target(EnrichTarget::All);
    config.enrichment.min_request_interval = std::time::Duration::ZERO;
    let pipeline = Pipeline::with_config(config).with_shared_transport(transport.clone());

    let report = run(&pipeline, &paths);

    assert_eq!(report.state, RunState::Done);
    assert_eq!(transport.call_count(), 1);
    assert_eq!(report.summary.enrichment.success, 1);
    assert_eq!(report.summary.enrichment.not_found, 1);
    assert_eq!(
        report.rows[0].entry().map(|e| e.status),
        Some(EnrichmentStatus::Success)
    );

    let out = dir.path().join("out");
    let written = export::write_report(&out, &report).unwrap();
    assert_eq!(written.len(), 6);

    let consolidated = fs::read_to_string(out.join("consolidated.csv")).unwrap();
    let header = consolidated.lines().next().unwrap();
    assert_eq!(
        header,
        "match_status,match_key,source_id,row_index,ISSN,Title,enrichment_status,catalog_title"
    );
    assert_eq!(consolidated.lines().count(), 4);
}

#[test]
fn test_cache_file_roundtrip_between_pipelines() {
    let (dir, paths) = create_sources(&[
        ("a.csv", "ISSN\n0028-0836\n"),
        ("b.csv", "ISSN\n0028-0836\n"),
    ]);
    let mut config = CollateConfig::default().with_enrich_target(EnrichTarget::Common);
    config.enrichment.min_request_interval = std::time::Duration::ZERO;

    let first_transport = Arc::new(MockTransport::echo());
    let first = Pipeline::with_config(config.clone()).with_shared_transport(first_transport.clone());
    run(&first, &paths);
    let cache_path = dir.path().join("cache.json");
    first.cache().save(&cache_path).unwrap();

    let second_transport = Arc::new(MockTransport::echo());
    let cache = Arc::new(collate::EnrichmentCache::load(&cache_path).unwrap());
    let second = Pipeline::with_config(config)
        .with_shared_transport(second_transport.clone())
        .with_cache(cache);
    let report = run(&second, &paths);

    assert_eq!(first_transport.call_count(), 1);
    assert_eq!(second_transport.call_count(), 0);
    assert_eq!(report.summary.enrichment.cache_hits, 1);
}
