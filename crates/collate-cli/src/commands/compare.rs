//! Compare command - reconcile several lists and write the report.

use std::path::PathBuf;

use colored::Colorize;
use collate::normalize::FieldType;
use collate::{export, CollateConfig, RunReport, TableParser};

use super::{build_pipeline, load_config, run_interruptible, save_cache, CliResult};
use crate::cli::{CatalogArgs, ModeChoice, TargetChoice};

pub struct CompareOptions {
    pub files: Vec<PathBuf>,
    pub output: PathBuf,
    pub config: Option<PathBuf>,
    pub mode: Option<ModeChoice>,
    pub keys: Vec<String>,
    pub threshold: Option<usize>,
    pub catalog: CatalogArgs,
    pub enrich: Option<TargetChoice>,
    pub year: Option<i32>,
    pub json: bool,
}

pub fn run(options: CompareOptions, verbose: bool) -> CliResult<()> {
    for file in &options.files {
        if !file.exists() {
            return Err(format!("File not found: {}", file.display()).into());
        }
    }

    let config = apply_overrides(load_config(options.config.as_deref())?, &options)?;
    let pipeline = build_pipeline(config, &options.catalog)?;

    println!(
        "{} {} files",
        "Comparing".cyan().bold(),
        options.files.len().to_string().white()
    );

    let datasets = pipeline.load(&options.files, &TableParser::new())?;
    if verbose {
        for dataset in &datasets {
            println!(
                "  {:30} {:>8} rows  {}",
                dataset.source_id(),
                dataset.len(),
                dataset.headers().join(", ").dimmed()
            );
        }
    }

    let report = run_interruptible(&pipeline, &datasets)?;
    save_cache(&pipeline, &options.catalog)?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report.summary)?);
    } else {
        print_summary(&report);
    }

    let written = export::write_report(&options.output, &report)?;
    println!();
    println!(
        "{} {} files to {}",
        "Wrote".green().bold(),
        written.len(),
        options.output.display()
    );
    if verbose {
        for path in &written {
            println!("  {}", path.display());
        }
    }

    Ok(())
}

/// Command-line flags take precedence over the config file.
fn apply_overrides(mut config: CollateConfig, options: &CompareOptions) -> CliResult<CollateConfig> {
    if let Some(mode) = options.mode {
        config = config.with_mode(mode.into());
    }
    if !options.keys.is_empty() {
        let mut priority = Vec::with_capacity(options.keys.len());
        for arg in &options.keys {
            let (field, header) = match arg.split_once('=') {
                Some((field, header)) => (field, Some(header.trim())),
                None => (arg.as_str(), None),
            };
            let field_type: FieldType = field.trim().parse()?;
            match header {
                Some("") => return Err(format!("Empty header in --key '{}'", arg).into()),
                Some(header) => config = config.with_column(field_type, header),
                None => {}
            }
            priority.push(field_type);
        }
        config = config.with_priority(priority);
    }
    if let Some(threshold) = options.threshold {
        config.duplicate_threshold = threshold;
    }
    if let Some(target) = options.enrich {
        config = config.with_enrich_target(target.into());
    }
    if options.year.is_some() {
        config.reference_year = options.year;
    }
    Ok(config)
}

fn print_summary(report: &RunReport) {
    let summary = &report.summary;

    println!();
    println!(
        "Matched {} records into {} groups",
        summary.total_records.to_string().white().bold(),
        summary.groups.to_string().white().bold()
    );
    println!("  {:24} {}", "Common".green(), summary.common);
    if summary.partial > 0 {
        println!("  {:24} {}", "Partial".cyan(), summary.partial);
    }
    for (source, count) in &summary.exclusive_per_source {
        println!("  {:24} {}", format!("Only in {}", source).blue(), count);
    }
    if summary.probable_duplicates > 0 {
        println!(
            "  {:24} {} pairs ({} rows)",
            "Probable duplicates".yellow(),
            summary.probable_duplicates,
            summary.flagged
        );
    }
    if summary.normalization_errors > 0 {
        println!(
            "  {:24} {}",
            "Unreadable keys".red(),
            summary.normalization_errors
        );
    }
    if summary.checksum_mismatches > 0 {
        println!(
            "  {:24} {}",
            "ISSN check-digit mismatches".yellow(),
            summary.checksum_mismatches
        );
    }

    let enrichment = &summary.enrichment;
    if enrichment.requests > 0 || enrichment.cache_hits > 0 {
        println!();
        println!(
            "Enrichment: {} found, {} not found, {} failed ({} requests, {} cache hits)",
            enrichment.success.to_string().green(),
            enrichment.not_found.to_string().yellow(),
            enrichment.failed.to_string().red(),
            enrichment.requests,
            enrichment.cache_hits
        );
    }

    let coverage = &report.coverage;
    if !coverage.is_empty() {
        println!();
        println!(
            "Coverage of common records: {} of {} are reference resources",
            coverage.total_reference().to_string().yellow(),
            coverage.total_records()
        );
        for file in &coverage.files {
            let mean = file
                .mean_years
                .map(|m| format!("{:.1} years", m))
                .unwrap_or_else(|| "-".to_string());
            let index = file
                .index
                .map(|i| format!("{:.2}", i))
                .unwrap_or_else(|| "-".to_string());
            println!("  {:24} mean {:>12}  index {}", file.source, mean, index);
        }
    }

    for warning in &summary.warnings {
        println!("{} {}", "Warning:".yellow().bold(), warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collate::{EnrichTarget, MatchMode};

    fn options() -> CompareOptions {
        CompareOptions {
            files: vec![],
            output: PathBuf::from("out"),
            config: None,
            mode: None,
            keys: vec![],
            threshold: None,
            catalog: CatalogArgs::default(),
            enrich: None,
            year: None,
            json: false,
        }
    }

    #[test]
    fn test_overrides_replace_config_values() {
        let options = CompareOptions {
            mode: Some(ModeChoice::Fast),
            keys: vec!["issn = Print ISSN".to_string(), "title".to_string()],
            threshold: Some(4),
            enrich: Some(TargetChoice::Common),
            year: Some(2020),
            ..options()
        };

        let config = apply_overrides(CollateConfig::default(), &options).unwrap();

        assert_eq!(config.mode, MatchMode::Fast);
        assert_eq!(config.key_column_priority, vec![FieldType::Issn, FieldType::Title]);
        assert_eq!(config.columns[&FieldType::Issn], "Print ISSN");
        assert_eq!(config.duplicate_threshold, 4);
        assert_eq!(config.enrichment.target, EnrichTarget::Common);
        assert_eq!(config.reference_year, Some(2020));
    }

    #[test]
    fn test_bad_key_rejected() {
        for arg in ["Print ISSN", "issn="] {
            let options = CompareOptions {
                keys: vec![arg.to_string()],
                ..options()
            };
            assert!(apply_overrides(CollateConfig::default(), &options).is_err(), "{arg}");
        }
    }
}
