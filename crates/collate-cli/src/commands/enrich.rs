//! Enrich command - look up every journal of one list in the catalog.

use std::path::PathBuf;

use colored::Colorize;
use collate::{export, EnrichTarget, EnrichmentStatus, FieldType, TableParser};

use super::{build_pipeline, load_config, run_interruptible, save_cache, sibling_path, CliResult};
use crate::cli::CatalogArgs;

pub struct EnrichOptions {
    pub file: PathBuf,
    pub output: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub column: Option<String>,
    pub catalog: CatalogArgs,
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
    pub refresh_failed: bool,
}

pub fn run(options: EnrichOptions, verbose: bool) -> CliResult<()> {
    if !options.file.exists() {
        return Err(format!("File not found: {}", options.file.display()).into());
    }

    let mut config = load_config(options.config.as_deref())?.with_enrich_target(EnrichTarget::All);
    if let Some(batch_size) = options.batch_size {
        config.enrichment.batch_size = batch_size;
    }
    if let Some(concurrency) = options.concurrency {
        config.enrichment.max_concurrency = concurrency;
    }
    config.enrichment.refresh_failed |= options.refresh_failed;
    if let Some(ref header) = options.column {
        config = config
            .with_priority(vec![FieldType::Issn])
            .with_column(FieldType::Issn, header.as_str());
    }

    let pipeline = build_pipeline(config, &options.catalog)?;

    println!(
        "{} {}",
        "Enriching".cyan().bold(),
        options.file.display().to_string().white()
    );

    let datasets = pipeline.load(std::slice::from_ref(&options.file), &TableParser::new())?;
    let report = run_interruptible(&pipeline, &datasets)?;
    save_cache(&pipeline, &options.catalog)?;

    let counts = &report.summary.enrichment;
    println!(
        "Looked up {} journals: {} found, {} not found, {} failed",
        (counts.success + counts.not_found + counts.failed)
            .to_string()
            .white()
            .bold(),
        counts.success.to_string().green(),
        counts.not_found.to_string().yellow(),
        counts.failed.to_string().red()
    );
    println!(
        "  {} requests, {} cache hits, {} rows without a usable ISSN",
        counts.requests, counts.cache_hits, counts.not_enriched
    );

    if verbose {
        for row in &report.rows {
            if let Some(entry) = row.entry() {
                if entry.status == EnrichmentStatus::Failed {
                    println!(
                        "  {} {}: {}",
                        "failed".red(),
                        entry.key,
                        entry.error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
    }

    let output = options
        .output
        .unwrap_or_else(|| sibling_path(&options.file, "enriched"));
    export::write_table(&output, &report.to_table(), b',')?;
    println!();
    println!("{} {}", "Wrote".green().bold(), output.display());

    Ok(())
}
