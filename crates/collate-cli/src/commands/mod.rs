//! CLI command implementations.

pub mod compare;
pub mod coverage;
pub mod dedup;
pub mod enrich;

use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use collate::enrich::{EnrichmentCache, MockTransport, OpenAlexConfig, OpenAlexTransport};
use collate::{CollateConfig, CollateError, Dataset, EnrichTarget, Pipeline, RunReport};

use crate::cli::CatalogArgs;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Read a JSON config file, or take the defaults.
fn load_config(path: Option<&Path>) -> CliResult<CollateConfig> {
    match path {
        Some(path) => Ok(CollateConfig::load(path)?),
        None => Ok(CollateConfig::default()),
    }
}

/// Build a pipeline with a catalog transport and a cache, when the
/// configuration asks for enrichment.
fn build_pipeline(config: CollateConfig, catalog: &CatalogArgs) -> CliResult<Pipeline> {
    let enriching = config.enrichment.target != EnrichTarget::None;
    let mut pipeline = Pipeline::with_config(config);

    if !enriching {
        return Ok(pipeline);
    }

    if catalog.mock {
        pipeline = pipeline.with_transport(MockTransport::echo());
    } else {
        let mut openalex = OpenAlexConfig::default();
        if let Some(ref mailto) = catalog.mailto {
            openalex = openalex.with_mailto(mailto);
        }
        if let Some(ref url) = catalog.openalex_url {
            openalex = openalex.with_base_url(url);
        }
        pipeline = pipeline.with_transport(OpenAlexTransport::new(openalex)?);
    }

    if let Some(ref path) = catalog.cache_file {
        if path.exists() {
            let cache = EnrichmentCache::load(path)?;
            println!(
                "{} {} cached lookups from {}",
                "Loaded".cyan(),
                cache.len().to_string().white().bold(),
                path.display()
            );
            pipeline = pipeline.with_cache(Arc::new(cache));
        }
    }

    Ok(pipeline)
}

/// Run the pipeline with Ctrl-C wired to cancellation. A cancelled run
/// still yields its partial report.
fn run_interruptible(pipeline: &Pipeline, datasets: &[Dataset]) -> CliResult<RunReport> {
    let token = pipeline.cancel_token();
    ctrlc::set_handler(move || {
        eprintln!("{}", "Interrupted, finishing in-flight work...".yellow());
        token.cancel();
    })?;

    match pipeline.run(datasets) {
        Ok(report) => Ok(report),
        Err(CollateError::RunCancelled { partial }) => {
            eprintln!(
                "{} run cancelled during {}; results are partial",
                "Warning:".yellow().bold(),
                partial.state_before_failure
            );
            Ok(*partial)
        }
        Err(e) => Err(e.into()),
    }
}

/// Write the pipeline cache back to the file it came from, if any.
fn save_cache(pipeline: &Pipeline, catalog: &CatalogArgs) -> CliResult<()> {
    if let Some(ref path) = catalog.cache_file {
        pipeline.cache().save(path)?;
        println!(
            "{} {} cached lookups to {}",
            "Saved".green(),
            pipeline.cache().len().to_string().white().bold(),
            path.display()
        );
    }
    Ok(())
}

/// `<dir>/<stem>.<suffix>.csv` next to the input.
fn sibling_path(file: &Path, suffix: &str) -> std::path::PathBuf {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    file.with_file_name(format!("{}.{}.csv", stem, suffix))
}
