//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use collate::{EnrichTarget, MatchMode};

/// Collate: reconcile journal lists across spreadsheet exports
#[derive(Parser)]
#[command(name = "collate")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compare two or more lists and report common, exclusive and
    /// near-duplicate journals
    Compare {
        /// Source files (CSV/TSV); each file's stem becomes its source id
        #[arg(value_name = "FILE", required = true, num_args = 1..)]
        files: Vec<PathBuf>,

        /// Directory for the CSV report
        #[arg(short, long, default_value = "collate-report")]
        output: PathBuf,

        /// JSON configuration file; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Matching mode
        #[arg(long)]
        mode: Option<ModeChoice>,

        /// Key column in priority order, optionally pinned to a header,
        /// e.g. `--key issn="Print ISSN" --key title`
        #[arg(long = "key", value_name = "TYPE[=HEADER]")]
        keys: Vec<String>,

        /// Largest title edit distance still flagged as a probable duplicate
        #[arg(long)]
        threshold: Option<usize>,

        #[command(flatten)]
        catalog: CatalogArgs,

        /// Which groups to look up in the catalog
        #[arg(long)]
        enrich: Option<TargetChoice>,

        /// Year that closes open-ended coverage (default: current year)
        #[arg(long)]
        year: Option<i32>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Look up every ISSN of a single list in the catalog
    Enrich {
        /// Source file (CSV/TSV)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output path (default: <file>.enriched.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// ISSN column header (default: inferred)
        #[arg(short, long)]
        column: Option<String>,

        #[command(flatten)]
        catalog: CatalogArgs,

        /// Keys per catalog request
        #[arg(long)]
        batch_size: Option<usize>,

        /// Simultaneous catalog requests
        #[arg(long)]
        concurrency: Option<usize>,

        /// Look up again keys whose cached lookup failed
        #[arg(long)]
        refresh_failed: bool,
    },

    /// Date coverage and reference resources of a single list
    Coverage {
        /// Source file (CSV/TSV) with start, end and embargo columns
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Year that closes open-ended coverage (default: current year)
        #[arg(long)]
        year: Option<i32>,

        /// Write the list with its coverage range and reference flag
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove repeated rows from a single list
    Dedup {
        /// Source file (CSV/TSV)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Column that identifies a row; repeat for a composite identity
        #[arg(short, long = "column", value_name = "HEADER", required = true)]
        columns: Vec<String>,

        /// Compare normalized values instead of raw text
        #[arg(long)]
        normalize: bool,

        /// Output path (default: <file>.dedup.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Catalog connection options shared by commands that enrich.
#[derive(Args, Clone, Debug, Default)]
pub struct CatalogArgs {
    /// Contact email sent to OpenAlex
    #[arg(long, env = "COLLATE_MAILTO")]
    pub mailto: Option<String>,

    /// Override the OpenAlex base URL
    #[arg(long)]
    pub openalex_url: Option<String>,

    /// Use an offline mock catalog instead of OpenAlex
    #[arg(long)]
    pub mock: bool,

    /// Enrichment cache file, loaded before and saved after the run
    #[arg(long)]
    pub cache_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ModeChoice {
    /// Exact key matching only
    Fast,
    /// Exact matching plus near-duplicate title detection
    Advanced,
}

impl From<ModeChoice> for MatchMode {
    fn from(choice: ModeChoice) -> Self {
        match choice {
            ModeChoice::Fast => MatchMode::Fast,
            ModeChoice::Advanced => MatchMode::Advanced,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum TargetChoice {
    None,
    /// Groups found in more than one file
    Common,
    All,
}

impl From<TargetChoice> for EnrichTarget {
    fn from(choice: TargetChoice) -> Self {
        match choice {
            TargetChoice::None => EnrichTarget::None,
            TargetChoice::Common => EnrichTarget::Common,
            TargetChoice::All => EnrichTarget::All,
        }
    }
}
