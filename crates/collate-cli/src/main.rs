//! Collate CLI - reconcile journal lists from spreadsheet exports.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Compare {
            files,
            output,
            config,
            mode,
            keys,
            threshold,
            catalog,
            enrich,
            year,
            json,
        } => commands::compare::run(
            commands::compare::CompareOptions {
                files,
                output,
                config,
                mode,
                keys,
                threshold,
                catalog,
                enrich,
                year,
                json,
            },
            cli.verbose,
        ),

        Commands::Enrich {
            file,
            output,
            config,
            column,
            catalog,
            batch_size,
            concurrency,
            refresh_failed,
        } => commands::enrich::run(
            commands::enrich::EnrichOptions {
                file,
                output,
                config,
                column,
                catalog,
                batch_size,
                concurrency,
                refresh_failed,
            },
            cli.verbose,
        ),

        Commands::Coverage {
            file,
            year,
            output,
            json,
        } => commands::coverage::run(file, year, output, json, cli.verbose),

        Commands::Dedup {
            file,
            columns,
            normalize,
            output,
        } => commands::dedup::run(file, columns, normalize, output, cli.verbose),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Log to stderr. `RUST_LOG` wins over the verbosity flag.
fn init_tracing(verbose: bool) {
    let default = if verbose { "collate=info" } else { "collate=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
