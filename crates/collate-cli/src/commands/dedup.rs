//! Dedup command - drop repeated rows from a single list.

use std::path::PathBuf;

use colored::Colorize;
use collate::dedup::drop_duplicates;
use collate::{export, Dataset, TableParser};

use super::{sibling_path, CliResult};

pub fn run(
    file: PathBuf,
    columns: Vec<String>,
    normalize: bool,
    output: Option<PathBuf>,
    verbose: bool,
) -> CliResult<()> {
    if !file.exists() {
        return Err(format!("File not found: {}", file.display()).into());
    }

    println!(
        "{} {} on {}",
        "Deduplicating".cyan().bold(),
        file.display().to_string().white(),
        columns.join(", ")
    );

    let (table, source) = TableParser::new().parse_file(&file)?;
    let dataset = Dataset::from_table(source.stem(), &table);
    let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
    let outcome = drop_duplicates(&dataset, &column_refs, normalize)?;

    println!(
        "Kept {} of {} rows, removed {}",
        outcome.kept.len().to_string().green().bold(),
        dataset.len(),
        outcome.removed.len().to_string().yellow()
    );

    if verbose {
        for record in &outcome.removed {
            let values: Vec<&str> = column_refs
                .iter()
                .map(|c| record.field(c).unwrap_or(""))
                .collect();
            println!("  row {:>6}  {}", record.row_index(), values.join(" | ").dimmed());
        }
    }

    let output = output.unwrap_or_else(|| sibling_path(&file, "dedup"));
    let delimiter = if source.format == "tsv" { b'\t' } else { b',' };
    export::write_table(&output, &outcome.to_table(), delimiter)?;
    println!("{} {}", "Wrote".green().bold(), output.display());

    Ok(())
}
