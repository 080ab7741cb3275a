//! Coverage command - date coverage and reference resources of one list.

use std::path::PathBuf;

use chrono::Datelike;
use colored::Colorize;
use collate::{export, CoverageAnalyzer, Dataset, TableParser};

use super::CliResult;

pub fn run(
    file: PathBuf,
    year: Option<i32>,
    output: Option<PathBuf>,
    json: bool,
    verbose: bool,
) -> CliResult<()> {
    if !file.exists() {
        return Err(format!("File not found: {}", file.display()).into());
    }

    let (table, source) = TableParser::new().parse_file(&file)?;
    let dataset = Dataset::from_table(source.stem(), &table);
    let analyzer = CoverageAnalyzer::new(year.unwrap_or_else(|| chrono::Local::now().year()));

    let Some(stats) = analyzer.analyze_dataset(&dataset) else {
        return Err(format!(
            "No start date or coverage range column found in {}",
            file.display()
        )
        .into());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "{} {} ({} rows)",
            "Coverage of".cyan().bold(),
            file.display().to_string().white(),
            stats.records
        );
        match (stats.reference, stats.reference_percent()) {
            (Some(reference), Some(percent)) => println!(
                "  {:24} {} ({:.1}%)",
                "Reference resources".yellow(),
                reference,
                percent
            ),
            _ => println!(
                "  {:24} {}",
                "Reference resources".yellow(),
                "no start date column".dimmed()
            ),
        }
        println!("  {:24} {}", "With dated coverage".green(), stats.analyzed);
        if let (Some(mean), Some(min), Some(max)) = (stats.mean_years, stats.min_years, stats.max_years) {
            println!(
                "  {:24} {:.1} years (min {}, max {})",
                "Mean duration", mean, min, max
            );
        }
    }

    if verbose {
        for row in &stats.reference_rows {
            if let Some(record) = dataset.records().get(*row) {
                let values: Vec<&str> = record.raw_fields().values().map(String::as_str).collect();
                println!("  row {:>6}  {}", row, values.join(" | ").dimmed());
            }
        }
    }

    if let Some(output) = output {
        let delimiter = if source.format == "tsv" { b'\t' } else { b',' };
        export::write_table(&output, &analyzer.annotate(&dataset), delimiter)?;
        println!("{} {}", "Wrote".green().bold(), output.display());
    }

    Ok(())
}
