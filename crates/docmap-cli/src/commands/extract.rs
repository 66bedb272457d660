//! Extract command - run the supplier's patterns over a text file.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use tracing::{info, warn};

use docmap_core::DocumentExtraction;

use super::{OutputFormat, load_config, open_engine};

/// Arguments for the extract command.
#[derive(Args)]
pub struct ExtractArgs {
    /// Input text file
    #[arg(required = true)]
    input: PathBuf,

    /// Supplier whose patterns to apply
    #[arg(short, long)]
    supplier: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Include misses in the output
    #[arg(long)]
    all: bool,
}

pub async fn run(args: ExtractArgs, config_path: Option<&str>, catalog: &Path) -> anyhow::Result<()> {
    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let config = load_config(config_path)?;
    let (_, engine) = open_engine(config, catalog)?;
    let text = fs::read_to_string(&args.input)?;

    info!("Extracting {} with patterns for {}", args.input.display(), args.supplier);
    let known = engine.snapshot().patterns().fields_for(&args.supplier);
    if known.is_empty() {
        warn!("No active patterns for supplier {}", args.supplier);
    }

    let mut extraction = engine.extract(&args.supplier, &text);
    if !args.all {
        extraction.results.retain(|r| r.success);
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&extraction)?),
        OutputFormat::Csv => print!("{}", format_extraction_csv(&extraction)?),
        OutputFormat::Text => print_extraction(&extraction, known.len()),
    }

    Ok(())
}

fn format_extraction_csv(extraction: &DocumentExtraction) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record(["field_name", "value", "confidence", "pattern_id", "success"])?;
    for result in &extraction.results {
        wtr.write_record([
            result.field_name.as_str(),
            result.value.as_deref().unwrap_or(""),
            &format!("{:.4}", result.confidence),
            &result.pattern_id.to_string(),
            &result.success.to_string(),
        ])?;
    }

    Ok(String::from_utf8(wtr.into_inner()?)?)
}

fn print_extraction(extraction: &DocumentExtraction, known_fields: usize) {
    for result in &extraction.results {
        match &result.value {
            Some(value) if result.success => println!(
                "{} {}: {} ({:.1}%, pattern {})",
                style("✓").green(),
                result.field_name,
                value,
                result.confidence * 100.0,
                result.pattern_id
            ),
            _ => println!(
                "{} {}: no match (pattern {}{})",
                style("✗").red(),
                result.field_name,
                result.pattern_id,
                if result.timed_out { ", timed out" } else { "" }
            ),
        }
    }

    println!();
    println!(
        "{} Extracted {} of {} fields",
        style("ℹ").blue(),
        extraction.fields.len(),
        known_fields
    );
}
