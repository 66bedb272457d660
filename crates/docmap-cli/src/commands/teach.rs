//! Teach command - learn an extraction pattern from an example value.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use tracing::info;

use docmap_core::{RuleRepository, SemanticType};

use super::{load_config, open_engine};

/// Arguments for the teach command.
#[derive(Args)]
pub struct TeachArgs {
    /// Text file containing the example value
    #[arg(required = true)]
    input: PathBuf,

    /// Supplier the pattern belongs to
    #[arg(short, long)]
    supplier: String,

    /// Name of the field to extract
    #[arg(long)]
    field: String,

    /// The value as it appears in the text
    #[arg(short, long)]
    example: String,

    /// Semantic type of the value (text, number, currency, date, email, identifier)
    #[arg(short = 't', long = "type", default_value = "text")]
    semantic_type: String,

    /// Selection rank among the supplier's patterns for the field
    #[arg(long, default_value = "0")]
    priority: i32,

    /// Store the learned pattern in the catalog
    #[arg(long)]
    save: bool,
}

pub async fn run(args: TeachArgs, config_path: Option<&str>, catalog: &Path) -> anyhow::Result<()> {
    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }
    let semantic_type = SemanticType::from_name(&args.semantic_type)
        .ok_or_else(|| anyhow::anyhow!("Unknown semantic type: {}", args.semantic_type))?;

    let config = load_config(config_path)?;
    let (repository, engine) = open_engine(config, catalog)?;
    let text = fs::read_to_string(&args.input)?;

    let mut pattern = engine.teach(&args.supplier, &args.field, &text, &args.example, semantic_type)?;
    pattern.priority = args.priority;

    info!("Learned `{}` for {}/{}", pattern.expression, args.supplier, args.field);

    println!("{}", serde_json::to_string_pretty(&pattern)?);

    if args.save {
        let id = repository.save_pattern(pattern)?;
        println!(
            "{} Saved pattern {} to {}",
            style("✓").green(),
            id,
            catalog.display()
        );
    } else {
        println!(
            "{} Pattern not saved. Re-run with --save to store it.",
            style("ℹ").blue()
        );
    }

    Ok(())
}
