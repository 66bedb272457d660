//! Record command - feed confirmed or rejected outcomes back into scoring.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use console::style;

use docmap_core::{Confirmation, DocumentOutcome, EntityKey};

use super::{load_config, open_engine};

/// Arguments for the record command.
#[derive(Args)]
#[command(group(clap::ArgGroup::new("verdict").required(true).args(["success", "failure"])))]
#[command(group(clap::ArgGroup::new("subject").required(true).multiple(true).args(["outcome", "rule", "pattern"])))]
pub struct RecordArgs {
    /// Outcome JSON written by `evaluate --format json`; confirms every
    /// applied rule and every pattern whose value was used
    #[arg(long)]
    outcome: Option<PathBuf>,

    /// Rule id to record
    #[arg(long)]
    rule: Vec<u64>,

    /// Pattern id to record
    #[arg(long)]
    pattern: Vec<u64>,

    /// The result was correct
    #[arg(long)]
    success: bool,

    /// The result was wrong
    #[arg(long)]
    failure: bool,
}

pub async fn run(args: RecordArgs, config_path: Option<&str>, catalog: &Path) -> anyhow::Result<()> {
    let success = args.success && !args.failure;

    let mut confirmations = Vec::new();
    if let Some(path) = &args.outcome {
        let content = fs::read_to_string(path)?;
        let outcome: DocumentOutcome = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid outcome {}: {}", path.display(), e))?;
        confirmations.extend(outcome.confirmations(success));
    }
    confirmations.extend(args.rule.iter().map(|id| Confirmation {
        key: EntityKey::Rule(*id),
        success,
    }));
    confirmations.extend(args.pattern.iter().map(|id| Confirmation {
        key: EntityKey::Pattern(*id),
        success,
    }));

    if confirmations.is_empty() {
        println!("{} Nothing to record", style("ℹ").blue());
        return Ok(());
    }

    let config = load_config(config_path)?;
    let (repository, engine) = open_engine(config, catalog)?;
    let updated = engine.commit(&repository, &confirmations)?;

    for (key, stats) in &updated {
        println!(
            "{} {}: success rate {:.1}% after {} uses",
            style("✓").green(),
            key,
            stats.success_rate * 100.0,
            stats.usage_count
        );
    }

    Ok(())
}
