//! CLI application for learned document-to-template mapping.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{batch, config, evaluate, extract, record, stats, teach};

/// docmap - Map document fields onto templates with learned patterns and rules
#[derive(Parser)]
#[command(name = "docmap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Pattern and rule catalog
    #[arg(long, global = true, default_value = "catalog.json")]
    catalog: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract fields from a text file with the supplier's patterns
    Extract(extract::ExtractArgs),

    /// Evaluate the rules against one document and show the mappings
    Evaluate(evaluate::EvaluateArgs),

    /// Process multiple documents
    Batch(batch::BatchArgs),

    /// Learn a pattern from an example value
    Teach(teach::TeachArgs),

    /// Record confirmed or rejected outcomes
    Record(record::RecordArgs),

    /// Show rule and pattern statistics
    Stats(stats::StatsArgs),

    /// Manage configuration
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = cli.config.as_deref();
    let catalog = cli.catalog.as_path();
    match cli.command {
        Commands::Extract(args) => extract::run(args, config, catalog).await,
        Commands::Evaluate(args) => evaluate::run(args, config, catalog).await,
        Commands::Batch(args) => batch::run(args, config, catalog).await,
        Commands::Teach(args) => teach::run(args, config, catalog).await,
        Commands::Record(args) => record::run(args, config, catalog).await,
        Commands::Stats(args) => stats::run(args, config, catalog).await,
        Commands::Config(args) => config::run(args, config).await,
    }
}
