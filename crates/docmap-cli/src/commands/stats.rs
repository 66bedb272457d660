//! Stats command - aggregate rule and pattern statistics.

use std::path::Path;

use clap::Args;
use console::style;

use docmap_core::EngineStatistics;

use super::{OutputFormat, load_config, open_engine};

/// Arguments for the stats command.
#[derive(Args)]
pub struct StatsArgs {
    /// Number of top rules to list
    #[arg(short = 'n', long, default_value = "5")]
    top: usize,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,
}

pub async fn run(args: StatsArgs, config_path: Option<&str>, catalog: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let (_, engine) = open_engine(config, catalog)?;
    let statistics = engine.statistics(args.top);

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statistics)?),
        OutputFormat::Csv => print!("{}", format_top_rules_csv(&statistics)?),
        OutputFormat::Text => {
            print_statistics(&statistics);
            let snapshot = engine.snapshot();
            for (id, error) in snapshot.rejected_rules() {
                println!("{} rule {} not loaded: {}", style("!").yellow(), id, error);
            }
            for (id, error) in snapshot.patterns().rejected() {
                println!("{} pattern {} not loaded: {}", style("!").yellow(), id, error);
            }
        }
    }

    Ok(())
}

fn format_top_rules_csv(statistics: &EngineStatistics) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record(["id", "name", "success_rate", "usage_count"])?;
    for rule in &statistics.top_rules {
        wtr.write_record([
            &rule.id.to_string(),
            rule.name.as_str(),
            &format!("{:.4}", rule.success_rate),
            &rule.usage_count.to_string(),
        ])?;
    }

    Ok(String::from_utf8(wtr.into_inner()?)?)
}

fn print_statistics(statistics: &EngineStatistics) {
    println!("Active rules:     {}", statistics.active_rule_count);
    println!("Active patterns:  {}", statistics.active_pattern_count);
    println!("Applications:     {}", statistics.total_applications);
    println!(
        "Success rate:     {:.1}%",
        statistics.overall_success_rate * 100.0
    );

    if !statistics.top_rules.is_empty() {
        println!();
        println!("{}", style("Top rules:").bold());
        for (rank, rule) in statistics.top_rules.iter().enumerate() {
            println!(
                "  {}. [{}] {} - {:.1}% over {} uses",
                rank + 1,
                rule.id,
                rule.name,
                rule.success_rate * 100.0,
                rule.usage_count
            );
        }
    }
}
