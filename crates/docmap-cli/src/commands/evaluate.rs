//! Evaluate command - select rules for one document and execute them.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use tracing::info;

use docmap_core::rules::RuleEvaluation;
use docmap_core::{DocumentOutcome, MappingEngine, SelectionMode};

use super::{OutputFormat, format_outcome, load_config, open_engine, read_document};

/// Arguments for the evaluate command.
#[derive(Args)]
pub struct EvaluateArgs {
    /// Input document (JSON document or raw text)
    #[arg(required = true)]
    input: PathBuf,

    /// Supplier of the document, overriding the document's context
    #[arg(short, long)]
    supplier: Option<String>,

    /// Rule selection mode, overriding the configuration
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Explain why each rule did or did not apply
    #[arg(long)]
    explain: bool,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum Mode {
    /// Apply only the highest ranked rule
    Best,
    /// Apply every applicable rule
    All,
}

impl From<Mode> for SelectionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Best => SelectionMode::BestOnly,
            Mode::All => SelectionMode::AllApplicable,
        }
    }
}

pub async fn run(args: EvaluateArgs, config_path: Option<&str>, catalog: &Path) -> anyhow::Result<()> {
    if !args.input.exists() {
        anyhow::bail!("Input file not found: {}", args.input.display());
    }

    let mut config = load_config(config_path)?;
    if let Some(mode) = args.mode {
        config.evaluation.selection_mode = mode.into();
    }
    let (_, engine) = open_engine(config, catalog)?;

    let document = read_document(&args.input, args.supplier.as_deref())?;
    info!("Evaluating document {}", document.id);
    let outcome = engine.process(&document)?;

    let output = format_outcome(&outcome, args.format)?;
    if let Some(output_path) = &args.output {
        fs::write(output_path, &output)?;
        println!(
            "{} Output written to {}",
            style("✓").green(),
            output_path.display()
        );
    } else {
        print!("{}", output);
        if !output.ends_with('\n') {
            println!();
        }
    }

    if args.explain {
        explain(&engine, &outcome);
    }

    Ok(())
}

fn explain(engine: &MappingEngine, outcome: &DocumentOutcome) {
    let snapshot = engine.snapshot();

    println!();
    println!("{}", style("Rule evaluation:").bold());
    for evaluation in outcome.selected.iter().chain(&outcome.rejected) {
        explain_rule(evaluation, snapshot.rule(evaluation.rule_id).map(|r| r.tree().to_string()));
    }

    for (rule_id, error) in snapshot.rejected_rules() {
        println!("{} rule {} not loaded: {}", style("!").yellow(), rule_id, error);
    }
}

fn explain_rule(evaluation: &RuleEvaluation, tree: Option<String>) {
    let marker = if evaluation.should_apply {
        style("✓").green()
    } else {
        style("✗").red()
    };
    println!("{} {}", marker, evaluation.summary());
    if let Some(tree) = tree {
        println!("    when {}", tree);
    }
    for condition in &evaluation.conditions {
        println!(
            "    #{}{} {} {}",
            condition.condition_id,
            if condition.is_required { "!" } else { "" },
            if condition.passed { "pass" } else { "fail" },
            condition.explanation
        );
    }
}
