//! Batch processing command for multiple documents.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Args;
use console::style;
use glob::glob;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use docmap_core::{DocumentOutcome, MappingEngine};

use super::{OutputFormat, format_outcome, load_config, open_engine, read_document};

/// Arguments for the batch command.
#[derive(Args)]
pub struct BatchArgs {
    /// Input files or glob pattern
    #[arg(required = true)]
    input: String,

    /// Supplier of text documents that carry no context
    #[arg(short, long)]
    supplier: Option<String>,

    /// Output directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Output format for each file
    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Also generate a summary CSV
    #[arg(long)]
    summary: bool,

    /// Number of parallel workers
    #[arg(short = 'j', long, default_value = "4")]
    jobs: usize,

    /// Continue on error
    #[arg(long)]
    continue_on_error: bool,
}

/// Result of processing a single file.
struct ProcessResult {
    path: PathBuf,
    outcome: Option<DocumentOutcome>,
    error: Option<String>,
    processing_time_ms: u64,
}

pub async fn run(args: BatchArgs, config_path: Option<&str>, catalog: &Path) -> anyhow::Result<()> {
    let start = Instant::now();

    let config = load_config(config_path)?;
    let (_, engine) = open_engine(config, catalog)?;
    let engine = Arc::new(engine);

    // Expand glob pattern
    let mut files: Vec<PathBuf> = glob(&args.input)?
        .filter_map(|r| r.ok())
        .filter(|p| {
            let ext = p.extension().and_then(|e| e.to_str()).unwrap_or("");
            matches!(ext.to_lowercase().as_str(), "json" | "txt")
        })
        .collect();
    files.sort();

    if files.is_empty() {
        anyhow::bail!("No matching files found for pattern: {}", args.input);
    }

    println!(
        "{} Found {} files to process",
        style("ℹ").blue(),
        files.len()
    );

    if let Some(ref output_dir) = args.output_dir {
        fs::create_dir_all(output_dir)?;
    }

    let progress = ProgressBar::new(files.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files")?
            .progress_chars("=>-"),
    );

    let permits = Arc::new(Semaphore::new(args.jobs.max(1)));
    let mut tasks: JoinSet<Finished> = JoinSet::new();
    let mut results: Vec<(usize, ProcessResult)> = Vec::with_capacity(files.len());
    for (index, path) in files.iter().cloned().enumerate() {
        let permit = Arc::clone(&permits).acquire_owned().await?;
        while let Some(joined) = tasks.try_join_next() {
            collect(joined?, args.continue_on_error, &progress, &mut results)?;
        }

        let engine = Arc::clone(&engine);
        let supplier = args.supplier.clone();
        tasks.spawn_blocking(move || {
            let file_start = Instant::now();
            let result = process_single_file(&engine, &path, supplier.as_deref());
            drop(permit);
            (index, path, result, file_start.elapsed().as_millis() as u64)
        });
    }
    while let Some(joined) = tasks.join_next().await {
        collect(joined?, args.continue_on_error, &progress, &mut results)?;
    }

    progress.finish_with_message("Complete");
    results.sort_by_key(|(index, _)| *index);
    let results: Vec<ProcessResult> = results.into_iter().map(|(_, r)| r).collect();

    // Write outputs
    let successful: Vec<_> = results.iter().filter(|r| r.outcome.is_some()).collect();
    let failed: Vec<_> = results.iter().filter(|r| r.error.is_some()).collect();

    if let Some(output_dir) = &args.output_dir {
        for result in &successful {
            if let Some(outcome) = &result.outcome {
                let output_name = result
                    .path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("document");
                let output_path = output_dir.join(format!("{}.{}", output_name, args.format.extension()));
                fs::write(&output_path, format_outcome(outcome, args.format)?)?;
                debug!("Wrote output to {}", output_path.display());
            }
        }
    }

    if args.summary {
        let summary_path = args
            .output_dir
            .as_ref()
            .map(|d| d.join("summary.csv"))
            .unwrap_or_else(|| PathBuf::from("summary.csv"));

        write_summary(&summary_path, &results)?;
        println!(
            "{} Summary written to {}",
            style("✓").green(),
            summary_path.display()
        );
    }

    let review = successful
        .iter()
        .filter(|r| r.outcome.as_ref().is_some_and(|o| o.needs_review))
        .count();

    println!();
    println!(
        "{} Processed {} files in {:?}",
        style("✓").green(),
        results.len(),
        start.elapsed()
    );
    println!(
        "   {} successful, {} need review, {} failed",
        style(successful.len()).green(),
        style(review).yellow(),
        style(failed.len()).red()
    );

    if !failed.is_empty() {
        println!();
        println!("{}", style("Failed files:").red());
        for result in &failed {
            println!(
                "  - {}: {}",
                result.path.display(),
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(())
}

type Finished = (usize, PathBuf, anyhow::Result<DocumentOutcome>, u64);

fn collect(
    finished: Finished,
    continue_on_error: bool,
    progress: &ProgressBar,
    results: &mut Vec<(usize, ProcessResult)>,
) -> anyhow::Result<()> {
    let (index, path, result, processing_time_ms) = finished;
    progress.inc(1);
    let (outcome, error) = match result {
        Ok(outcome) => (Some(outcome), None),
        Err(e) => {
            let error_msg = e.to_string();
            if !continue_on_error {
                error!("Failed to process {}: {}", path.display(), error_msg);
                progress.abandon();
                anyhow::bail!("Processing failed: {}", error_msg);
            }
            warn!("Failed to process {}: {}", path.display(), error_msg);
            (None, Some(error_msg))
        }
    };
    results.push((
        index,
        ProcessResult {
            path,
            outcome,
            error,
            processing_time_ms,
        },
    ));
    Ok(())
}

fn process_single_file(engine: &MappingEngine, path: &Path, supplier: Option<&str>) -> anyhow::Result<DocumentOutcome> {
    let document = read_document(path, supplier)?;
    if document.text.is_none() && document.fields.is_empty() {
        anyhow::bail!("Document has neither text nor fields");
    }
    Ok(engine.process(&document)?)
}

fn write_summary(path: &Path, results: &[ProcessResult]) -> anyhow::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "filename",
        "status",
        "document_id",
        "applied_rules",
        "mappings",
        "needs_review",
        "warnings",
        "processing_time_ms",
        "error",
    ])?;

    for result in results {
        let filename = result.path.file_name().and_then(|s| s.to_str()).unwrap_or("");

        if let Some(outcome) = &result.outcome {
            let rules: Vec<String> = outcome.applied_rules.iter().map(|id| id.to_string()).collect();
            wtr.write_record([
                filename,
                "success",
                &outcome.document_id,
                &rules.join(";"),
                &outcome.mappings.len().to_string(),
                &outcome.needs_review.to_string(),
                &outcome.warnings.len().to_string(),
                &result.processing_time_ms.to_string(),
                "",
            ])?;
        } else {
            wtr.write_record([
                filename,
                "error",
                "",
                "",
                "",
                "",
                "",
                &result.processing_time_ms.to_string(),
                result.error.as_deref().unwrap_or(""),
            ])?;
        }
    }

    wtr.flush()?;
    Ok(())
}
