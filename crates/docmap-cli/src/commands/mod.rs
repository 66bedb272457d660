//! CLI subcommands and the helpers they share.

pub mod batch;
pub mod config;
pub mod evaluate;
pub mod extract;
pub mod record;
pub mod stats;
pub mod teach;

use std::fs;
use std::path::Path;

use tracing::debug;

use docmap_core::{
    Document, DocumentOutcome, EngineConfig, JsonFileRepository, MappingEngine, Registry,
};

/// Output format for results.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// CSV output
    Csv,
    /// Plain text summary
    Text,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Text => "txt",
        }
    }
}

/// Load the engine configuration: the explicit path, else the user
/// config file when present, else defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<EngineConfig> {
    if let Some(path) = config_path {
        return Ok(EngineConfig::from_file(Path::new(path))?);
    }
    let default_path = config::default_config_path();
    if default_path.exists() {
        debug!("Using config {}", default_path.display());
        Ok(EngineConfig::from_file(&default_path)?)
    } else {
        Ok(EngineConfig::default())
    }
}

/// Open the catalog and load it into a new engine.
pub fn open_engine(config: EngineConfig, catalog: &Path) -> anyhow::Result<(JsonFileRepository, MappingEngine)> {
    let repository = JsonFileRepository::open(catalog)?;
    let engine = MappingEngine::from_repository(&repository, config, Registry::new())?;
    Ok((repository, engine))
}

/// Read a document: a JSON [`Document`], or any other file as raw text.
pub fn read_document(path: &Path, supplier: Option<&str>) -> anyhow::Result<Document> {
    let content = fs::read_to_string(path)?;
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("document");

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let mut document = if is_json {
        serde_json::from_str::<Document>(&content)
            .map_err(|e| anyhow::anyhow!("Invalid document {}: {}", path.display(), e))?
    } else {
        Document {
            text: Some(content),
            ..Document::default()
        }
    };

    if document.id.is_empty() {
        document.id = stem.to_string();
    }
    if let Some(supplier) = supplier {
        document.context.supplier = Some(supplier.to_string());
    }
    Ok(document)
}

pub fn format_outcome(outcome: &DocumentOutcome, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(outcome)?),
        OutputFormat::Csv => format_outcome_csv(outcome),
        OutputFormat::Text => Ok(format_outcome_text(outcome)),
    }
}

fn format_outcome_csv(outcome: &DocumentOutcome) -> anyhow::Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "field_name",
        "value",
        "target_location",
        "location_kind",
        "rule_id",
        "action_id",
    ])?;

    for mapping in &outcome.mappings {
        wtr.write_record([
            mapping.field_name.as_str(),
            mapping.value.as_str(),
            mapping.target_location.as_str(),
            &enum_name(&mapping.location_kind),
            &mapping.rule_id.to_string(),
            &mapping.action_id.to_string(),
        ])?;
    }

    Ok(String::from_utf8(wtr.into_inner()?)?)
}

fn format_outcome_text(outcome: &DocumentOutcome) -> String {
    let mut output = String::new();

    output.push_str(&format!("Document: {}\n", outcome.document_id));
    if outcome.applied_rules.is_empty() {
        output.push_str("Applied rules: none\n");
    } else {
        let ids: Vec<String> = outcome.applied_rules.iter().map(|id| id.to_string()).collect();
        output.push_str(&format!("Applied rules: {}\n", ids.join(", ")));
    }

    if !outcome.mappings.is_empty() {
        output.push_str("\nMappings:\n");
        for mapping in &outcome.mappings {
            output.push_str(&format!(
                "  {} <- {} ({}, rule {})\n",
                mapping.target_location, mapping.value, mapping.field_name, mapping.rule_id
            ));
        }
    }

    if !outcome.warnings.is_empty() {
        output.push_str("\nWarnings:\n");
        for warning in &outcome.warnings {
            output.push_str(&format!("  - {}\n", warning));
        }
    }

    if outcome.abandoned {
        output.push_str("\nTimed out before completion.\n");
    }
    if outcome.needs_review {
        output.push_str("\nNeeds review.\n");
    }

    output
}

/// The serialized name of a unit enum variant.
pub fn enum_name<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(name)) => name,
        _ => String::new(),
    }
}
