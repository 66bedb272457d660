//! Config command - inspect and edit engine settings.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use console::style;
use serde_json::Value;

use docmap_core::EngineConfig;

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// List every setting with its value and meaning
    Show {
        /// Print the raw JSON document instead
        #[arg(long)]
        json: bool,
    },

    /// Write a configuration file with the default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print one setting, e.g. "evaluation.min_match_score"
    Get { key: String },

    /// Change one setting; the result is validated before it is saved
    Set { key: String, value: String },

    /// Restore one setting to its default
    Reset { key: String },

    /// Print the configuration file location
    Path,
}

/// A documented setting, addressed by `section.name`.
struct Setting {
    key: &'static str,
    about: &'static str,
}

const SETTINGS: &[Setting] = &[
    Setting { key: "matching.timeout_ms", about: "time budget per pattern extraction, ms (0 = none)" },
    Setting { key: "matching.multi_match_penalty", about: "confidence factor when distinct candidates disagree" },
    Setting { key: "matching.type_mismatch_penalty", about: "confidence factor when a value misses its semantic type" },
    Setting { key: "matching.regex_size_limit", about: "largest compiled pattern, bytes" },
    Setting { key: "evaluation.min_match_score", about: "score a rule needs before it may apply" },
    Setting { key: "evaluation.selection_mode", about: "best_only or all_applicable" },
    Setting { key: "evaluation.document_timeout_ms", about: "abandon a document after this long, ms (0 = none)" },
    Setting { key: "scoring.smoothing_factor", about: "weight of each recorded outcome" },
    Setting { key: "scoring.initial_success_rate", about: "starting rate of taught patterns and rules" },
    Setting { key: "transforms.default_currency", about: "currency used when a transform names none" },
    Setting { key: "transforms.exchange_rates", about: "rates keyed FROM->TO, as a JSON object" },
];

pub async fn run(args: ConfigArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let path = config_path.map(PathBuf::from).unwrap_or_else(default_config_path);
    match args.command {
        ConfigCommand::Show { json } => show(&path, json),
        ConfigCommand::Init { force } => init(&path, force),
        ConfigCommand::Get { key } => get(&path, &key),
        ConfigCommand::Set { key, value } => set(&path, &key, &value),
        ConfigCommand::Reset { key } => reset(&path, &key),
        ConfigCommand::Path => show_path(&path),
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docmap")
        .join("config.json")
}

fn load(path: &Path) -> anyhow::Result<EngineConfig> {
    if path.exists() {
        Ok(EngineConfig::from_file(path)?)
    } else {
        Ok(EngineConfig::default())
    }
}

fn setting(key: &str) -> anyhow::Result<&'static Setting> {
    SETTINGS
        .iter()
        .find(|s| s.key == key)
        .ok_or_else(|| anyhow::anyhow!("Unknown setting `{}`; run `docmap config show` to list them", key))
}

fn lookup<'v>(document: &'v Value, key: &str) -> Option<&'v Value> {
    let (section, name) = key.split_once('.')?;
    document.get(section)?.get(name)
}

/// Interpret `raw` with the type of the value it replaces, so `0.75`
/// stays a number and `EUR` needs no quotes.
fn coerce(raw: &str, current: &Value) -> anyhow::Result<Value> {
    let value = match current {
        Value::String(_) => Value::String(raw.trim_matches('"').to_string()),
        Value::Number(_) => {
            let parsed: Value = serde_json::from_str(raw)
                .map_err(|_| anyhow::anyhow!("`{}` is not a number", raw))?;
            if !parsed.is_number() {
                anyhow::bail!("`{}` is not a number", raw);
            }
            parsed
        }
        Value::Object(_) => {
            let parsed: Value = serde_json::from_str(raw)
                .map_err(|e| anyhow::anyhow!("`{}` is not a JSON object: {}", raw, e))?;
            if !parsed.is_object() {
                anyhow::bail!("`{}` is not a JSON object", raw);
            }
            parsed
        }
        _ => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    };
    Ok(value)
}

/// Replace one setting, validate the result and write it to `path`.
fn store(path: &Path, key: &str, value: Value) -> anyhow::Result<()> {
    let mut document = serde_json::to_value(load(path)?)?;
    let (section, name) = key
        .split_once('.')
        .ok_or_else(|| anyhow::anyhow!("Setting keys look like `section.name`"))?;
    let slot = document
        .get_mut(section)
        .and_then(|s| s.get_mut(name))
        .ok_or_else(|| anyhow::anyhow!("Unknown setting `{}`", key))?;
    *slot = value;

    let config: EngineConfig = serde_json::from_value(document)
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e))?;
    config.validate()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    config.save(path)?;
    Ok(())
}

fn show(path: &Path, json: bool) -> anyhow::Result<()> {
    let config = load(path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if !path.exists() {
        println!("{} {} does not exist, showing defaults", style("ℹ").blue(), path.display());
    }
    let document = serde_json::to_value(&config)?;
    let mut section = "";
    for setting in SETTINGS {
        let Some((current, name)) = setting.key.split_once('.') else {
            continue;
        };
        if current != section {
            section = current;
            println!();
            println!("{}", style(format!("[{}]", section)).bold());
        }
        let value = lookup(&document, setting.key).map(Value::to_string).unwrap_or_default();
        println!("  {:<24} {:<12} {}", name, value, style(setting.about).dim());
    }

    Ok(())
}

fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists; pass --force to overwrite it", path.display());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    EngineConfig::default().save(path)?;

    println!("{} Wrote default settings to {}", style("✓").green(), path.display());
    Ok(())
}

fn get(path: &Path, key: &str) -> anyhow::Result<()> {
    setting(key)?;
    let document = serde_json::to_value(load(path)?)?;
    let value = lookup(&document, key).ok_or_else(|| anyhow::anyhow!("Unknown setting `{}`", key))?;
    match value {
        Value::String(s) => println!("{}", s),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}

fn set(path: &Path, key: &str, raw: &str) -> anyhow::Result<()> {
    setting(key)?;
    let document = serde_json::to_value(load(path)?)?;
    let current = lookup(&document, key).ok_or_else(|| anyhow::anyhow!("Unknown setting `{}`", key))?;
    let value = coerce(raw, current)?;
    let shown = value.to_string();
    store(path, key, value)?;

    println!("{} {} = {}", style("✓").green(), key, shown);
    Ok(())
}

fn reset(path: &Path, key: &str) -> anyhow::Result<()> {
    setting(key)?;
    let defaults = serde_json::to_value(EngineConfig::default())?;
    let value = lookup(&defaults, key)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Unknown setting `{}`", key))?;
    let shown = value.to_string();
    store(path, key, value)?;

    println!("{} {} reset to {}", style("✓").green(), key, shown);
    Ok(())
}

fn show_path(path: &Path) -> anyhow::Result<()> {
    let status = if path.exists() {
        style("exists").green()
    } else {
        style("not created, run `docmap config init`").yellow()
    };
    println!("{} ({})", path.display(), status);
    Ok(())
}
