//! Configuration structures for the mapping engine.

use std::collections::BTreeMap;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DocmapError, Result};

/// Main configuration for the docmap engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pattern matching configuration.
    pub matching: MatchingConfig,

    /// Rule evaluation configuration.
    pub evaluation: EvaluationConfig,

    /// Adaptive scoring configuration.
    pub scoring: ScoringConfig,

    /// Value transformation configuration.
    pub transforms: TransformConfig,
}

/// Pattern matcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Time budget for one extraction attempt, in milliseconds.
    pub timeout_ms: u64,

    /// Confidence multiplier when several distinct candidates match.
    pub multi_match_penalty: f64,

    /// Confidence multiplier when the value does not fit the semantic type.
    pub type_mismatch_penalty: f64,

    /// Upper bound on the compiled size of a pattern, in bytes.
    pub regex_size_limit: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 250,
            multi_match_penalty: 0.8,
            type_mismatch_penalty: 0.5,
            regex_size_limit: 1 << 20,
        }
    }
}

/// Rule selection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    /// Apply only the highest ranked rule.
    #[default]
    BestOnly,
    /// Apply every applicable rule in ranked order.
    AllApplicable,
}

/// Rule evaluation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Minimum match score for a rule to apply (0.0 - 1.0).
    pub min_match_score: f64,

    /// How many applicable rules are executed per document.
    pub selection_mode: SelectionMode,

    /// Abandon a document after this many milliseconds (0 = no limit).
    pub document_timeout_ms: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            min_match_score: 0.5,
            selection_mode: SelectionMode::BestOnly,
            document_timeout_ms: 0,
        }
    }
}

/// Adaptive scoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Exponential smoothing factor applied per recorded outcome.
    pub smoothing_factor: f64,

    /// Success rate assigned to newly taught patterns and rules.
    pub initial_success_rate: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            smoothing_factor: 0.1,
            initial_success_rate: 0.5,
        }
    }
}

/// Value transformation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Currency assumed when a `currency` transformation names none.
    pub default_currency: String,

    /// Exchange rates keyed `FROM->TO`, e.g. `"EUR->USD"`.
    pub exchange_rates: BTreeMap<String, Decimal>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            default_currency: "USD".to_string(),
            exchange_rates: BTreeMap::new(),
        }
    }
}

impl TransformConfig {
    /// Look up the rate converting `from` into `to`.
    ///
    /// Falls back to the inverse of the reverse rate when only that is known.
    pub fn rate(&self, from: &str, to: &str) -> Option<Decimal> {
        let from = from.trim().to_uppercase();
        let to = to.trim().to_uppercase();
        if from == to {
            return Some(Decimal::ONE);
        }
        if let Some(rate) = self.exchange_rates.get(&format!("{}->{}", from, to)) {
            return Some(*rate);
        }
        self.exchange_rates
            .get(&format!("{}->{}", to, from))
            .filter(|r| !r.is_zero())
            .map(|r| Decimal::ONE / *r)
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        let alpha = self.scoring.smoothing_factor;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(DocmapError::Config(format!(
                "scoring.smoothing_factor must be in (0, 1], got {}",
                alpha
            )));
        }

        let unit_checks = [
            ("scoring.initial_success_rate", self.scoring.initial_success_rate),
            ("evaluation.min_match_score", self.evaluation.min_match_score),
            ("matching.multi_match_penalty", self.matching.multi_match_penalty),
            ("matching.type_mismatch_penalty", self.matching.type_mismatch_penalty),
        ];
        for (key, value) in unit_checks {
            if !(0.0..=1.0).contains(&value) {
                return Err(DocmapError::Config(format!(
                    "{} must be in [0, 1], got {}",
                    key, value
                )));
            }
        }

        if self.matching.regex_size_limit == 0 {
            return Err(DocmapError::Config(
                "matching.regex_size_limit must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scoring.smoothing_factor, 0.1);
        assert_eq!(config.evaluation.min_match_score, 0.5);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"evaluation": {"min_match_score": 0.7}}"#).unwrap();
        assert_eq!(config.evaluation.min_match_score, 0.7);
        assert_eq!(config.evaluation.selection_mode, SelectionMode::BestOnly);
        assert_eq!(config.matching.timeout_ms, 250);
    }

    #[test]
    fn test_rejects_out_of_range_alpha() {
        let mut config = EngineConfig::default();
        config.scoring.smoothing_factor = 0.0;
        assert!(config.validate().is_err());
        config.scoring.smoothing_factor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exchange_rate_lookup() {
        let mut transforms = TransformConfig::default();
        transforms
            .exchange_rates
            .insert("EUR->USD".to_string(), Decimal::from_str("1.25").unwrap());

        assert_eq!(transforms.rate("eur", "usd"), Some(Decimal::from_str("1.25").unwrap()));
        assert_eq!(transforms.rate("USD", "EUR"), Some(Decimal::from_str("0.8").unwrap()));
        assert_eq!(transforms.rate("USD", "USD"), Some(Decimal::ONE));
        assert_eq!(transforms.rate("GBP", "USD"), None);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = EngineConfig::default();
        config.evaluation.selection_mode = SelectionMode::AllApplicable;
        config.save(&path).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.evaluation.selection_mode, SelectionMode::AllApplicable);
    }
}
