//! Compilation and application of learned extraction patterns.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use super::{conforms_to, ExtractionResult, FieldExtractor};
use crate::error::CompileError;
use crate::models::config::MatchingConfig;
use crate::models::Pattern;

/// Distinct candidates beyond this count do not change the outcome.
const MAX_DISTINCT_CANDIDATES: usize = 16;

/// Compiles patterns and applies them under a time budget.
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    config: MatchingConfig,
}

impl PatternMatcher {
    /// Create a matcher with the given settings.
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    /// Validate and compile a pattern.
    ///
    /// Fails on empty, malformed or oversized expressions, so a broken
    /// pattern is rejected before it is ever activated.
    pub fn compile(&self, pattern: &Pattern) -> Result<CompiledPattern, CompileError> {
        if pattern.expression.trim().is_empty() {
            return Err(CompileError::EmptyExpression {
                pattern_id: pattern.id,
            });
        }

        let regex = RegexBuilder::new(&pattern.expression)
            .size_limit(self.config.regex_size_limit)
            .dfa_size_limit(self.config.regex_size_limit)
            .build()
            .map_err(|e| CompileError::InvalidExpression {
                expression: pattern.expression.clone(),
                reason: e.to_string(),
            })?;

        let value_group = if regex.capture_names().any(|n| n == Some("value")) {
            ValueGroup::Named
        } else if regex.captures_len() > 1 {
            ValueGroup::First
        } else {
            ValueGroup::Whole
        };

        Ok(CompiledPattern {
            pattern: pattern.clone(),
            regex,
            value_group,
            config: self.config.clone(),
        })
    }

    /// Apply a compiled pattern to text.
    pub fn extract(&self, compiled: &CompiledPattern, text: &str) -> ExtractionResult {
        compiled.extract(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueGroup {
    Named,
    First,
    Whole,
}

/// A validated pattern ready for matching.
///
/// Holds a snapshot of the pattern taken at compile time; extraction never
/// touches the stored pattern.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pattern: Pattern,
    regex: Regex,
    value_group: ValueGroup,
    config: MatchingConfig,
}

impl CompiledPattern {
    /// The pattern this was compiled from.
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn id(&self) -> u64 {
        self.pattern.id
    }

    pub fn supplier(&self) -> &str {
        &self.pattern.supplier
    }

    fn value_of<'t>(&self, caps: &regex::Captures<'t>) -> Option<regex::Match<'t>> {
        match self.value_group {
            ValueGroup::Named => caps.name("value"),
            ValueGroup::First => caps.get(1),
            ValueGroup::Whole => caps.get(0),
        }
    }
}

impl FieldExtractor for CompiledPattern {
    fn field_name(&self) -> &str {
        &self.pattern.field_name
    }

    fn extract(&self, text: &str) -> ExtractionResult {
        let start = Instant::now();
        let budget = (self.config.timeout_ms > 0).then(|| Duration::from_millis(self.config.timeout_ms));

        let mut result = ExtractionResult::miss(self.pattern.id, &self.pattern.field_name);
        let mut first: Option<(String, (usize, usize))> = None;
        let mut distinct = BTreeSet::new();
        let mut candidates = 0usize;

        for caps in self.regex.captures_iter(text) {
            if budget.is_some_and(|b| start.elapsed() > b) {
                result.timed_out = true;
                break;
            }

            let Some(m) = self.value_of(&caps) else {
                continue;
            };
            let value = m.as_str().trim();
            if value.is_empty() {
                continue;
            }

            candidates += 1;
            distinct.insert(value.to_string());
            if first.is_none() {
                first = Some((value.to_string(), (m.start(), m.end())));
            }
            if distinct.len() >= MAX_DISTINCT_CANDIDATES {
                break;
            }
        }

        // The final search may itself have run past the budget
        if budget.is_some_and(|b| start.elapsed() > b) {
            result.timed_out = true;
        }

        result.candidates = candidates;
        result.elapsed_us = start.elapsed().as_micros() as u64;

        if result.timed_out {
            warn!(
                "Pattern {} for `{}` exceeded its {}ms matching budget; treating as a miss",
                self.pattern.id, self.pattern.field_name, self.config.timeout_ms
            );
            return result;
        }

        let Some((value, span)) = first else {
            debug!("Pattern {} found no match", self.pattern.id);
            return result;
        };

        let mut confidence = self.pattern.stats.success_rate;
        if distinct.len() > 1 {
            confidence *= self.config.multi_match_penalty;
        }
        if !conforms_to(self.pattern.semantic_type, &value) {
            confidence *= self.config.type_mismatch_penalty;
        }

        debug!(
            "Pattern {} extracted `{}` = {:?} ({} candidates, confidence {:.2})",
            self.pattern.id, self.pattern.field_name, value, candidates, confidence
        );

        result.success = true;
        result.value = Some(value);
        result.span = Some(span);
        result.confidence = confidence.clamp(0.0, 1.0);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SemanticType;
    use pretty_assertions::assert_eq;

    fn account_pattern() -> Pattern {
        let mut pattern = Pattern::new(
            "acme",
            "account_number",
            r"Account\s*(?:Number|#)?:?\s*(\d{10})",
        )
        .with_type(SemanticType::Identifier)
        .with_success_rate(0.9);
        pattern.id = 7;
        pattern
    }

    #[test]
    fn test_extract_account_number() {
        let matcher = PatternMatcher::default();
        let compiled = matcher.compile(&account_pattern()).unwrap();

        let result = matcher.extract(&compiled, "Account Number: 1234567890");

        assert!(result.success);
        assert_eq!(result.value.as_deref(), Some("1234567890"));
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.pattern_id, 7);
        assert_eq!(result.span, Some((16, 26)));
    }

    #[test]
    fn test_miss_is_not_an_error() {
        let matcher = PatternMatcher::default();
        let compiled = matcher.compile(&account_pattern()).unwrap();

        let result = matcher.extract(&compiled, "Invoice total: 99.00");

        assert!(!result.success);
        assert_eq!(result.value, None);
        assert_eq!(result.confidence, 0.0);
        assert!(!result.timed_out);
    }

    #[test]
    fn test_compile_rejects_malformed_expression() {
        let matcher = PatternMatcher::default();
        let pattern = Pattern::new("acme", "total", r"Total:\s*(\d+");

        let err = matcher.compile(&pattern).unwrap_err();
        assert!(matches!(err, CompileError::InvalidExpression { .. }));

        let empty = Pattern::new("acme", "total", "  ");
        assert!(matches!(
            matcher.compile(&empty),
            Err(CompileError::EmptyExpression { .. })
        ));
    }

    #[test]
    fn test_multiple_distinct_candidates_lower_confidence() {
        let matcher = PatternMatcher::default();
        let compiled = matcher.compile(&account_pattern()).unwrap();

        let text = "Account: 1111111111\nAccount: 2222222222";
        let result = matcher.extract(&compiled, text);

        assert!(result.success);
        assert_eq!(result.value.as_deref(), Some("1111111111"));
        assert_eq!(result.candidates, 2);
        assert!((result.confidence - 0.9 * 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_repeated_identical_candidate_is_not_penalised() {
        let matcher = PatternMatcher::default();
        let compiled = matcher.compile(&account_pattern()).unwrap();

        let text = "Account: 1111111111 ... Account # 1111111111";
        let result = matcher.extract(&compiled, text);

        assert_eq!(result.candidates, 2);
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn test_type_mismatch_lowers_confidence() {
        let matcher = PatternMatcher::default();
        let pattern = Pattern::new("acme", "due_date", r"Due:\s*(?P<value>\S+)")
            .with_type(SemanticType::Date)
            .with_success_rate(0.8);
        let compiled = matcher.compile(&pattern).unwrap();

        let good = matcher.extract(&compiled, "Due: 2024-02-01");
        let bad = matcher.extract(&compiled, "Due: immediately");

        assert_eq!(good.confidence, 0.8);
        assert!((bad.confidence - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_extract_is_deterministic_and_non_mutating() {
        let matcher = PatternMatcher::default();
        let pattern = account_pattern();
        let compiled = matcher.compile(&pattern).unwrap();

        let text = "Account Number: 1234567890";
        let first = matcher.extract(&compiled, text);
        for _ in 0..5 {
            let again = matcher.extract(&compiled, text);
            assert_eq!(again.value, first.value);
            assert_eq!(again.confidence, first.confidence);
        }
        assert_eq!(compiled.pattern().stats, pattern.stats);
    }

    #[test]
    fn test_exceeding_budget_is_a_timed_out_miss() {
        let matcher = PatternMatcher::new(MatchingConfig {
            timeout_ms: 1,
            ..MatchingConfig::default()
        });
        let pattern = Pattern::new("acme", "total", r"Total:\s*(\d+)").with_success_rate(0.9);
        let compiled = matcher.compile(&pattern).unwrap();

        let text = "Total: 5\n".repeat(200_000);
        let result = matcher.extract(&compiled, &text);

        assert!(result.timed_out);
        assert!(!result.success);
        assert_eq!(result.value, None);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_zero_budget_is_unlimited() {
        let matcher = PatternMatcher::new(MatchingConfig {
            timeout_ms: 0,
            ..MatchingConfig::default()
        });
        let compiled = matcher.compile(&account_pattern()).unwrap();

        let text = "Account: 1111111111\n".repeat(1_000);
        let result = matcher.extract(&compiled, &text);

        assert!(!result.timed_out);
        assert_eq!(result.value.as_deref(), Some("1111111111"));
        assert_eq!(result.candidates, 1_000);
    }

    #[test]
    fn test_whole_match_without_groups() {
        let matcher = PatternMatcher::default();
        let pattern = Pattern::new("acme", "reference", r"REF-\d{4}");
        let compiled = matcher.compile(&pattern).unwrap();

        let result = matcher.extract(&compiled, "see REF-0042 attached");
        assert_eq!(result.value.as_deref(), Some("REF-0042"));
    }
}
