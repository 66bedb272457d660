//! Learning extraction patterns from taught examples.
//!
//! A user points at a value inside a document's text; the learner anchors
//! a pattern on the label in front of the value and generalises the value
//! itself by character class, then proves the pattern finds the example.

use chrono::Utc;
use tracing::{debug, info};

use super::patterns::{COLUMN_BREAK, LABEL_WHITESPACE, VALUE_RUNS};
use super::{FieldExtractor, PatternMatcher};
use crate::error::LearnError;
use crate::models::{Pattern, SemanticType, UsageStats};

/// Label words kept in front of the value.
const MAX_LABEL_WORDS: usize = 4;

const AMOUNT_FRAGMENT: &str = r"[$€£¥]?\s?-?\d(?:[\d,.'\u{00a0} ]*\d)?";
const EMAIL_FRAGMENT: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";

/// Builds patterns from taught examples.
#[derive(Debug, Clone)]
pub struct PatternLearner {
    matcher: PatternMatcher,
    initial_success_rate: f64,
}

impl PatternLearner {
    pub fn new(matcher: PatternMatcher, initial_success_rate: f64) -> Self {
        Self {
            matcher,
            initial_success_rate,
        }
    }

    /// Learn a pattern for `field_name` from the first occurrence of
    /// `example` in `text`.
    pub fn learn(
        &self,
        supplier: &str,
        field_name: &str,
        text: &str,
        example: &str,
        semantic_type: SemanticType,
    ) -> Result<Pattern, LearnError> {
        let example = example.trim();
        if example.is_empty() {
            return Err(LearnError::ValueNotFound(example.to_string()));
        }
        let pos = text
            .find(example)
            .ok_or_else(|| LearnError::ValueNotFound(example.to_string()))?;

        let label = find_label(text, pos).ok_or_else(|| LearnError::NoLabel(example.to_string()))?;
        let expression = format!(
            r"{}\s*(?P<value>{})",
            label_expression(&label),
            value_expression(example, semantic_type)
        );
        debug!("Learned expression for `{}`: {}", field_name, expression);

        let mut pattern = Pattern::new(supplier, field_name, expression).with_type(semantic_type);
        pattern.stats = UsageStats::with_rate(self.initial_success_rate);
        pattern.created_at = Some(Utc::now());

        let compiled = self.matcher.compile(&pattern)?;
        let result = compiled.extract(text);
        if result.value.as_deref() != Some(example) {
            return Err(LearnError::NotReproducible {
                expression: pattern.expression,
                found: result.value,
            });
        }

        info!(
            "Learned pattern for {}/{} anchored on label {:?}",
            supplier, field_name, label
        );
        Ok(pattern)
    }
}

/// The label text in front of the value: the tail of the same line, or the
/// previous non-empty line when the value starts its line.
fn find_label(text: &str, pos: usize) -> Option<String> {
    let line_start = text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let same_line = trailing_label(&text[line_start..pos]);
    if !same_line.is_empty() {
        return Some(same_line);
    }

    let previous = text[..line_start]
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())?;
    let label = trailing_label(previous);
    (!label.is_empty()).then_some(label)
}

fn trailing_label(segment: &str) -> String {
    let segment = segment.trim_end();
    let tail = match COLUMN_BREAK.find_iter(segment).last() {
        Some(m) => &segment[m.end()..],
        None => segment,
    };

    let words: Vec<&str> = LABEL_WHITESPACE
        .split(tail.trim())
        .filter(|w| !w.is_empty())
        .collect();
    let skip = words.len().saturating_sub(MAX_LABEL_WORDS);
    words[skip..].join(" ")
}

fn label_expression(label: &str) -> String {
    LABEL_WHITESPACE
        .split(label)
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+")
}

fn value_expression(example: &str, semantic_type: SemanticType) -> String {
    match semantic_type {
        SemanticType::Currency | SemanticType::Number => AMOUNT_FRAGMENT.to_string(),
        SemanticType::Email => EMAIL_FRAGMENT.to_string(),
        SemanticType::Text | SemanticType::Date | SemanticType::Identifier => VALUE_RUNS
            .find_iter(example)
            .map(|m| generalize_run(m.as_str(), semantic_type))
            .collect(),
    }
}

fn generalize_run(run: &str, semantic_type: SemanticType) -> String {
    let Some(first) = run.chars().next() else {
        return String::new();
    };

    if first.is_ascii_digit() {
        let len = run.len();
        match semantic_type {
            SemanticType::Identifier => format!(r"\d{{{}}}", len),
            SemanticType::Date => format!(r"\d{{1,{}}}", len.max(2)),
            _ => r"\d+".to_string(),
        }
    } else if first.is_alphabetic() {
        r"\p{L}+".to_string()
    } else if first.is_whitespace() {
        r"\s+".to_string()
    } else {
        regex::escape(run)
    }
}
