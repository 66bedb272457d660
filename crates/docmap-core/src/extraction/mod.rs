//! Learned field extraction from raw document text.

pub mod learner;
pub mod library;
pub mod matcher;
pub mod patterns;
pub mod values;

pub use learner::PatternLearner;
pub use library::{DocumentExtraction, PatternLibrary};
pub use matcher::{CompiledPattern, PatternMatcher};

use serde::{Deserialize, Serialize};

use crate::models::SemanticType;
use patterns::{AMOUNT_PATTERN, EMAIL, IDENTIFIER};

/// Trait for field extractors.
pub trait FieldExtractor {
    /// Name of the field this extractor produces.
    fn field_name(&self) -> &str;

    /// Extract the field from text. A miss is a normal result.
    fn extract(&self, text: &str) -> ExtractionResult;
}

/// Outcome of applying one pattern to one text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub pattern_id: u64,
    pub field_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Confidence score (0.0 - 1.0); 0 on a miss.
    pub confidence: f64,
    /// Number of candidate matches seen.
    pub candidates: usize,
    /// Byte span of the chosen value in the source text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<(usize, usize)>,
    /// The matching budget ran out; reported as a miss.
    #[serde(default)]
    pub timed_out: bool,
    /// Processing time in microseconds.
    pub elapsed_us: u64,
}

impl ExtractionResult {
    /// A miss for the given pattern.
    pub fn miss(pattern_id: u64, field_name: impl Into<String>) -> Self {
        Self {
            pattern_id,
            field_name: field_name.into(),
            success: false,
            value: None,
            confidence: 0.0,
            candidates: 0,
            span: None,
            timed_out: false,
            elapsed_us: 0,
        }
    }
}

/// Whether a value looks like the given semantic type.
pub fn conforms_to(semantic_type: SemanticType, value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return false;
    }
    match semantic_type {
        SemanticType::Text => true,
        SemanticType::Number => values::parse_number(value).is_some(),
        SemanticType::Currency => AMOUNT_PATTERN.is_match(value),
        SemanticType::Date => values::parse_date(value).is_some(),
        SemanticType::Email => EMAIL.is_match(value),
        SemanticType::Identifier => {
            IDENTIFIER.is_match(value) && value.chars().any(|c| c.is_ascii_digit())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conforms_to() {
        assert!(conforms_to(SemanticType::Currency, "$1,234.56"));
        assert!(conforms_to(SemanticType::Currency, "1 234,56 zł"));
        assert!(!conforms_to(SemanticType::Currency, "twelve"));
        assert!(conforms_to(SemanticType::Date, "2024-03-01"));
        assert!(!conforms_to(SemanticType::Date, "2024-13-01"));
        assert!(conforms_to(SemanticType::Identifier, "INV-2024/001"));
        assert!(!conforms_to(SemanticType::Identifier, "pending"));
        assert!(conforms_to(SemanticType::Email, "ap@acme.com"));
        assert!(!conforms_to(SemanticType::Text, "   "));
    }
}
