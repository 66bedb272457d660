//! Learned extraction patterns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::usage::UsageStats;

/// Semantic type of the value a pattern extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    /// Free text.
    #[default]
    Text,
    /// Plain number, integer or decimal.
    Number,
    /// Monetary amount, optionally with a currency marker.
    Currency,
    /// Calendar date.
    Date,
    /// E-mail address.
    Email,
    /// Account numbers, invoice numbers and similar codes.
    Identifier,
}

impl SemanticType {
    /// Parse from a user-supplied name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "text" | "string" => Some(Self::Text),
            "number" | "numeric" => Some(Self::Number),
            "currency" | "amount" | "money" => Some(Self::Currency),
            "date" => Some(Self::Date),
            "email" | "e-mail" => Some(Self::Email),
            "identifier" | "id" | "code" => Some(Self::Identifier),
            _ => None,
        }
    }
}

/// A regex recipe for extracting one field of one supplier's documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Pattern id (0 until stored).
    #[serde(default)]
    pub id: u64,

    /// Supplier whose documents this pattern was taught on.
    pub supplier: String,

    /// Name of the extracted field.
    pub field_name: String,

    /// Regular expression; the `value` group or group 1 holds the value.
    pub expression: String,

    /// Target semantic type.
    #[serde(default)]
    pub semantic_type: SemanticType,

    /// Tie-break rank, higher first.
    #[serde(default)]
    pub priority: i32,

    /// Inactive patterns are kept for history but never applied.
    #[serde(default = "default_active")]
    pub is_active: bool,

    /// Reliability tallies.
    #[serde(default)]
    pub stats: UsageStats,

    /// When the pattern was taught.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl Pattern {
    /// Create an active pattern with a neutral prior.
    pub fn new(
        supplier: impl Into<String>,
        field_name: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            supplier: supplier.into(),
            field_name: field_name.into(),
            expression: expression.into(),
            semantic_type: SemanticType::Text,
            priority: 0,
            is_active: true,
            stats: UsageStats::default(),
            created_at: Some(Utc::now()),
        }
    }

    /// Set the semantic type.
    pub fn with_type(mut self, semantic_type: SemanticType) -> Self {
        self.semantic_type = semantic_type;
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the current success rate.
    pub fn with_success_rate(mut self, rate: f64) -> Self {
        self.stats.success_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Whether the pattern belongs to the supplier (case-insensitive).
    pub fn is_for_supplier(&self, supplier: &str) -> bool {
        self.supplier.eq_ignore_ascii_case(supplier.trim())
    }
}
