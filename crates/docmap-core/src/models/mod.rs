//! Data models for patterns, rules, documents and mappings.

pub mod config;
pub mod document;
pub mod mapping;
pub mod pattern;
pub mod rule;
pub mod usage;

pub use config::{EngineConfig, EvaluationConfig, MatchingConfig, ScoringConfig, SelectionMode, TransformConfig};
pub use document::{DocumentContext, ExtractedField, FieldSet, FieldSource};
pub use mapping::FieldMapping;
pub use pattern::{Pattern, SemanticType};
pub use rule::{
    Action, ActionKind, Calculation, Condition, ConditionKind, LocationKind, LogicalOperator,
    Operator, Rule,
};
pub use usage::UsageStats;
