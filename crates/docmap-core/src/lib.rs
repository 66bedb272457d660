//! Core library for learned document-to-template mapping.
//!
//! This crate provides:
//! - Learned, confidence-scored extraction patterns per supplier and field
//! - Weighted, nested condition trees deciding which mapping rule applies
//! - Ranked rule selection and ordered action execution into field mappings
//! - Adaptive success-rate scoring from user confirmations
//! - Repository abstraction with in-memory and JSON catalog stores

pub mod engine;
pub mod error;
pub mod extraction;
pub mod models;
pub mod registry;
pub mod repository;
pub mod rules;
pub mod scoring;

pub use engine::{Confirmation, Document, DocumentOutcome, EngineStatistics, MappingEngine, RuleSummary, Snapshot};
pub use error::{ActionError, CompileError, DocmapError, LearnError, RepositoryError, Result};
pub use extraction::{DocumentExtraction, ExtractionResult, FieldExtractor, PatternLearner, PatternLibrary, PatternMatcher};
pub use models::{
    Action, ActionKind, Condition, ConditionKind, DocumentContext, EngineConfig, ExtractedField, FieldMapping,
    FieldSet, LogicalOperator, Operator, Pattern, Rule, SelectionMode, SemanticType, UsageStats,
};
pub use registry::{CustomVerdict, Registry};
pub use repository::{Catalog, InMemoryRepository, JsonFileRepository, RuleRepository};
pub use rules::{ActionExecutor, ActionReport, ConditionEvaluator, RuleEvaluation, RuleSelector};
pub use scoring::{AdaptiveScorer, EntityKey, ScoreLedger};
