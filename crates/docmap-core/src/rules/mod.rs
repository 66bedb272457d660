//! Rule evaluation: conditions, condition trees, selection and actions.

pub mod actions;
pub mod compiled;
pub mod condition;
pub mod selector;
pub mod transform;
pub mod tree;

pub use actions::{
    ActionExecutor, ActionFailure, ActionOutcome, ActionReport, ActionStatus, CompiledAction, Severity,
};
pub use compiled::CompiledRule;
pub use condition::{CompiledCondition, ConditionEvaluator, EvaluationContext};
pub use selector::{RuleSelector, Selection};
pub use transform::{TransformOutcome, Transformer};
pub use tree::{ConditionNode, ConditionTree, TreeVerdict};

use serde::{Deserialize, Serialize};

/// Result of evaluating one condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionResult {
    pub condition_id: u64,
    pub passed: bool,
    /// False when the inspected value was unavailable.
    pub evaluated: bool,
    /// Confidence (0.0 - 1.0) carried by a pass; 0 on failure.
    pub confidence: f64,
    pub weight: f64,
    pub is_required: bool,
    pub explanation: String,
    /// Execution time in microseconds.
    pub elapsed_us: u64,
}

/// Result of evaluating one rule against one document.
///
/// Transient: produced for audit and diagnostics, never persisted as state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub rule_id: u64,
    pub rule_name: String,
    pub priority: i32,
    /// Success rate of the rule at evaluation time.
    pub success_rate: f64,
    pub conditions: Vec<ConditionResult>,
    /// Weight-normalised mean of the condition confidences.
    pub match_score: f64,
    /// Match score discounted for optional conditions that could not be evaluated.
    pub confidence: f64,
    /// Left-to-right combination of the top-level condition groups.
    pub logical_result: bool,
    /// Every required condition or group passed.
    pub required_passed: bool,
    pub should_apply: bool,
    pub required_total: usize,
    pub required_met: usize,
    pub optional_total: usize,
    pub optional_met: usize,
    pub optional_unevaluated: usize,
    /// Execution time in microseconds.
    pub elapsed_us: u64,
}

impl RuleEvaluation {
    /// One-line summary for "why did/didn't this fire" output.
    pub fn summary(&self) -> String {
        format!(
            "rule {} `{}`: {} (score {:.2}, confidence {:.2}, required {}/{}, optional {}/{})",
            self.rule_id,
            self.rule_name,
            if self.should_apply { "applies" } else { "does not apply" },
            self.match_score,
            self.confidence,
            self.required_met,
            self.required_total,
            self.optional_met,
            self.optional_total,
        )
    }
}
