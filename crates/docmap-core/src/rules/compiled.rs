//! Rules compiled for evaluation.

use std::time::Instant;

use super::actions::CompiledAction;
use super::condition::{CompiledCondition, EvaluationContext};
use super::tree::ConditionTree;
use super::RuleEvaluation;
use crate::error::CompileError;
use crate::models::Rule;
use crate::registry::Registry;

/// A rule whose conditions, condition tree and actions have been
/// validated. Only compiled rules are ever evaluated.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: Rule,
    conditions: Vec<CompiledCondition>,
    tree: ConditionTree,
    actions: Vec<CompiledAction>,
}

impl CompiledRule {
    /// Compile a rule, resolving custom handlers through `registry`.
    pub fn compile(rule: &Rule, registry: &Registry) -> Result<Self, CompileError> {
        let conditions = rule
            .conditions
            .iter()
            .map(|c| CompiledCondition::compile(c, registry))
            .collect::<Result<Vec<_>, _>>()?;
        let tree = ConditionTree::build(rule.id, &rule.conditions)?;
        let actions = rule
            .actions
            .iter()
            .map(|a| CompiledAction::compile(a, registry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rule: rule.clone(),
            conditions,
            tree,
            actions,
        })
    }

    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    pub fn id(&self) -> u64 {
        self.rule.id
    }

    pub fn tree(&self) -> &ConditionTree {
        &self.tree
    }

    pub fn actions(&self) -> &[CompiledAction] {
        &self.actions
    }

    /// Evaluate every condition and aggregate the results.
    ///
    /// All conditions are evaluated even after a required one fails, so
    /// the result explains the whole rule. A rule applies only when its
    /// tree is true, every required condition passed and the score
    /// reaches `min_match_score`.
    pub fn evaluate(&self, context: &EvaluationContext<'_>, min_match_score: f64) -> RuleEvaluation {
        let start = Instant::now();
        let results: Vec<_> = self.conditions.iter().map(|c| c.evaluate(context)).collect();
        let passed: Vec<bool> = results.iter().map(|r| r.passed).collect();
        let verdict = self.tree.evaluate(&passed);

        let match_score = if results.is_empty() {
            1.0
        } else {
            let total_weight: f64 = results.iter().map(|r| r.weight.max(0.0)).sum();
            if total_weight > 0.0 {
                results
                    .iter()
                    .map(|r| r.weight.max(0.0) * r.confidence)
                    .sum::<f64>()
                    / total_weight
            } else {
                results.iter().map(|r| r.confidence).sum::<f64>() / results.len() as f64
            }
        };

        let required_total = results.iter().filter(|r| r.is_required).count();
        let required_met = results.iter().filter(|r| r.is_required && r.passed).count();
        let optional_total = results.len() - required_total;
        let optional_met = results.iter().filter(|r| !r.is_required && r.passed).count();
        let optional_unevaluated = results.iter().filter(|r| !r.is_required && !r.evaluated).count();

        let confidence = if optional_total > 0 {
            match_score * (1.0 - optional_unevaluated as f64 / optional_total as f64)
        } else {
            match_score
        };

        RuleEvaluation {
            rule_id: self.rule.id,
            rule_name: self.rule.name.clone(),
            priority: self.rule.priority,
            success_rate: self.rule.stats.success_rate,
            conditions: results,
            match_score,
            confidence,
            logical_result: verdict.logical_result,
            required_passed: verdict.required_passed,
            should_apply: verdict.logical_result && verdict.required_passed && match_score >= min_match_score,
            required_total,
            required_met,
            optional_total,
            optional_met,
            optional_unevaluated,
            elapsed_us: start.elapsed().as_micros() as u64,
        }
    }
}
