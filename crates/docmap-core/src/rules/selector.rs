//! Ranking applicable rules.

use std::cmp::Ordering;
use std::time::Instant;

use tracing::debug;

use super::compiled::CompiledRule;
use super::condition::EvaluationContext;
use super::RuleEvaluation;
use crate::models::{EvaluationConfig, SelectionMode};

/// Ranked outcome of evaluating a rule set against one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub mode: SelectionMode,
    /// Rules that should apply, best first.
    pub ranked: Vec<RuleEvaluation>,
    /// Rules that should not apply, by rule id.
    pub rejected: Vec<RuleEvaluation>,
}

impl Selection {
    /// The rules to execute: the head only, or every applicable rule in
    /// ranked order.
    pub fn chosen(&self) -> &[RuleEvaluation] {
        match self.mode {
            SelectionMode::BestOnly => &self.ranked[..self.ranked.len().min(1)],
            SelectionMode::AllApplicable => &self.ranked,
        }
    }

    pub fn best(&self) -> Option<&RuleEvaluation> {
        self.ranked.first()
    }

    /// Replace the success rates used for ranking and re-sort.
    pub fn rerank(&mut self, rate: impl Fn(u64) -> Option<f64>) {
        for evaluation in self.ranked.iter_mut().chain(self.rejected.iter_mut()) {
            if let Some(current) = rate(evaluation.rule_id) {
                evaluation.success_rate = current;
            }
        }
        self.ranked.sort_by(rank);
    }
}

/// Evaluates active rules and orders the applicable ones.
#[derive(Debug, Clone)]
pub struct RuleSelector {
    min_match_score: f64,
    mode: SelectionMode,
}

impl Default for RuleSelector {
    fn default() -> Self {
        Self::new(&EvaluationConfig::default())
    }
}

impl RuleSelector {
    pub fn new(config: &EvaluationConfig) -> Self {
        Self {
            min_match_score: config.min_match_score,
            mode: config.selection_mode,
        }
    }

    pub fn with_mode(mut self, mode: SelectionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn min_match_score(&self) -> f64 {
        self.min_match_score
    }

    /// Applicable rules, ranked.
    pub fn select(&self, rules: &[CompiledRule], context: &EvaluationContext<'_>) -> Vec<RuleEvaluation> {
        self.evaluate_all(rules, context).ranked
    }

    /// Evaluate every active rule, keeping the non-applicable evaluations.
    pub fn evaluate_all(&self, rules: &[CompiledRule], context: &EvaluationContext<'_>) -> Selection {
        let mut ranked = Vec::new();
        let mut rejected = Vec::new();
        for rule in rules.iter().filter(|r| r.rule().is_active) {
            let evaluation = rule.evaluate(context, self.min_match_score);
            if evaluation.should_apply {
                ranked.push(evaluation);
            } else {
                rejected.push(evaluation);
            }
        }
        self.finish(ranked, rejected)
    }

    /// Like [`evaluate_all`](Self::evaluate_all), but gives up once
    /// `deadline` has passed between two rules.
    pub fn evaluate_until(
        &self,
        rules: &[CompiledRule],
        context: &EvaluationContext<'_>,
        deadline: Instant,
    ) -> Option<Selection> {
        let mut ranked = Vec::new();
        let mut rejected = Vec::new();
        for rule in rules.iter().filter(|r| r.rule().is_active) {
            if Instant::now() >= deadline {
                debug!("Deadline passed before rule {}", rule.id());
                return None;
            }
            let evaluation = rule.evaluate(context, self.min_match_score);
            if evaluation.should_apply {
                ranked.push(evaluation);
            } else {
                rejected.push(evaluation);
            }
        }
        Some(self.finish(ranked, rejected))
    }

    fn finish(&self, mut ranked: Vec<RuleEvaluation>, mut rejected: Vec<RuleEvaluation>) -> Selection {
        ranked.sort_by(rank);
        rejected.sort_by_key(|e| e.rule_id);
        Selection {
            mode: self.mode,
            ranked,
            rejected,
        }
    }
}

/// Priority desc, success rate desc, match score desc, rule id asc.
pub fn rank(a: &RuleEvaluation, b: &RuleEvaluation) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.success_rate.total_cmp(&a.success_rate))
        .then_with(|| b.match_score.total_cmp(&a.match_score))
        .then_with(|| a.rule_id.cmp(&b.rule_id))
}
