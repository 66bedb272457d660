//! Executing a rule's actions into field mappings.
//!
//! Actions run in display order, except that an action consuming a field
//! published by another action (`output_field`) always runs after its
//! producer. A dependency cycle rejects the whole batch.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::compiled::CompiledRule;
use super::condition::{CompiledCondition, EvaluationContext};
use super::transform::{TransformOutcome, Transformer};
use crate::error::{ActionError, CompileError};
use crate::extraction::values::parse_amount;
use crate::models::{Action, ActionKind, DocumentContext, ExtractedField, FieldMapping, FieldSet, FieldSource};
use crate::registry::{ActionHandler, Registry};

/// Whether a failed action blocks automatic processing of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Recorded; the rest of the batch stands.
    Soft,
    /// The action was required; the document needs review.
    Hard,
}

/// Why an action produced no value.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionFailure {
    #[error("field `{field}` is missing and no default is set")]
    MissingDependency { field: String },

    #[error("required field `{field}` is missing and no default is set")]
    RequiredUnsatisfied { field: String },

    #[error("transformation `{transformation}` failed: {reason}")]
    TransformFailed { transformation: String, reason: String },

    #[error("operand `{operand}` is not a number")]
    InvalidOperand { operand: String },

    #[error("calculation failed (overflow or division by zero)")]
    CalculationFailed,

    #[error("split produced {pieces} pieces, index {index} is out of range")]
    SplitOutOfRange { index: usize, pieces: usize },

    #[error("custom action `{handler}` failed: {reason}")]
    HandlerFailed { handler: String, reason: String },
}

/// What happened to one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionStatus {
    Mapped { value: String },
    /// A conditional action whose gate did not hold.
    Skipped { reason: String },
    Failed { severity: Severity, reason: ActionFailure },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_id: u64,
    pub target_location: String,
    pub status: ActionStatus,
}

/// Everything one rule's actions produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionReport {
    pub rule_id: u64,
    pub mappings: Vec<FieldMapping>,
    /// Outcomes in execution order.
    pub outcomes: Vec<ActionOutcome>,
    pub warnings: Vec<String>,
    /// Fields published through `output_field`.
    pub produced: FieldSet,
}

impl ActionReport {
    pub fn has_hard_failure(&self) -> bool {
        self.outcomes.iter().any(|o| {
            matches!(
                o.status,
                ActionStatus::Failed {
                    severity: Severity::Hard,
                    ..
                }
            )
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ActionStatus::Failed { .. }))
    }
}

/// An action with its gate condition and custom handler resolved.
#[derive(Clone)]
pub struct CompiledAction {
    action: Action,
    gate: Option<CompiledCondition>,
    handler: Option<Arc<dyn ActionHandler>>,
}

impl fmt::Debug for CompiledAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledAction")
            .field("action", &self.action)
            .field("gate", &self.gate)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl CompiledAction {
    pub fn compile(action: &Action, registry: &Registry) -> Result<Self, CompileError> {
        let gate = match &action.kind {
            ActionKind::Conditional { condition } => Some(CompiledCondition::compile(condition, registry)?),
            _ => None,
        };
        let handler = match &action.kind {
            ActionKind::Custom { handler } => Some(registry.action(handler).ok_or_else(|| {
                CompileError::UnregisteredHandler {
                    kind: "action",
                    key: handler.clone(),
                }
            })?),
            _ => None,
        };
        Ok(Self {
            action: action.clone(),
            gate,
            handler,
        })
    }

    pub fn action(&self) -> &Action {
        &self.action
    }
}

/// Result of running one action before its value is published.
enum Step {
    Value { value: String, confidence: f64 },
    Skip(String),
    Fail(ActionFailure),
}

/// Runs the actions of selected rules.
#[derive(Debug, Clone, Default)]
pub struct ActionExecutor {
    transformer: Transformer,
}

impl ActionExecutor {
    pub fn new(transformer: Transformer) -> Self {
        Self { transformer }
    }

    /// Execute a rule's actions against the extracted fields.
    ///
    /// Per-action failures are collected in the report; only a dependency
    /// cycle aborts the batch.
    pub fn execute(
        &self,
        rule: &CompiledRule,
        document: &DocumentContext,
        fields: &FieldSet,
    ) -> Result<ActionReport, ActionError> {
        let actions = rule.actions();
        let order = execution_order(rule.id(), actions)?;

        let mut working = fields.clone();
        let mut report = ActionReport {
            rule_id: rule.id(),
            ..Default::default()
        };

        for index in order {
            let compiled = &actions[index];
            let action = &compiled.action;

            let step = self.run(compiled, document, &working, &mut report.warnings);
            let status = match step {
                Step::Value { value, confidence } => {
                    if let Some(output) = &action.output_field {
                        let field = ExtractedField::new(output.clone(), value.clone(), confidence)
                            .with_source(FieldSource::Action { id: action.id });
                        working.insert(field.clone());
                        report.produced.insert(field);
                    }
                    if !action.target_location.is_empty() {
                        push_mapping(&mut report, rule.id(), action, &value);
                    }
                    ActionStatus::Mapped { value }
                }
                Step::Skip(reason) => ActionStatus::Skipped { reason },
                Step::Fail(reason) => {
                    let severity = if action.is_required { Severity::Hard } else { Severity::Soft };
                    debug!("Action {} of rule {} failed ({:?}): {}", action.id, rule.id(), severity, reason);
                    ActionStatus::Failed { severity, reason }
                }
            };

            report.outcomes.push(ActionOutcome {
                action_id: action.id,
                target_location: action.target_location.clone(),
                status,
            });
        }

        Ok(report)
    }

    fn run(
        &self,
        compiled: &CompiledAction,
        document: &DocumentContext,
        fields: &FieldSet,
        warnings: &mut Vec<String>,
    ) -> Step {
        let action = &compiled.action;

        let produced = match &action.kind {
            ActionKind::DirectMap | ActionKind::Transform => source_value(action, fields),
            ActionKind::Combine { sources, separator } => combine(action, sources, separator, fields, warnings),
            ActionKind::Split { delimiter, index } => split(action, delimiter, *index, fields),
            ActionKind::Calculate { operation, operands } => {
                calculate(action, operands, fields).and_then(|(values, confidence)| {
                    match operation.apply(&values) {
                        Some(result) => Ok((result.round_dp(2).to_string(), confidence)),
                        None => Err(ActionFailure::CalculationFailed),
                    }
                })
            }
            ActionKind::Conditional { .. } => {
                if let Some(gate) = &compiled.gate {
                    let result = gate.evaluate(&EvaluationContext::new(document, fields));
                    if !result.passed {
                        return Step::Skip(result.explanation);
                    }
                }
                source_value(action, fields)
            }
            ActionKind::Custom { handler: key } => match &compiled.handler {
                Some(handler) => handler
                    .produce(action, fields)
                    .map(|value| (value, input_confidence(action, fields)))
                    .map_err(|reason| ActionFailure::HandlerFailed {
                        handler: key.clone(),
                        reason,
                    }),
                None => Err(ActionFailure::HandlerFailed {
                    handler: key.clone(),
                    reason: "handler is not registered".to_string(),
                }),
            },
        };

        let (value, confidence) = match produced {
            Ok(produced) => produced,
            Err(failure) => return Step::Fail(failure),
        };

        let Some(spec) = &action.transformation else {
            return Step::Value { value, confidence };
        };
        match self.transformer.apply(spec, &value) {
            Ok(TransformOutcome::Applied(value)) => Step::Value { value, confidence },
            Ok(TransformOutcome::Unknown) => {
                let message = format!(
                    "action {}: unknown transformation `{}`, value passed through",
                    action.id, spec
                );
                warn!("{}", message);
                warnings.push(message);
                Step::Value { value, confidence }
            }
            Err(reason) => Step::Fail(ActionFailure::TransformFailed {
                transformation: spec.clone(),
                reason,
            }),
        }
    }
}

/// Stable topological order: among ready actions the lowest display
/// order (then list position) runs first.
fn execution_order(rule_id: u64, actions: &[CompiledAction]) -> Result<Vec<usize>, ActionError> {
    let mut producers: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, compiled) in actions.iter().enumerate() {
        if let Some(output) = compiled.action.output_field.as_deref() {
            producers.entry(output).or_default().push(i);
        }
    }

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); actions.len()];
    let mut pending = vec![0usize; actions.len()];
    for (consumer, compiled) in actions.iter().enumerate() {
        for input in compiled.action.inputs() {
            for &producer in producers.get(input).into_iter().flatten() {
                if producer != consumer {
                    dependents[producer].push(consumer);
                    pending[consumer] += 1;
                }
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<(i32, usize)>> = pending
        .iter()
        .enumerate()
        .filter(|(_, count)| **count == 0)
        .map(|(i, _)| Reverse((actions[i].action.display_order, i)))
        .collect();

    let mut order = Vec::with_capacity(actions.len());
    while let Some(Reverse((_, i))) = ready.pop() {
        order.push(i);
        for &next in &dependents[i] {
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.push(Reverse((actions[next].action.display_order, next)));
            }
        }
    }

    if order.len() < actions.len() {
        let mut action_ids: Vec<u64> = pending
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(i, _)| actions[i].action.id)
            .collect();
        action_ids.sort_unstable();
        return Err(ActionError::CycleDetected { rule_id, action_ids });
    }
    Ok(order)
}

fn push_mapping(report: &mut ActionReport, rule_id: u64, action: &Action, value: &str) {
    let target = &action.target_location;
    if let Some(previous) = report.mappings.iter().find(|m| &m.target_location == target) {
        report.warnings.push(format!(
            "action {} overwrites `{}` previously written by action {}",
            action.id, target, previous.action_id
        ));
        report.mappings.retain(|m| &m.target_location != target);
    }

    let field_name = action
        .output_field
        .clone()
        .or_else(|| (!action.source_field.is_empty()).then(|| action.source_field.clone()))
        .unwrap_or_else(|| action.inputs().join("+"));

    report.mappings.push(FieldMapping {
        field_name,
        value: value.to_string(),
        target_location: target.clone(),
        location_kind: action.location_kind,
        description: action.description.clone().unwrap_or_default(),
        rule_id,
        action_id: action.id,
    });
}

fn present<'a>(fields: &'a FieldSet, name: &str) -> Option<&'a ExtractedField> {
    fields.get(name).filter(|f| !f.is_blank())
}

/// Default value for an action whose input is unavailable, or the
/// matching failure.
fn fallback(action: &Action, field: &str) -> Result<(String, f64), ActionFailure> {
    match &action.default_value {
        Some(default) => Ok((default.clone(), 1.0)),
        None if action.is_required => Err(ActionFailure::RequiredUnsatisfied {
            field: field.to_string(),
        }),
        None => Err(ActionFailure::MissingDependency {
            field: field.to_string(),
        }),
    }
}

fn source_value(action: &Action, fields: &FieldSet) -> Result<(String, f64), ActionFailure> {
    match present(fields, &action.source_field) {
        Some(field) => Ok((field.value.trim().to_string(), field.confidence)),
        None => fallback(action, &action.source_field),
    }
}

fn combine(
    action: &Action,
    sources: &[String],
    separator: &str,
    fields: &FieldSet,
    warnings: &mut Vec<String>,
) -> Result<(String, f64), ActionFailure> {
    let mut parts = Vec::with_capacity(sources.len());
    let mut confidence = 1.0_f64;
    for source in sources {
        match present(fields, source) {
            Some(field) => {
                parts.push(field.value.trim());
                confidence = confidence.min(field.confidence);
            }
            None => warnings.push(format!("action {}: combine source `{}` is missing", action.id, source)),
        }
    }

    if parts.is_empty() {
        return fallback(action, &sources.join("+"));
    }
    Ok((parts.join(separator), confidence))
}

fn split(action: &Action, delimiter: &str, index: usize, fields: &FieldSet) -> Result<(String, f64), ActionFailure> {
    let Some(field) = present(fields, &action.source_field) else {
        return fallback(action, &action.source_field);
    };

    let pieces: Vec<&str> = if delimiter.is_empty() {
        field.value.split_whitespace().collect()
    } else {
        field.value.split(delimiter).collect()
    };
    match pieces.get(index) {
        Some(piece) => Ok((piece.trim().to_string(), field.confidence)),
        None => match &action.default_value {
            Some(default) => Ok((default.clone(), 1.0)),
            None => Err(ActionFailure::SplitOutOfRange {
                index,
                pieces: pieces.len(),
            }),
        },
    }
}

fn calculate(action: &Action, operands: &[String], fields: &FieldSet) -> Result<(Vec<Decimal>, f64), ActionFailure> {
    let mut values = Vec::with_capacity(operands.len());
    let mut confidence = 1.0_f64;
    for operand in operands {
        if let Ok(literal) = operand.trim().parse::<Decimal>() {
            values.push(literal);
            continue;
        }
        let field = match present(fields, operand) {
            Some(field) => field,
            None => {
                let (default, _) = fallback(action, operand)?;
                let value = parse_amount(&default).ok_or_else(|| ActionFailure::InvalidOperand {
                    operand: operand.clone(),
                })?;
                values.push(value);
                continue;
            }
        };
        let value = parse_amount(&field.value).ok_or_else(|| ActionFailure::InvalidOperand {
            operand: operand.clone(),
        })?;
        values.push(value);
        confidence = confidence.min(field.confidence);
    }
    Ok((values, confidence))
}

/// Lowest confidence among the present inputs of an action.
fn input_confidence(action: &Action, fields: &FieldSet) -> f64 {
    action
        .inputs()
        .into_iter()
        .filter_map(|name| fields.get(name))
        .map(|f| f.confidence)
        .fold(1.0, f64::min)
}
