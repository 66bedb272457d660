//! Evaluation of single conditions against a document and its fields.

use std::sync::Arc;
use std::time::Instant;

use regex::{Regex, RegexBuilder};

use super::ConditionResult;
use crate::error::CompileError;
use crate::extraction::values::parse_number;
use crate::models::{Condition, ConditionKind, DocumentContext, FieldSet, Operator};
use crate::registry::{ConditionHandler, Registry};

/// What a condition can see: the document classification and the fields
/// extracted (or produced) so far.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub document: &'a DocumentContext,
    pub fields: &'a FieldSet,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(document: &'a DocumentContext, fields: &'a FieldSet) -> Self {
        Self { document, fields }
    }

    /// The inspected value and the confidence attached to it.
    fn subject(&self, condition: &Condition) -> Option<(&'a str, f64)> {
        let document = self.document;
        let attribute = |value: &'a Option<String>| value.as_deref().map(|v| (v, 1.0));
        match &condition.kind {
            ConditionKind::Field => self
                .fields
                .get(&condition.field_name)
                .map(|f| (f.value.as_str(), f.confidence)),
            ConditionKind::Supplier => attribute(&document.supplier),
            ConditionKind::DocumentType => attribute(&document.document_type),
            ConditionKind::TemplatePattern => attribute(&document.template_pattern),
            ConditionKind::TemplateCategory => attribute(&document.template_category),
            ConditionKind::Custom { .. } => None,
        }
    }
}

/// A condition with its regex operand and custom handler resolved.
#[derive(Clone)]
pub struct CompiledCondition {
    condition: Condition,
    pattern: Option<Regex>,
    handler: Option<Arc<dyn ConditionHandler>>,
}

impl std::fmt::Debug for CompiledCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledCondition")
            .field("condition", &self.condition)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl CompiledCondition {
    /// Resolve a condition. Invalid `matches` operands and unregistered
    /// custom handlers are rejected.
    pub fn compile(condition: &Condition, registry: &Registry) -> Result<Self, CompileError> {
        let pattern = if condition.operator == Operator::Matches {
            let regex = RegexBuilder::new(&condition.operand)
                .case_insensitive(!condition.case_sensitive)
                .build()
                .map_err(|e| CompileError::InvalidOperand {
                    condition_id: condition.id,
                    reason: e.to_string(),
                })?;
            Some(regex)
        } else {
            None
        };

        let handler = match &condition.kind {
            ConditionKind::Custom { handler } => Some(registry.condition(handler).ok_or_else(|| {
                CompileError::UnregisteredHandler {
                    kind: "condition",
                    key: handler.clone(),
                }
            })?),
            _ => None,
        };

        Ok(Self {
            condition: condition.clone(),
            pattern,
            handler,
        })
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    /// Evaluate against a context. Never fails: misses and unavailable
    /// values are reported in the result.
    pub fn evaluate(&self, context: &EvaluationContext<'_>) -> ConditionResult {
        let start = Instant::now();
        let condition = &self.condition;

        let (passed, evaluated, confidence, explanation) = match &condition.kind {
            ConditionKind::Custom { handler: key } => match &self.handler {
                Some(handler) => {
                    let verdict = handler.evaluate(condition, context);
                    let confidence = if verdict.passed {
                        verdict.confidence.clamp(0.0, 1.0)
                    } else {
                        0.0
                    };
                    (verdict.passed, true, confidence, verdict.explanation)
                }
                None => (
                    false,
                    false,
                    0.0,
                    format!("custom condition `{}` is not registered", key),
                ),
            },
            _ => self.evaluate_builtin(context),
        };

        ConditionResult {
            condition_id: condition.id,
            passed,
            evaluated,
            confidence,
            weight: condition.weight,
            is_required: condition.is_required,
            explanation,
            elapsed_us: start.elapsed().as_micros() as u64,
        }
    }

    fn evaluate_builtin(&self, context: &EvaluationContext<'_>) -> (bool, bool, f64, String) {
        let condition = &self.condition;
        let subject = condition.subject();

        let (value, evidence) = match context.subject(condition) {
            Some(found) => found,
            None if condition.operator.treats_missing_as_empty() => ("", 1.0),
            None => {
                return (false, false, 0.0, format!("{} is not available", subject));
            }
        };

        match self.test(value) {
            Ok(passed) => {
                let explanation = format!(
                    "{} {:?} {} {:?}: {}",
                    subject,
                    value,
                    condition.operator.symbol(),
                    condition.operand,
                    if passed { "passed" } else { "failed" }
                );
                let confidence = if passed { evidence.clamp(0.0, 1.0) } else { 0.0 };
                (passed, true, confidence, explanation)
            }
            Err(reason) => (false, true, 0.0, format!("{}: {}", subject, reason)),
        }
    }

    /// Apply the operator. `Err` marks a soft miss such as a non-numeric
    /// value in a numeric comparison.
    fn test(&self, value: &str) -> Result<bool, String> {
        let condition = &self.condition;
        let fold = |s: &str| {
            let s = s.trim();
            if condition.case_sensitive { s.to_string() } else { s.to_lowercase() }
        };

        let result = match condition.operator {
            Operator::Equals => fold(value) == fold(&condition.operand),
            Operator::NotEquals => fold(value) != fold(&condition.operand),
            Operator::Contains => fold(value).contains(&fold(&condition.operand)),
            Operator::StartsWith => fold(value).starts_with(&fold(&condition.operand)),
            Operator::EndsWith => fold(value).ends_with(&fold(&condition.operand)),
            Operator::GreaterThan
            | Operator::GreaterThanOrEqual
            | Operator::LessThan
            | Operator::LessThanOrEqual => {
                let left = parse_number(value)
                    .ok_or_else(|| format!("value {:?} is not numeric", value))?;
                let right = parse_number(&condition.operand)
                    .ok_or_else(|| format!("operand {:?} is not numeric", condition.operand))?;
                match condition.operator {
                    Operator::GreaterThan => left > right,
                    Operator::GreaterThanOrEqual => left >= right,
                    Operator::LessThan => left < right,
                    _ => left <= right,
                }
            }
            Operator::Matches => match &self.pattern {
                Some(regex) => regex.is_match(value),
                None => return Err("match operand was not compiled".to_string()),
            },
            Operator::IsEmpty => value.trim().is_empty(),
            Operator::IsNotEmpty => !value.trim().is_empty(),
        };
        Ok(result)
    }
}

/// Evaluates conditions one at a time, resolving custom handlers through
/// the registry.
#[derive(Debug, Clone, Default)]
pub struct ConditionEvaluator {
    registry: Registry,
}

impl ConditionEvaluator {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Evaluate one condition. A condition that cannot be compiled (bad
    /// operand, unregistered handler) fails rather than passing.
    pub fn evaluate(&self, condition: &Condition, context: &EvaluationContext<'_>) -> ConditionResult {
        match CompiledCondition::compile(condition, &self.registry) {
            Ok(compiled) => compiled.evaluate(context),
            Err(e) => ConditionResult {
                condition_id: condition.id,
                passed: false,
                evaluated: false,
                confidence: 0.0,
                weight: condition.weight,
                is_required: condition.is_required,
                explanation: e.to_string(),
                elapsed_us: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractedField;
    use crate::registry::CustomVerdict;
    use pretty_assertions::assert_eq;

    fn fields() -> FieldSet {
        [
            ExtractedField::new("total", "1,250.00", 0.9),
            ExtractedField::new("po_number", "PO-4711", 0.8),
            ExtractedField::new("notes", "   ", 1.0),
            ExtractedField::new("status", "pending", 1.0),
        ]
        .into_iter()
        .collect()
    }

    fn document() -> DocumentContext {
        DocumentContext::new()
            .with_supplier("Acme Corp")
            .with_document_type("invoice")
    }

    fn eval(condition: Condition) -> ConditionResult {
        let fields = fields();
        let document = document();
        ConditionEvaluator::default().evaluate(&condition, &EvaluationContext::new(&document, &fields))
    }

    #[test]
    fn test_string_operators_fold_case() {
        assert!(eval(Condition::field("po_number", Operator::Equals, "po-4711")).passed);
        assert!(!eval(Condition::field("po_number", Operator::Equals, "po-4711").case_sensitive()).passed);
        assert!(eval(Condition::field("po_number", Operator::StartsWith, "PO-")).passed);
        assert!(eval(Condition::field("po_number", Operator::EndsWith, "4711")).passed);
        assert!(eval(Condition::field("status", Operator::Contains, "END")).passed);
        assert!(eval(Condition::field("status", Operator::NotEquals, "paid")).passed);
    }

    #[test]
    fn test_pass_carries_field_confidence() {
        let result = eval(Condition::field("total", Operator::GreaterThan, "1000").with_weight(2.0));
        assert!(result.passed);
        assert!(result.evaluated);
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.weight, 2.0);
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(eval(Condition::field("total", Operator::GreaterThanOrEqual, "1250")).passed);
        assert!(eval(Condition::field("total", Operator::LessThan, "1 300,00")).passed);
        assert!(!eval(Condition::field("total", Operator::LessThanOrEqual, "100")).passed);
    }

    #[test]
    fn test_non_numeric_value_is_soft_miss() {
        let result = eval(Condition::field("status", Operator::GreaterThan, "10"));
        assert!(!result.passed);
        assert!(result.evaluated);
        assert_eq!(result.confidence, 0.0);
        assert!(result.explanation.contains("not numeric"));
    }

    #[test]
    fn test_digit_bearing_text_is_not_numeric() {
        let fields: FieldSet = [
            ExtractedField::new("due", "2024-01-05", 1.0),
            ExtractedField::new("phone", "555-1234", 1.0),
        ]
        .into_iter()
        .collect();
        let document = document();
        let context = EvaluationContext::new(&document, &fields);
        let evaluator = ConditionEvaluator::default();

        for condition in [
            Condition::field("due", Operator::GreaterThan, "1000"),
            Condition::field("phone", Operator::GreaterThan, "5000000"),
        ] {
            let result = evaluator.evaluate(&condition, &context);
            assert!(!result.passed);
            assert!(result.evaluated);
            assert!(result.explanation.contains("not numeric"));
        }
    }

    #[test]
    fn test_matches_operator() {
        assert!(eval(Condition::field("po_number", Operator::Matches, r"^po-\d{4}$")).passed);
        assert!(!eval(Condition::field("po_number", Operator::Matches, r"^po-\d{4}$").case_sensitive()).passed);
    }

    #[test]
    fn test_invalid_match_operand_fails() {
        let result = eval(Condition::field("po_number", Operator::Matches, r"(unclosed"));
        assert!(!result.passed);
        assert!(!result.evaluated);
    }

    #[test]
    fn test_emptiness_treats_missing_as_empty() {
        assert!(eval(Condition::field("notes", Operator::IsEmpty, "")).passed);
        assert!(eval(Condition::field("missing", Operator::IsEmpty, "")).passed);
        assert!(!eval(Condition::field("missing", Operator::IsNotEmpty, "")).passed);
        assert!(eval(Condition::field("po_number", Operator::IsNotEmpty, "")).passed);
    }

    #[test]
    fn test_missing_field_is_not_evaluated() {
        let result = eval(Condition::field("missing", Operator::Equals, "x"));
        assert!(!result.passed);
        assert!(!result.evaluated);
        assert_eq!(result.explanation, "field `missing` is not available");
    }

    #[test]
    fn test_context_conditions() {
        let supplier = eval(Condition::new(ConditionKind::Supplier, Operator::Contains, "acme"));
        assert!(supplier.passed);
        assert_eq!(supplier.confidence, 1.0);

        let template = eval(Condition::new(ConditionKind::TemplatePattern, Operator::Equals, "x"));
        assert!(!template.evaluated);
    }

    #[test]
    fn test_unregistered_custom_condition_fails() {
        let condition = Condition::new(
            ConditionKind::Custom { handler: "vat_valid".to_string() },
            Operator::Equals,
            "",
        );
        let result = eval(condition);
        assert!(!result.passed);
        assert!(result.explanation.contains("unregistered"));
    }

    struct HasPurchaseOrder;

    impl ConditionHandler for HasPurchaseOrder {
        fn evaluate(&self, _condition: &Condition, context: &EvaluationContext<'_>) -> CustomVerdict {
            if context.fields.contains("po_number") {
                CustomVerdict::pass(0.7, "purchase order present")
            } else {
                CustomVerdict::fail("no purchase order")
            }
        }
    }

    #[test]
    fn test_registered_custom_condition() {
        let mut registry = Registry::new();
        registry.register_condition("has_po", HasPurchaseOrder);

        let condition = Condition::new(
            ConditionKind::Custom { handler: "has_po".to_string() },
            Operator::Equals,
            "",
        );
        let fields = fields();
        let document = document();
        let result = ConditionEvaluator::new(registry)
            .evaluate(&condition, &EvaluationContext::new(&document, &fields));

        assert!(result.passed);
        assert_eq!(result.confidence, 0.7);
        assert_eq!(result.explanation, "purchase order present");
    }
}
