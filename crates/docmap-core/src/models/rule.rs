//! Mapping rules: conditions deciding when a rule applies and actions
//! describing what it maps.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::usage::UsageStats;

/// A named, prioritized set of conditions and actions.
///
/// The rule owns its conditions and actions; neither refers back to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule id (0 until stored).
    #[serde(default)]
    pub id: u64,

    /// Display name.
    pub name: String,

    /// Optional free-form description.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,

    /// Selection rank, higher first.
    #[serde(default)]
    pub priority: i32,

    /// Inactive rules are kept for history but never evaluated.
    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Conditions in authoring order.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Actions; executed by display order.
    #[serde(default)]
    pub actions: Vec<Action>,

    /// Reliability tallies.
    #[serde(default)]
    pub stats: UsageStats,

    /// When the rule was created.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

impl Rule {
    /// Create an active, empty rule.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: None,
            priority: 0,
            is_active: true,
            conditions: Vec::new(),
            actions: Vec::new(),
            stats: UsageStats::default(),
            created_at: Some(Utc::now()),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_success_rate(mut self, rate: f64) -> Self {
        self.stats.success_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }
}

/// What a condition inspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionKind {
    /// The value of the extracted field named by `field_name`.
    Field,
    /// The document's supplier.
    Supplier,
    /// The document type from classification.
    DocumentType,
    /// The destination template's pattern.
    TemplatePattern,
    /// The destination template's category.
    TemplateCategory,
    /// A registered custom predicate.
    Custom { handler: String },
}

/// Comparison applied by a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Matches,
    IsEmpty,
    IsNotEmpty,
}

impl Operator {
    /// Whether absence of the inspected value counts as an empty value
    /// rather than making the condition unevaluable.
    pub fn treats_missing_as_empty(&self) -> bool {
        matches!(self, Operator::IsEmpty | Operator::IsNotEmpty)
    }

    /// Short symbol used in explanations.
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Equals => "==",
            Operator::NotEquals => "!=",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts with",
            Operator::EndsWith => "ends with",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::Matches => "matches",
            Operator::IsEmpty => "is empty",
            Operator::IsNotEmpty => "is not empty",
        }
    }
}

/// How a condition combines with the next one in its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

impl LogicalOperator {
    pub fn combine(self, left: bool, right: bool) -> bool {
        match self {
            LogicalOperator::And => left && right,
            LogicalOperator::Or => left || right,
        }
    }
}

/// One boolean test contributing to a rule's applicability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub id: u64,

    pub kind: ConditionKind,

    /// Field inspected by `field` conditions.
    #[serde(default)]
    pub field_name: String,

    pub operator: Operator,

    #[serde(default)]
    pub operand: String,

    #[serde(default)]
    pub case_sensitive: bool,

    /// Contribution to the aggregate match score.
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Hard gate rather than soft contributor.
    #[serde(default)]
    pub is_required: bool,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub group_id: Option<String>,

    /// Group this condition's group (or this condition) nests into.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_id: Option<String>,

    #[serde(default)]
    pub nesting_level: u32,

    #[serde(default)]
    pub logical_operator: LogicalOperator,
}

impl Condition {
    /// Create an optional condition with weight 1.0.
    pub fn new(kind: ConditionKind, operator: Operator, operand: impl Into<String>) -> Self {
        Self {
            id: 0,
            kind,
            field_name: String::new(),
            operator,
            operand: operand.into(),
            case_sensitive: false,
            weight: default_weight(),
            is_required: false,
            group_id: None,
            parent_id: None,
            nesting_level: 0,
            logical_operator: LogicalOperator::And,
        }
    }

    /// Shorthand for a condition on an extracted field.
    pub fn field(field_name: impl Into<String>, operator: Operator, operand: impl Into<String>) -> Self {
        let mut condition = Self::new(ConditionKind::Field, operator, operand);
        condition.field_name = field_name.into();
        condition
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>, nesting_level: u32) -> Self {
        self.parent_id = Some(parent_id.into());
        self.nesting_level = nesting_level;
        self
    }

    pub fn with_nesting_level(mut self, nesting_level: u32) -> Self {
        self.nesting_level = nesting_level;
        self
    }

    pub fn then(mut self, logical_operator: LogicalOperator) -> Self {
        self.logical_operator = logical_operator;
        self
    }

    /// Human-readable description of the inspected subject.
    pub fn subject(&self) -> String {
        match &self.kind {
            ConditionKind::Field => format!("field `{}`", self.field_name),
            ConditionKind::Supplier => "supplier".to_string(),
            ConditionKind::DocumentType => "document type".to_string(),
            ConditionKind::TemplatePattern => "template pattern".to_string(),
            ConditionKind::TemplateCategory => "template category".to_string(),
            ConditionKind::Custom { handler } => format!("custom `{}`", handler),
        }
    }
}

/// Kind of destination location in a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    #[default]
    Cell,
    Range,
    NamedRange,
    FormField,
    Placeholder,
}

/// Arithmetic used by `calculate` actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calculation {
    Sum,
    Difference,
    Product,
    Quotient,
}

impl Calculation {
    /// Fold operands left to right; `None` on division by zero or overflow.
    pub fn apply(&self, operands: &[Decimal]) -> Option<Decimal> {
        let (first, rest) = operands.split_first()?;
        rest.iter().try_fold(*first, |acc, value| match self {
            Calculation::Sum => acc.checked_add(*value),
            Calculation::Difference => acc.checked_sub(*value),
            Calculation::Product => acc.checked_mul(*value),
            Calculation::Quotient => acc.checked_div(*value),
        })
    }
}

/// What an action does with its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Copy the source field.
    DirectMap,
    /// Copy the source field through the action's transformation.
    Transform,
    /// Join several fields.
    Combine {
        sources: Vec<String>,
        #[serde(default = "default_separator")]
        separator: String,
    },
    /// Take one piece of the source field.
    Split { delimiter: String, index: usize },
    /// Arithmetic over fields and decimal literals.
    Calculate {
        operation: Calculation,
        operands: Vec<String>,
    },
    /// Map the source field only when the nested condition holds.
    Conditional { condition: Box<Condition> },
    /// A registered custom action.
    Custom { handler: String },
}

fn default_separator() -> String {
    " ".to_string()
}

/// One mapping instruction producing a field-to-location binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub id: u64,

    pub kind: ActionKind,

    #[serde(default)]
    pub source_field: String,

    pub target_location: String,

    #[serde(default)]
    pub location_kind: LocationKind,

    /// Transformation spec, `name` or `name:argument`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub transformation: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub default_value: Option<String>,

    #[serde(default)]
    pub is_required: bool,

    #[serde(default)]
    pub display_order: i32,

    /// Publishes the produced value under this name for later actions.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub output_field: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
}

impl Action {
    pub fn new(kind: ActionKind, source_field: impl Into<String>, target_location: impl Into<String>) -> Self {
        Self {
            id: 0,
            kind,
            source_field: source_field.into(),
            target_location: target_location.into(),
            location_kind: LocationKind::Cell,
            transformation: None,
            default_value: None,
            is_required: false,
            display_order: 0,
            output_field: None,
            description: None,
        }
    }

    /// Shorthand for a direct map.
    pub fn direct(source_field: impl Into<String>, target_location: impl Into<String>) -> Self {
        Self::new(ActionKind::DirectMap, source_field, target_location)
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn with_order(mut self, display_order: i32) -> Self {
        self.display_order = display_order;
        self
    }

    pub fn with_transformation(mut self, spec: impl Into<String>) -> Self {
        self.transformation = Some(spec.into());
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_output(mut self, field: impl Into<String>) -> Self {
        self.output_field = Some(field.into());
        self
    }

    pub fn with_location_kind(mut self, kind: LocationKind) -> Self {
        self.location_kind = kind;
        self
    }

    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }

    /// Field names this action reads.
    pub fn inputs(&self) -> Vec<&str> {
        let mut inputs: Vec<&str> = match &self.kind {
            ActionKind::Combine { sources, .. } => sources.iter().map(String::as_str).collect(),
            ActionKind::Calculate { operands, .. } => operands
                .iter()
                .map(String::as_str)
                .filter(|op| op.trim().parse::<Decimal>().is_err())
                .collect(),
            _ => Vec::new(),
        };
        if !self.source_field.is_empty() {
            inputs.push(self.source_field.as_str());
        }
        if let ActionKind::Conditional { condition } = &self.kind {
            if !condition.field_name.is_empty() {
                inputs.push(condition.field_name.as_str());
            }
        }
        inputs.sort_unstable();
        inputs.dedup();
        inputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_condition_defaults_from_json() {
        let condition: Condition = serde_json::from_str(
            r#"{"kind": {"type": "field"}, "field_name": "total", "operator": "greater_than", "operand": "100"}"#,
        )
        .unwrap();
        assert_eq!(condition.weight, 1.0);
        assert!(!condition.is_required);
        assert_eq!(condition.logical_operator, LogicalOperator::And);
        assert!(condition.group_id.is_none());
    }

    #[test]
    fn test_calculation_apply() {
        let values = [
            Decimal::from_str("100.00").unwrap(),
            Decimal::from_str("23.00").unwrap(),
        ];
        assert_eq!(Calculation::Sum.apply(&values), Some(Decimal::from_str("123.00").unwrap()));
        assert_eq!(Calculation::Difference.apply(&values), Some(Decimal::from_str("77.00").unwrap()));
        assert_eq!(Calculation::Quotient.apply(&[Decimal::ONE, Decimal::ZERO]), None);
        assert_eq!(Calculation::Sum.apply(&[]), None);
    }

    #[test]
    fn test_action_inputs_skip_literals() {
        let action = Action::new(
            ActionKind::Calculate {
                operation: Calculation::Product,
                operands: vec!["net".to_string(), "1.23".to_string()],
            },
            "",
            "B7",
        );
        assert_eq!(action.inputs(), vec!["net"]);
    }
}
