//! Registry of custom condition, action and transformation handlers.
//!
//! Rules refer to custom behaviour by string key. Keys are resolved when a
//! rule is compiled; a key with no registered handler is a compile error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::models::{Action, Condition, FieldSet};
use crate::rules::EvaluationContext;

/// Verdict returned by a custom condition.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomVerdict {
    pub passed: bool,
    /// Confidence (0.0 - 1.0) attached to a pass.
    pub confidence: f64,
    pub explanation: String,
}

impl CustomVerdict {
    pub fn pass(confidence: f64, explanation: impl Into<String>) -> Self {
        Self {
            passed: true,
            confidence,
            explanation: explanation.into(),
        }
    }

    pub fn fail(explanation: impl Into<String>) -> Self {
        Self {
            passed: false,
            confidence: 0.0,
            explanation: explanation.into(),
        }
    }
}

/// A custom condition predicate.
pub trait ConditionHandler: Send + Sync {
    fn evaluate(&self, condition: &Condition, context: &EvaluationContext<'_>) -> CustomVerdict;
}

impl<F> ConditionHandler for F
where
    F: Fn(&Condition, &EvaluationContext<'_>) -> CustomVerdict + Send + Sync,
{
    fn evaluate(&self, condition: &Condition, context: &EvaluationContext<'_>) -> CustomVerdict {
        self(condition, context)
    }
}

/// A custom action producing a value from the current fields.
pub trait ActionHandler: Send + Sync {
    fn produce(&self, action: &Action, fields: &FieldSet) -> Result<String, String>;
}

impl<F> ActionHandler for F
where
    F: Fn(&Action, &FieldSet) -> Result<String, String> + Send + Sync,
{
    fn produce(&self, action: &Action, fields: &FieldSet) -> Result<String, String> {
        self(action, fields)
    }
}

/// A custom value transformation.
pub trait TransformHandler: Send + Sync {
    fn apply(&self, value: &str, argument: Option<&str>) -> Result<String, String>;
}

impl<F> TransformHandler for F
where
    F: Fn(&str, Option<&str>) -> Result<String, String> + Send + Sync,
{
    fn apply(&self, value: &str, argument: Option<&str>) -> Result<String, String> {
        self(value, argument)
    }
}

/// String-keyed handler lookup shared by all rules.
#[derive(Clone, Default)]
pub struct Registry {
    conditions: HashMap<String, Arc<dyn ConditionHandler>>,
    actions: HashMap<String, Arc<dyn ActionHandler>>,
    transforms: HashMap<String, Arc<dyn TransformHandler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_condition(&mut self, key: impl Into<String>, handler: impl ConditionHandler + 'static) {
        self.conditions.insert(normalize(key.into()), Arc::new(handler));
    }

    pub fn register_action(&mut self, key: impl Into<String>, handler: impl ActionHandler + 'static) {
        self.actions.insert(normalize(key.into()), Arc::new(handler));
    }

    pub fn register_transform(&mut self, key: impl Into<String>, handler: impl TransformHandler + 'static) {
        self.transforms.insert(normalize(key.into()), Arc::new(handler));
    }

    pub fn condition(&self, key: &str) -> Option<Arc<dyn ConditionHandler>> {
        self.conditions.get(&normalize(key.to_string())).cloned()
    }

    pub fn action(&self, key: &str) -> Option<Arc<dyn ActionHandler>> {
        self.actions.get(&normalize(key.to_string())).cloned()
    }

    pub fn transform(&self, key: &str) -> Option<Arc<dyn TransformHandler>> {
        self.transforms.get(&normalize(key.to_string())).cloned()
    }
}

fn normalize(key: String) -> String {
    key.trim().to_lowercase()
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut conditions: Vec<_> = self.conditions.keys().collect();
        let mut actions: Vec<_> = self.actions.keys().collect();
        let mut transforms: Vec<_> = self.transforms.keys().collect();
        conditions.sort();
        actions.sort();
        transforms.sort();
        f.debug_struct("Registry")
            .field("conditions", &conditions)
            .field("actions", &actions)
            .field("transforms", &transforms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Reverse;

    impl TransformHandler for Reverse {
        fn apply(&self, value: &str, _argument: Option<&str>) -> Result<String, String> {
            Ok(value.chars().rev().collect())
        }
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let mut registry = Registry::new();
        registry.register_transform("Reverse", Reverse);

        let handler = registry.transform("reverse").unwrap();
        assert_eq!(handler.apply("abc", None), Ok("cba".to_string()));
        assert!(registry.transform("missing").is_none());
        assert!(registry.condition("reverse").is_none());
    }
}
