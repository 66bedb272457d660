//! Error types for the docmap-core library.

use thiserror::Error;

/// Main error type for the docmap library.
#[derive(Error, Debug)]
pub enum DocmapError {
    /// A pattern or rule failed authoring-time validation.
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    /// An action batch could not be executed.
    #[error("action error: {0}")]
    Action(#[from] ActionError),

    /// A taught example could not be turned into a pattern.
    #[error("learning error: {0}")]
    Learn(#[from] LearnError),

    /// The pattern/rule repository failed.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors raised while compiling patterns and rules.
///
/// Anything that fails here is never activated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    /// The pattern expression is empty.
    #[error("pattern {pattern_id} has an empty expression")]
    EmptyExpression { pattern_id: u64 },

    /// The regular expression is malformed or too large.
    #[error("invalid expression `{expression}`: {reason}")]
    InvalidExpression { expression: String, reason: String },

    /// A `matches` condition carries an operand that is not a valid regex.
    #[error("condition {condition_id} has an invalid match operand: {reason}")]
    InvalidOperand { condition_id: u64, reason: String },

    /// Group parent chain loops back on itself.
    #[error("rule {rule_id}: condition groups form a cycle through `{group_id}`")]
    CyclicConditionTree { rule_id: u64, group_id: String },

    /// A condition names a parent group that no condition belongs to.
    #[error("rule {rule_id}: unknown parent group `{parent_id}`")]
    UnknownParentGroup { rule_id: u64, parent_id: String },

    /// Members of one group disagree about the group's parent.
    #[error("rule {rule_id}: group `{group_id}` has conflicting parents")]
    ConflictingParent { rule_id: u64, group_id: String },

    /// Nesting levels do not increase with depth.
    #[error("rule {rule_id}: condition {condition_id} declares nesting level {declared}, expected {expected}")]
    InconsistentNesting {
        rule_id: u64,
        condition_id: u64,
        declared: u32,
        expected: u32,
    },

    /// A custom condition, action or transformation key is not registered.
    #[error("unregistered custom {kind} handler `{key}`")]
    UnregisteredHandler { kind: &'static str, key: String },
}

/// Errors that abort a whole action batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    /// Actions depend on each other's outputs in a loop.
    #[error("rule {rule_id}: action dependency cycle between actions {action_ids:?}")]
    CycleDetected { rule_id: u64, action_ids: Vec<u64> },
}

/// Errors raised while learning a pattern from an example.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LearnError {
    /// The example value does not occur in the text.
    #[error("value `{0}` does not occur in the document text")]
    ValueNotFound(String),

    /// No label text precedes the value.
    #[error("no label found before value `{0}`")]
    NoLabel(String),

    /// The generated pattern does not reproduce the example.
    #[error("generated pattern `{expression}` extracts {found:?} instead of the example")]
    NotReproducible {
        expression: String,
        found: Option<String>,
    },

    /// The generated pattern failed to compile.
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Errors raised by a pattern/rule repository.
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// The backing store cannot be reached.
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    /// No entity with that id exists.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    /// The entity has been used and may only be deactivated.
    #[error("{kind} {id} is referenced by processed documents and cannot be deleted")]
    Referenced { kind: &'static str, id: u64 },

    /// The backing file could not be read or written.
    #[error("repository I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is not a valid catalog.
    #[error("malformed catalog: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Result type for the docmap library.
pub type Result<T> = std::result::Result<T, DocmapError>;
