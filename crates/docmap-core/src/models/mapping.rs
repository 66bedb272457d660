//! Mapping output consumed by the template-filling subsystem.

use serde::{Deserialize, Serialize};

use super::rule::LocationKind;

/// A concrete binding of a field value to a template location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub field_name: String,
    pub value: String,
    pub target_location: String,
    pub location_kind: LocationKind,
    #[serde(default)]
    pub description: String,
    pub rule_id: u64,
    pub action_id: u64,
}
