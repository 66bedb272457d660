//! Reliability tallies shared by patterns and rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Usage counters and smoothed success estimate.
///
/// `success_rate` only ever moves through the adaptive scorer; the raw
/// tallies are kept for auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Number of recorded outcomes.
    pub usage_count: u64,

    /// Number of recorded successes.
    pub success_count: u64,

    /// Number of recorded failures.
    pub failure_count: u64,

    /// Smoothed success estimate (0.0 - 1.0).
    pub success_rate: f64,

    /// When an outcome was last recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl UsageStats {
    /// Fresh statistics with the given prior.
    pub fn with_rate(success_rate: f64) -> Self {
        Self {
            usage_count: 0,
            success_count: 0,
            failure_count: 0,
            success_rate: success_rate.clamp(0.0, 1.0),
            last_modified: None,
        }
    }

    /// Whether the entity has ever been applied to a document.
    pub fn is_referenced(&self) -> bool {
        self.usage_count > 0
    }
}

impl Default for UsageStats {
    fn default() -> Self {
        Self::with_rate(0.5)
    }
}
