//! Adaptive reliability scoring for patterns and rules.
//!
//! Every confirmed or rejected application moves the entity's success
//! rate by exponential smoothing:
//!
//! ```text
//! rate' = rate * (1 - alpha) + (success ? 1 : 0) * alpha
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Pattern, Rule, ScoringConfig, UsageStats};

/// Anything carrying usage statistics.
pub trait Scored {
    fn usage(&self) -> &UsageStats;
    fn usage_mut(&mut self) -> &mut UsageStats;
}

impl Scored for Pattern {
    fn usage(&self) -> &UsageStats {
        &self.stats
    }

    fn usage_mut(&mut self) -> &mut UsageStats {
        &mut self.stats
    }
}

impl Scored for Rule {
    fn usage(&self) -> &UsageStats {
        &self.stats
    }

    fn usage_mut(&mut self) -> &mut UsageStats {
        &mut self.stats
    }
}

impl Scored for UsageStats {
    fn usage(&self) -> &UsageStats {
        self
    }

    fn usage_mut(&mut self) -> &mut UsageStats {
        self
    }
}

/// Applies the smoothing update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveScorer {
    alpha: f64,
}

impl Default for AdaptiveScorer {
    fn default() -> Self {
        Self { alpha: 0.1 }
    }
}

impl AdaptiveScorer {
    /// Smoothing factor is clamped into (0, 1].
    pub fn new(alpha: f64) -> Self {
        let alpha = if alpha.is_finite() { alpha.clamp(f64::EPSILON, 1.0) } else { 0.1 };
        Self { alpha }
    }

    pub fn from_config(config: &ScoringConfig) -> Self {
        Self::new(config.smoothing_factor)
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Record one confirmed outcome on an entity.
    pub fn record_outcome<E: Scored + ?Sized>(&self, entity: &mut E, success: bool) {
        let stats = entity.usage_mut();
        let target = if success { 1.0 } else { 0.0 };
        stats.success_rate = (stats.success_rate * (1.0 - self.alpha) + target * self.alpha).clamp(0.0, 1.0);
        stats.usage_count += 1;
        if success {
            stats.success_count += 1;
        } else {
            stats.failure_count += 1;
        }
        stats.last_modified = Some(Utc::now());
    }
}

/// Identity of a scored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityKey {
    Pattern(u64),
    Rule(u64),
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKey::Pattern(id) => write!(f, "pattern {}", id),
            EntityKey::Rule(id) => write!(f, "rule {}", id),
        }
    }
}

/// Shared, thread-safe statistics for every scored entity.
///
/// Updates to one entity are serialized by that entity's mutex, so the
/// rate and counters always move together. Different entities update in
/// parallel.
#[derive(Debug)]
pub struct ScoreLedger {
    scorer: AdaptiveScorer,
    entries: RwLock<HashMap<EntityKey, Arc<Mutex<UsageStats>>>>,
    initial_success_rate: f64,
}

impl Default for ScoreLedger {
    fn default() -> Self {
        Self::new(AdaptiveScorer::default(), 0.5)
    }
}

impl ScoreLedger {
    pub fn new(scorer: AdaptiveScorer, initial_success_rate: f64) -> Self {
        Self {
            scorer,
            entries: RwLock::new(HashMap::new()),
            initial_success_rate,
        }
    }

    pub fn scorer(&self) -> AdaptiveScorer {
        self.scorer
    }

    /// Load the persisted statistics of an entity, replacing any entry.
    pub fn seed(&self, key: EntityKey, stats: UsageStats) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, Arc::new(Mutex::new(stats)));
    }

    fn entry(&self, key: EntityKey) -> Arc<Mutex<UsageStats>> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(&key) {
                return Arc::clone(entry);
            }
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            entries
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(UsageStats::with_rate(self.initial_success_rate)))),
        )
    }

    /// Record an outcome and return the updated statistics.
    pub fn record(&self, key: EntityKey, success: bool) -> UsageStats {
        let entry = self.entry(key);
        let mut stats = entry.lock().unwrap_or_else(PoisonError::into_inner);
        self.scorer.record_outcome(&mut *stats, success);
        trace_update(key, success, &stats);
        stats.clone()
    }

    /// Record an outcome only once `persist` has accepted the updated
    /// statistics.
    ///
    /// The entity stays locked while `persist` runs, so persisted
    /// snapshots are written in update order. When `persist` fails the
    /// ledger is left as it was and no entry is created.
    pub fn try_record<E>(
        &self,
        key: EntityKey,
        success: bool,
        persist: impl FnOnce(&UsageStats) -> Result<(), E>,
    ) -> Result<UsageStats, E> {
        let existing = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries.get(&key).map(Arc::clone)
        };
        if let Some(entry) = existing {
            let mut stats = entry.lock().unwrap_or_else(PoisonError::into_inner);
            return self.apply(key, success, &mut stats, persist);
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.get(&key).map(Arc::clone) {
            Some(entry) => {
                let mut stats = entry.lock().unwrap_or_else(PoisonError::into_inner);
                self.apply(key, success, &mut stats, persist)
            }
            None => {
                let mut stats = UsageStats::with_rate(self.initial_success_rate);
                let updated = self.apply(key, success, &mut stats, persist)?;
                entries.insert(key, Arc::new(Mutex::new(stats)));
                Ok(updated)
            }
        }
    }

    fn apply<E>(
        &self,
        key: EntityKey,
        success: bool,
        stats: &mut UsageStats,
        persist: impl FnOnce(&UsageStats) -> Result<(), E>,
    ) -> Result<UsageStats, E> {
        let mut next = stats.clone();
        self.scorer.record_outcome(&mut next, success);
        persist(&next)?;
        trace_update(key, success, &next);
        *stats = next.clone();
        Ok(next)
    }

    pub fn get(&self, key: EntityKey) -> Option<UsageStats> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&key)
            .map(|entry| entry.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// All entries, sorted by key.
    pub fn snapshot(&self) -> Vec<(EntityKey, UsageStats)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = entries
            .iter()
            .map(|(key, entry)| (*key, entry.lock().unwrap_or_else(PoisonError::into_inner).clone()))
            .collect();
        all.sort_by_key(|(key, _)| *key);
        all
    }
}

fn trace_update(key: EntityKey, success: bool, stats: &UsageStats) {
    debug!(
        "{} {}: rate {:.4} after {} uses",
        key,
        if success { "succeeded" } else { "failed" },
        stats.success_rate,
        stats.usage_count
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::thread;

    #[test]
    fn test_smoothing_update() {
        let scorer = AdaptiveScorer::default();
        let mut pattern = Pattern::new("acme", "total", r"Total:\s*(\S+)").with_success_rate(0.5);

        scorer.record_outcome(&mut pattern, true);
        assert!((pattern.stats.success_rate - 0.55).abs() < 1e-12);
        assert_eq!(pattern.stats.usage_count, 1);
        assert_eq!(pattern.stats.success_count, 1);
        assert!(pattern.stats.last_modified.is_some());

        scorer.record_outcome(&mut pattern, false);
        assert!((pattern.stats.success_rate - 0.495).abs() < 1e-12);
        assert_eq!(pattern.stats.usage_count, 2);
        assert_eq!(pattern.stats.failure_count, 1);
    }

    #[test]
    fn test_successes_converge_without_overshoot() {
        let scorer = AdaptiveScorer::default();
        let mut rule = Rule::new("r").with_success_rate(0.5);

        let mut previous = rule.stats.success_rate;
        for _ in 0..10 {
            scorer.record_outcome(&mut rule, true);
            let rate = rule.stats.success_rate;
            assert!(rate > previous);
            assert!(rate <= 1.0);
            previous = rate;
        }
        // 1 - 0.5 * 0.9^10
        assert!((previous - 0.825_660_6).abs() < 1e-6);
        assert_eq!(rule.stats.usage_count, 10);
    }

    #[test]
    fn test_counts_stay_consistent() {
        let scorer = AdaptiveScorer::new(0.3);
        let mut stats = UsageStats::default();
        for i in 0..57 {
            scorer.record_outcome(&mut stats, i % 3 != 0);
            assert!((0.0..=1.0).contains(&stats.success_rate));
            assert_eq!(stats.usage_count, stats.success_count + stats.failure_count);
        }
        assert_eq!(stats.failure_count, 19);
    }

    #[test]
    fn test_alpha_is_clamped() {
        assert_eq!(AdaptiveScorer::new(3.0).alpha(), 1.0);
        assert!(AdaptiveScorer::new(0.0).alpha() > 0.0);
        assert_eq!(AdaptiveScorer::new(f64::NAN).alpha(), 0.1);

        let mut stats = UsageStats::with_rate(0.2);
        AdaptiveScorer::new(1.0).record_outcome(&mut stats, true);
        assert_eq!(stats.success_rate, 1.0);
    }

    #[test]
    fn test_ledger_serializes_concurrent_updates() {
        let ledger = Arc::new(ScoreLedger::new(AdaptiveScorer::default(), 0.5));
        ledger.seed(EntityKey::Rule(1), UsageStats::with_rate(0.5));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for i in 0..25 {
                        ledger.record(EntityKey::Rule(1), (t + i) % 2 == 0);
                        ledger.record(EntityKey::Pattern(t), true);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = ledger.get(EntityKey::Rule(1)).unwrap();
        assert_eq!(stats.usage_count, 200);
        assert_eq!(stats.usage_count, stats.success_count + stats.failure_count);
        assert_eq!(ledger.snapshot().len(), 9);
    }

    #[test]
    fn test_try_record_persists_updated_stats() {
        let ledger = ScoreLedger::new(AdaptiveScorer::default(), 0.5);
        let mut persisted = None;
        let stats = ledger
            .try_record(EntityKey::Pattern(4), true, |stats| {
                persisted = Some(stats.clone());
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(stats.usage_count, 1);
        assert_eq!(persisted, Some(stats.clone()));
        assert_eq!(ledger.get(EntityKey::Pattern(4)), Some(stats));
        assert_eq!(ledger.get(EntityKey::Pattern(3)), None);
    }

    #[test]
    fn test_failed_persist_leaves_ledger_unchanged() {
        let ledger = ScoreLedger::new(AdaptiveScorer::default(), 0.5);
        ledger.seed(EntityKey::Rule(1), UsageStats::with_rate(0.9));

        let err = ledger.try_record(EntityKey::Rule(1), false, |_| Err("disk full"));
        assert_eq!(err, Err("disk full"));
        assert_eq!(ledger.get(EntityKey::Rule(1)), Some(UsageStats::with_rate(0.9)));

        let err = ledger.try_record(EntityKey::Rule(42), true, |_| Err("not found"));
        assert_eq!(err, Err("not found"));
        assert_eq!(ledger.get(EntityKey::Rule(42)), None);
        assert_eq!(ledger.snapshot().len(), 1);
    }
}
