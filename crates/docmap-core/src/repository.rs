//! Storage of patterns and rules.
//!
//! The engine only needs CRUD access; [`RuleRepository`] abstracts the
//! store. [`InMemoryRepository`] backs tests and one-shot runs,
//! [`JsonFileRepository`] keeps a catalog file on disk.

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RepositoryError;
use crate::models::{Pattern, Rule, UsageStats};
use crate::scoring::EntityKey;

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// CRUD access to persisted patterns and rules.
pub trait RuleRepository: Send + Sync {
    fn patterns(&self) -> RepositoryResult<Vec<Pattern>>;
    fn pattern(&self, id: u64) -> RepositoryResult<Pattern>;
    /// Insert or replace; an id of 0 is assigned. Returns the stored id.
    fn save_pattern(&self, pattern: Pattern) -> RepositoryResult<u64>;
    fn deactivate_pattern(&self, id: u64) -> RepositoryResult<()>;
    /// Fails with [`RepositoryError::Referenced`] once the pattern has
    /// been used.
    fn delete_pattern(&self, id: u64) -> RepositoryResult<()>;

    fn rules(&self) -> RepositoryResult<Vec<Rule>>;
    fn rule(&self, id: u64) -> RepositoryResult<Rule>;
    /// Insert or replace; ids of 0 on the rule, its conditions and its
    /// actions are assigned. Returns the stored id.
    fn save_rule(&self, rule: Rule) -> RepositoryResult<u64>;
    fn deactivate_rule(&self, id: u64) -> RepositoryResult<()>;
    fn delete_rule(&self, id: u64) -> RepositoryResult<()>;

    /// Replace the statistics of a pattern or rule.
    fn update_stats(&self, key: EntityKey, stats: &UsageStats) -> RepositoryResult<()>;
}

/// The serialized form of a repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub patterns: Vec<Pattern>,
    pub rules: Vec<Rule>,
}

impl Catalog {
    pub fn from_file(path: &Path) -> RepositoryResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> RepositoryResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn pattern(&self, id: u64) -> RepositoryResult<&Pattern> {
        self.patterns
            .iter()
            .find(|p| p.id == id)
            .ok_or(RepositoryError::NotFound { kind: "pattern", id })
    }

    fn pattern_mut(&mut self, id: u64) -> RepositoryResult<&mut Pattern> {
        self.patterns
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(RepositoryError::NotFound { kind: "pattern", id })
    }

    fn rule(&self, id: u64) -> RepositoryResult<&Rule> {
        self.rules
            .iter()
            .find(|r| r.id == id)
            .ok_or(RepositoryError::NotFound { kind: "rule", id })
    }

    fn rule_mut(&mut self, id: u64) -> RepositoryResult<&mut Rule> {
        self.rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(RepositoryError::NotFound { kind: "rule", id })
    }

    fn save_pattern(&mut self, mut pattern: Pattern) -> u64 {
        if pattern.id == 0 {
            pattern.id = self.patterns.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        }
        if pattern.created_at.is_none() {
            pattern.created_at = Some(Utc::now());
        }
        let id = pattern.id;
        match self.patterns.iter_mut().find(|p| p.id == id) {
            Some(existing) => *existing = pattern,
            None => self.patterns.push(pattern),
        }
        id
    }

    fn save_rule(&mut self, mut rule: Rule) -> u64 {
        if rule.id == 0 {
            rule.id = self.rules.iter().map(|r| r.id).max().unwrap_or(0) + 1;
        }
        if rule.created_at.is_none() {
            rule.created_at = Some(Utc::now());
        }

        let mut next = rule.conditions.iter().map(|c| c.id).max().unwrap_or(0);
        for condition in rule.conditions.iter_mut().filter(|c| c.id == 0) {
            next += 1;
            condition.id = next;
        }
        let mut next = rule.actions.iter().map(|a| a.id).max().unwrap_or(0);
        for action in rule.actions.iter_mut().filter(|a| a.id == 0) {
            next += 1;
            action.id = next;
        }

        let id = rule.id;
        match self.rules.iter_mut().find(|r| r.id == id) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
        id
    }

    fn delete_pattern(&mut self, id: u64) -> RepositoryResult<()> {
        if self.pattern(id)?.stats.is_referenced() {
            return Err(RepositoryError::Referenced { kind: "pattern", id });
        }
        self.patterns.retain(|p| p.id != id);
        Ok(())
    }

    fn delete_rule(&mut self, id: u64) -> RepositoryResult<()> {
        if self.rule(id)?.stats.is_referenced() {
            return Err(RepositoryError::Referenced { kind: "rule", id });
        }
        self.rules.retain(|r| r.id != id);
        Ok(())
    }

    fn update_stats(&mut self, key: EntityKey, stats: &UsageStats) -> RepositoryResult<()> {
        match key {
            EntityKey::Pattern(id) => self.pattern_mut(id)?.stats = stats.clone(),
            EntityKey::Rule(id) => self.rule_mut(id)?.stats = stats.clone(),
        }
        Ok(())
    }
}

/// Lock-protected catalog held in memory.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    catalog: RwLock<Catalog>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: Catalog) -> Self {
        Self {
            catalog: RwLock::new(catalog),
        }
    }

    /// Copy of the current contents.
    pub fn catalog(&self) -> Catalog {
        self.catalog.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn read<T>(&self, f: impl FnOnce(&Catalog) -> RepositoryResult<T>) -> RepositoryResult<T> {
        f(&*self.catalog.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Catalog) -> RepositoryResult<T>) -> RepositoryResult<T> {
        f(&mut *self.catalog.write().unwrap_or_else(PoisonError::into_inner))
    }
}

impl RuleRepository for InMemoryRepository {
    fn patterns(&self) -> RepositoryResult<Vec<Pattern>> {
        self.read(|c| Ok(c.patterns.clone()))
    }

    fn pattern(&self, id: u64) -> RepositoryResult<Pattern> {
        self.read(|c| c.pattern(id).cloned())
    }

    fn save_pattern(&self, pattern: Pattern) -> RepositoryResult<u64> {
        self.write(|c| Ok(c.save_pattern(pattern)))
    }

    fn deactivate_pattern(&self, id: u64) -> RepositoryResult<()> {
        self.write(|c| {
            c.pattern_mut(id)?.is_active = false;
            Ok(())
        })
    }

    fn delete_pattern(&self, id: u64) -> RepositoryResult<()> {
        self.write(|c| c.delete_pattern(id))
    }

    fn rules(&self) -> RepositoryResult<Vec<Rule>> {
        self.read(|c| Ok(c.rules.clone()))
    }

    fn rule(&self, id: u64) -> RepositoryResult<Rule> {
        self.read(|c| c.rule(id).cloned())
    }

    fn save_rule(&self, rule: Rule) -> RepositoryResult<u64> {
        self.write(|c| Ok(c.save_rule(rule)))
    }

    fn deactivate_rule(&self, id: u64) -> RepositoryResult<()> {
        self.write(|c| {
            c.rule_mut(id)?.is_active = false;
            Ok(())
        })
    }

    fn delete_rule(&self, id: u64) -> RepositoryResult<()> {
        self.write(|c| c.delete_rule(id))
    }

    fn update_stats(&self, key: EntityKey, stats: &UsageStats) -> RepositoryResult<()> {
        self.write(|c| c.update_stats(key, stats))
    }
}

/// A catalog JSON file, rewritten after every change.
#[derive(Debug)]
pub struct JsonFileRepository {
    path: PathBuf,
    inner: InMemoryRepository,
}

impl JsonFileRepository {
    /// Open a catalog file; a missing file starts an empty catalog.
    pub fn open(path: impl Into<PathBuf>) -> RepositoryResult<Self> {
        let path = path.into();
        let catalog = if path.exists() {
            Catalog::from_file(&path)?
        } else {
            debug!("Catalog {} does not exist yet", path.display());
            Catalog::default()
        };
        info!(
            "Opened catalog {} ({} patterns, {} rules)",
            path.display(),
            catalog.patterns.len(),
            catalog.rules.len()
        );
        Ok(Self {
            path,
            inner: InMemoryRepository::with_catalog(catalog),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply a change to a copy of the catalog and write it while still
    /// holding the lock. Memory only changes once the file is written.
    fn write<T>(&self, f: impl FnOnce(&mut Catalog) -> RepositoryResult<T>) -> RepositoryResult<T> {
        self.inner.write(|catalog| {
            let mut next = catalog.clone();
            let value = f(&mut next)?;
            next.save(&self.path)?;
            *catalog = next;
            Ok(value)
        })
    }
}

impl RuleRepository for JsonFileRepository {
    fn patterns(&self) -> RepositoryResult<Vec<Pattern>> {
        self.inner.patterns()
    }

    fn pattern(&self, id: u64) -> RepositoryResult<Pattern> {
        self.inner.pattern(id)
    }

    fn save_pattern(&self, pattern: Pattern) -> RepositoryResult<u64> {
        self.write(|c| Ok(c.save_pattern(pattern)))
    }

    fn deactivate_pattern(&self, id: u64) -> RepositoryResult<()> {
        self.write(|c| {
            c.pattern_mut(id)?.is_active = false;
            Ok(())
        })
    }

    fn delete_pattern(&self, id: u64) -> RepositoryResult<()> {
        self.write(|c| c.delete_pattern(id))
    }

    fn rules(&self) -> RepositoryResult<Vec<Rule>> {
        self.inner.rules()
    }

    fn rule(&self, id: u64) -> RepositoryResult<Rule> {
        self.inner.rule(id)
    }

    fn save_rule(&self, rule: Rule) -> RepositoryResult<u64> {
        self.write(|c| Ok(c.save_rule(rule)))
    }

    fn deactivate_rule(&self, id: u64) -> RepositoryResult<()> {
        self.write(|c| {
            c.rule_mut(id)?.is_active = false;
            Ok(())
        })
    }

    fn delete_rule(&self, id: u64) -> RepositoryResult<()> {
        self.write(|c| c.delete_rule(id))
    }

    fn update_stats(&self, key: EntityKey, stats: &UsageStats) -> RepositoryResult<()> {
        self.write(|c| c.update_stats(key, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, Condition, Operator};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_save_assigns_ids() {
        let repo = InMemoryRepository::new();
        let first = repo.save_pattern(Pattern::new("acme", "total", r"Total:\s*(\S+)")).unwrap();
        let second = repo.save_pattern(Pattern::new("acme", "date", r"Date:\s*(\S+)")).unwrap();
        assert_eq!((first, second), (1, 2));

        let rule = Rule::new("acme totals")
            .with_condition(Condition::field("total", Operator::IsNotEmpty, ""))
            .with_condition(Condition::field("date", Operator::IsNotEmpty, "").with_id(5))
            .with_action(Action::direct("total", "B2"));
        let id = repo.save_rule(rule).unwrap();

        let stored = repo.rule(id).unwrap();
        assert_eq!(stored.id, 1);
        let condition_ids: Vec<u64> = stored.conditions.iter().map(|c| c.id).collect();
        assert_eq!(condition_ids, vec![6, 5]);
        assert_eq!(stored.actions[0].id, 1);
    }

    #[test]
    fn test_used_entities_cannot_be_deleted() {
        let repo = InMemoryRepository::new();
        let id = repo.save_pattern(Pattern::new("acme", "total", r"Total:\s*(\S+)")).unwrap();
        let mut stats = UsageStats::default();
        stats.usage_count = 1;
        stats.success_count = 1;
        repo.update_stats(EntityKey::Pattern(id), &stats).unwrap();

        assert!(matches!(
            repo.delete_pattern(id),
            Err(RepositoryError::Referenced { kind: "pattern", .. })
        ));
        repo.deactivate_pattern(id).unwrap();
        assert!(!repo.pattern(id).unwrap().is_active);

        let unused = repo.save_rule(Rule::new("unused")).unwrap();
        repo.delete_rule(unused).unwrap();
        assert!(matches!(
            repo.rule(unused),
            Err(RepositoryError::NotFound { kind: "rule", .. })
        ));
    }

    #[test]
    fn test_json_catalog_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        let repo = JsonFileRepository::open(&path).unwrap();
        let id = repo
            .save_rule(Rule::new("weighted").with_condition(Condition::field("a", Operator::Equals, "x").with_weight(0.1 + 0.2)))
            .unwrap();
        repo.update_stats(EntityKey::Rule(id), &UsageStats::with_rate(0.825_660_781_5))
            .unwrap();

        let reopened = JsonFileRepository::open(&path).unwrap();
        let rule = reopened.rule(id).unwrap();
        assert_eq!(rule, repo.rule(id).unwrap());
        assert_eq!(rule.conditions[0].weight.to_bits(), (0.1_f64 + 0.2).to_bits());
        assert_eq!(rule.stats.success_rate, 0.825_660_781_5);
    }

    #[test]
    fn test_failed_write_keeps_memory_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");

        let repo = JsonFileRepository::open(&path).unwrap();
        let id = repo.save_rule(Rule::new("kept")).unwrap();
        let before = repo.inner.catalog();

        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("blocker"), "").unwrap();

        assert!(matches!(
            repo.update_stats(EntityKey::Rule(id), &UsageStats::with_rate(0.1)),
            Err(RepositoryError::Io(_))
        ));
        assert!(repo.save_rule(Rule::new("lost")).is_err());
        assert_eq!(repo.inner.catalog(), before);
        assert_eq!(repo.rule(id).unwrap().stats, before.rules[0].stats);
    }

    #[test]
    fn test_missing_entities() {
        let repo = InMemoryRepository::new();
        assert!(matches!(
            repo.update_stats(EntityKey::Rule(9), &UsageStats::default()),
            Err(RepositoryError::NotFound { kind: "rule", id: 9 })
        ));
    }
}
