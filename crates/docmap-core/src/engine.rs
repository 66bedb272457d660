//! The mapping engine: one document in, field mappings out.
//!
//! Evaluation runs against an immutable [`Snapshot`] of compiled patterns
//! and rules, so any number of documents can be processed in parallel.
//! Only [`MappingEngine::commit`] touches shared mutable state.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CompileError, Result};
use crate::extraction::{DocumentExtraction, ExtractionResult, PatternLearner, PatternLibrary, PatternMatcher};
use crate::models::{
    DocumentContext, EngineConfig, FieldMapping, FieldSet, FieldSource, Pattern, Rule, SemanticType, UsageStats,
};
use crate::registry::Registry;
use crate::repository::RuleRepository;
use crate::rules::{
    ActionExecutor, ActionReport, CompiledRule, EvaluationContext, RuleEvaluation, RuleSelector, Selection,
    Transformer,
};
use crate::scoring::{AdaptiveScorer, EntityKey, ScoreLedger};

/// One document to map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Document {
    /// Caller's identifier, echoed in the outcome.
    pub id: String,
    pub context: DocumentContext,
    /// Raw text for pattern extraction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Fields supplied by an external extraction step.
    pub fields: FieldSet,
}

/// Everything that happened to one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub document_id: String,
    /// Fields available to the rules: supplied fields plus pattern hits.
    pub fields: FieldSet,
    pub extraction: Vec<ExtractionResult>,
    /// Applicable rules, ranked.
    pub selected: Vec<RuleEvaluation>,
    /// Rules that did not apply.
    pub rejected: Vec<RuleEvaluation>,
    /// Ids of the rules whose actions ran.
    pub applied_rules: Vec<u64>,
    pub mappings: Vec<FieldMapping>,
    pub reports: Vec<ActionReport>,
    pub warnings: Vec<String>,
    /// Manual review needed: no rule applied, a required action failed or
    /// the document timed out.
    pub needs_review: bool,
    /// The document ran past its time limit and was given up.
    pub abandoned: bool,
    pub elapsed_us: u64,
}

impl DocumentOutcome {
    /// Confirmations for every applied rule and every pattern whose value
    /// was used, all with the same verdict.
    pub fn confirmations(&self, success: bool) -> Vec<Confirmation> {
        let rules = self.applied_rules.iter().map(|id| EntityKey::Rule(*id));
        let patterns = self.fields.iter().filter_map(|f| match f.source {
            FieldSource::Pattern { id } => Some(EntityKey::Pattern(id)),
            _ => None,
        });
        rules
            .chain(patterns)
            .map(|key| Confirmation { key, success })
            .collect()
    }
}

/// A user's verdict on one pattern or rule application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub key: EntityKey,
    pub success: bool,
}

/// Compiled patterns and rules shared by concurrent evaluations.
#[derive(Debug, Default)]
pub struct Snapshot {
    rules: Vec<CompiledRule>,
    patterns: PatternLibrary,
    rejected_rules: Vec<(u64, CompileError)>,
}

impl Snapshot {
    /// Compile every active pattern and rule. Anything that fails to
    /// compile is left out and reported.
    pub fn build(patterns: &[Pattern], rules: &[Rule], matcher: &PatternMatcher, registry: &Registry) -> Self {
        let library = PatternLibrary::build(patterns, matcher);

        let mut compiled = Vec::new();
        let mut rejected_rules = Vec::new();
        for rule in rules.iter().filter(|r| r.is_active) {
            match CompiledRule::compile(rule, registry) {
                Ok(rule) => compiled.push(rule),
                Err(e) => {
                    warn!("Rule {} `{}` rejected: {}", rule.id, rule.name, e);
                    rejected_rules.push((rule.id, e));
                }
            }
        }
        info!("Loaded {} rules ({} rejected)", compiled.len(), rejected_rules.len());

        Self {
            rules: compiled,
            patterns: library,
            rejected_rules,
        }
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn rule(&self, id: u64) -> Option<&CompiledRule> {
        self.rules.iter().find(|r| r.id() == id)
    }

    pub fn patterns(&self) -> &PatternLibrary {
        &self.patterns
    }

    pub fn rejected_rules(&self) -> &[(u64, CompileError)] {
        &self.rejected_rules
    }
}

/// Aggregate figures over the loaded rule set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatistics {
    pub active_rule_count: usize,
    pub active_pattern_count: usize,
    /// Recorded rule applications.
    pub total_applications: u64,
    /// Usage-weighted mean success rate of the rules.
    pub overall_success_rate: f64,
    /// Mean processing time per document, in milliseconds.
    pub average_execution_ms: f64,
    pub documents_processed: u64,
    pub top_rules: Vec<RuleSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSummary {
    pub id: u64,
    pub name: String,
    pub success_rate: f64,
    pub usage_count: u64,
}

impl EngineStatistics {
    /// Rule figures from stored rules; document timings stay zero.
    pub fn from_rules(rules: &[Rule], top_n: usize) -> Self {
        let active: Vec<&Rule> = rules.iter().filter(|r| r.is_active).collect();
        let total_applications: u64 = active.iter().map(|r| r.stats.usage_count).sum();
        let overall_success_rate = if total_applications > 0 {
            active
                .iter()
                .map(|r| r.stats.success_rate * r.stats.usage_count as f64)
                .sum::<f64>()
                / total_applications as f64
        } else {
            0.0
        };

        let mut top: Vec<&Rule> = active.clone();
        top.sort_by(|a, b| {
            b.stats
                .success_rate
                .total_cmp(&a.stats.success_rate)
                .then_with(|| b.stats.usage_count.cmp(&a.stats.usage_count))
                .then_with(|| a.id.cmp(&b.id))
        });
        let top_rules = top
            .into_iter()
            .take(top_n)
            .map(|r| RuleSummary {
                id: r.id,
                name: r.name.clone(),
                success_rate: r.stats.success_rate,
                usage_count: r.stats.usage_count,
            })
            .collect();

        Self {
            active_rule_count: active.len(),
            total_applications,
            overall_success_rate,
            top_rules,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct ProcessingLog {
    documents: AtomicU64,
    total_us: AtomicU64,
}

impl ProcessingLog {
    fn record(&self, elapsed_us: u64) {
        self.documents.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(elapsed_us, Ordering::Relaxed);
    }
}

/// Extracts, selects and maps documents against a loaded rule set.
#[derive(Debug)]
pub struct MappingEngine {
    config: EngineConfig,
    registry: Registry,
    matcher: PatternMatcher,
    selector: RuleSelector,
    executor: ActionExecutor,
    snapshot: RwLock<Arc<Snapshot>>,
    ledger: ScoreLedger,
    log: ProcessingLog,
}

impl MappingEngine {
    /// An engine with nothing loaded.
    pub fn new(config: EngineConfig, registry: Registry) -> Result<Self> {
        config.validate()?;
        let scorer = AdaptiveScorer::from_config(&config.scoring);
        Ok(Self {
            matcher: PatternMatcher::new(config.matching.clone()),
            selector: RuleSelector::new(&config.evaluation),
            executor: ActionExecutor::new(Transformer::new(config.transforms.clone(), registry.clone())),
            ledger: ScoreLedger::new(scorer, config.scoring.initial_success_rate),
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            log: ProcessingLog::default(),
            registry,
            config,
        })
    }

    /// An engine loaded from a repository.
    pub fn from_repository(repository: &dyn RuleRepository, config: EngineConfig, registry: Registry) -> Result<Self> {
        let engine = Self::new(config, registry)?;
        engine.reload(repository)?;
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Replace the loaded patterns and rules.
    pub fn load(&self, patterns: &[Pattern], rules: &[Rule]) {
        let snapshot = Snapshot::build(patterns, rules, &self.matcher, &self.registry);
        for pattern in patterns {
            self.ledger.seed(EntityKey::Pattern(pattern.id), pattern.stats.clone());
        }
        for rule in rules {
            self.ledger.seed(EntityKey::Rule(rule.id), rule.stats.clone());
        }
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }

    /// Re-read patterns and rules from the repository.
    pub fn reload(&self, repository: &dyn RuleRepository) -> Result<()> {
        let patterns = repository.patterns()?;
        let rules = repository.rules()?;
        self.load(&patterns, &rules);
        Ok(())
    }

    /// The current snapshot. Later reloads do not affect it.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Current statistics of a pattern or rule.
    pub fn stats(&self, key: EntityKey) -> Option<UsageStats> {
        self.ledger.get(key)
    }

    /// Extract every field known for the supplier from raw text.
    pub fn extract(&self, supplier: &str, text: &str) -> DocumentExtraction {
        self.snapshot().patterns().extract_document(supplier, text)
    }

    /// Learn a pattern from an example value; the pattern is returned,
    /// not stored.
    pub fn teach(
        &self,
        supplier: &str,
        field_name: &str,
        text: &str,
        example: &str,
        semantic_type: SemanticType,
    ) -> Result<Pattern> {
        let learner = PatternLearner::new(self.matcher.clone(), self.config.scoring.initial_success_rate);
        Ok(learner.learn(supplier, field_name, text, example, semantic_type)?)
    }

    /// Evaluate every loaded rule without executing actions.
    pub fn evaluate(&self, context: &DocumentContext, fields: &FieldSet) -> Selection {
        let snapshot = self.snapshot();
        let mut selection = self
            .selector
            .evaluate_all(snapshot.rules(), &EvaluationContext::new(context, fields));
        self.refresh_rates(&mut selection);
        selection
    }

    /// Process one document: extract, select, execute.
    ///
    /// Per-action failures and misses are reported in the outcome; an
    /// action dependency cycle aborts with an error.
    pub fn process(&self, document: &Document) -> Result<DocumentOutcome> {
        let start = Instant::now();
        let deadline = match self.config.evaluation.document_timeout_ms {
            0 => None,
            ms => Some(start + Duration::from_millis(ms)),
        };
        let snapshot = self.snapshot();

        let mut outcome = DocumentOutcome {
            document_id: document.id.clone(),
            fields: document.fields.clone(),
            ..Default::default()
        };

        if let (Some(text), Some(supplier)) = (&document.text, &document.context.supplier) {
            let extraction = snapshot.patterns().extract_document(supplier, text);
            for field in extraction.fields.iter() {
                if !outcome.fields.contains(&field.name) {
                    outcome.fields.insert(field.clone());
                }
            }
            for result in extraction.results.iter().filter(|r| r.timed_out) {
                outcome
                    .warnings
                    .push(format!("pattern {} timed out on `{}`", result.pattern_id, result.field_name));
            }
            outcome.extraction = extraction.results;
        }

        let mut context = document.context.clone();
        context.available_fields.extend(outcome.fields.names());
        let evaluation_context = EvaluationContext::new(&context, &outcome.fields);

        let selection = match deadline {
            Some(deadline) => self.selector.evaluate_until(snapshot.rules(), &evaluation_context, deadline),
            None => Some(self.selector.evaluate_all(snapshot.rules(), &evaluation_context)),
        };
        let Some(mut selection) = selection else {
            return Ok(self.abandon(outcome, start));
        };
        self.refresh_rates(&mut selection);

        let chosen: Vec<u64> = selection.chosen().iter().map(|e| e.rule_id).collect();
        outcome.selected = selection.ranked;
        outcome.rejected = selection.rejected;

        let mut mappings: Vec<FieldMapping> = Vec::new();
        let mut reports = Vec::new();
        let mut needs_review = chosen.is_empty();
        for rule_id in chosen {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(self.abandon(outcome, start));
            }
            let Some(rule) = snapshot.rule(rule_id) else {
                continue;
            };

            let report = self.executor.execute(rule, &context, &outcome.fields)?;
            for mapping in &report.mappings {
                if let Some(previous) = mappings.iter().find(|m| m.target_location == mapping.target_location) {
                    outcome.warnings.push(format!(
                        "rule {} overwrites `{}` previously written by rule {}",
                        rule.id(),
                        mapping.target_location,
                        previous.rule_id
                    ));
                    mappings.retain(|m| m.target_location != mapping.target_location);
                }
                mappings.push(mapping.clone());
            }
            needs_review |= report.has_hard_failure();
            outcome.warnings.extend(report.warnings.iter().cloned());
            outcome.applied_rules.push(rule.id());
            reports.push(report);
        }

        outcome.mappings = mappings;
        outcome.reports = reports;
        outcome.needs_review = needs_review;
        outcome.elapsed_us = start.elapsed().as_micros() as u64;
        self.log.record(outcome.elapsed_us);

        debug!(
            "Document `{}`: {} rules applied, {} mappings{}",
            outcome.document_id,
            outcome.applied_rules.len(),
            outcome.mappings.len(),
            if outcome.needs_review { ", needs review" } else { "" }
        );
        Ok(outcome)
    }

    /// Process documents on `jobs` worker threads. Results keep the input
    /// order.
    pub fn process_batch(&self, documents: &[Document], jobs: usize) -> Vec<Result<DocumentOutcome>> {
        let jobs = jobs.clamp(1, documents.len().max(1));
        let next = AtomicUsize::new(0);

        let mut indexed: Vec<(usize, Result<DocumentOutcome>)> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..jobs)
                .map(|_| {
                    scope.spawn(|| {
                        let mut done = Vec::new();
                        loop {
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(document) = documents.get(i) else {
                                break;
                            };
                            done.push((i, self.process(document)));
                        }
                        done
                    })
                })
                .collect();

            let mut all = Vec::with_capacity(documents.len());
            for worker in workers {
                match worker.join() {
                    Ok(done) => all.extend(done),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            all
        });

        indexed.sort_by_key(|(i, _)| *i);
        indexed.into_iter().map(|(_, result)| result).collect()
    }

    /// Record confirmed outcomes and persist the updated statistics.
    ///
    /// Each entity's update and write happen under that entity's lock.
    /// An entity whose write fails keeps its previous statistics, and
    /// the error stops the remaining confirmations.
    pub fn commit(
        &self,
        repository: &dyn RuleRepository,
        confirmations: &[Confirmation],
    ) -> Result<Vec<(EntityKey, UsageStats)>> {
        let mut updated = Vec::with_capacity(confirmations.len());
        for confirmation in confirmations {
            let key = confirmation.key;
            let stats = self
                .ledger
                .try_record(key, confirmation.success, |stats| repository.update_stats(key, stats))?;
            updated.push((key, stats));
        }
        info!("Committed {} outcomes", updated.len());
        Ok(updated)
    }

    /// Aggregate statistics with live rates.
    pub fn statistics(&self, top_n: usize) -> EngineStatistics {
        let snapshot = self.snapshot();
        let rules: Vec<Rule> = snapshot
            .rules()
            .iter()
            .map(|compiled| {
                let mut rule = compiled.rule().clone();
                if let Some(stats) = self.ledger.get(EntityKey::Rule(rule.id)) {
                    rule.stats = stats;
                }
                rule
            })
            .collect();

        let documents = self.log.documents.load(Ordering::Relaxed);
        let total_us = self.log.total_us.load(Ordering::Relaxed);
        EngineStatistics {
            active_pattern_count: snapshot.patterns().len(),
            documents_processed: documents,
            average_execution_ms: if documents > 0 {
                total_us as f64 / documents as f64 / 1000.0
            } else {
                0.0
            },
            ..EngineStatistics::from_rules(&rules, top_n)
        }
    }

    fn refresh_rates(&self, selection: &mut Selection) {
        selection.rerank(|id| self.ledger.get(EntityKey::Rule(id)).map(|s| s.success_rate));
    }

    fn abandon(&self, mut outcome: DocumentOutcome, start: Instant) -> DocumentOutcome {
        warn!("Document `{}` abandoned after timeout", outcome.document_id);
        outcome.mappings.clear();
        outcome.applied_rules.clear();
        outcome.needs_review = true;
        outcome.abandoned = true;
        outcome.warnings.push("document timed out and needs manual review".to_string());
        outcome.elapsed_us = start.elapsed().as_micros() as u64;
        self.log.record(outcome.elapsed_us);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Action, ActionKind, Condition, ConditionKind, ExtractedField, Operator, SelectionMode,
    };
    use crate::repository::InMemoryRepository;
    use crate::error::{ActionError, DocmapError, RepositoryError};
    use pretty_assertions::assert_eq;

    const TEXT: &str = "ACME Supplies Ltd\nInvoice No: INV-2024-001\nAccount Number: 1234567890\nTotal: 1,250.00";

    fn repository() -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        repo.save_pattern(
            Pattern::new("ACME", "account_number", r"Account\s*(?:Number|#)?:?\s*(\d{10})")
                .with_type(SemanticType::Identifier)
                .with_success_rate(0.9),
        )
        .unwrap();
        repo.save_pattern(Pattern::new("ACME", "total", r"Total:\s*(?P<value>[\d,.]+)").with_type(SemanticType::Currency))
            .unwrap();

        repo.save_rule(
            Rule::new("acme invoice")
                .with_priority(1)
                .with_success_rate(0.94)
                .with_condition(Condition::new(ConditionKind::Supplier, Operator::Equals, "acme").required())
                .with_condition(Condition::field("total", Operator::GreaterThan, "1000"))
                .with_action(Action::direct("account_number", "B2"))
                .with_action(
                    Action::new(ActionKind::Transform, "total", "B3")
                        .with_transformation("currency:USD")
                        .with_order(1),
                ),
        )
        .unwrap();
        repo.save_rule(
            Rule::new("generic invoice")
                .with_priority(1)
                .with_success_rate(0.80)
                .with_condition(Condition::field("total", Operator::IsNotEmpty, ""))
                .with_action(Action::direct("total", "B3")),
        )
        .unwrap();
        repo
    }

    fn document() -> Document {
        Document {
            id: "doc-1".to_string(),
            context: DocumentContext::new().with_supplier("Acme").with_document_type("invoice"),
            text: Some(TEXT.to_string()),
            fields: FieldSet::new(),
        }
    }

    fn engine(config: EngineConfig) -> (MappingEngine, InMemoryRepository) {
        let repo = repository();
        let engine = MappingEngine::from_repository(&repo, config, Registry::new()).unwrap();
        (engine, repo)
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MappingEngine>();
    }

    #[test]
    fn test_process_best_only() {
        let (engine, _) = engine(EngineConfig::default());
        let outcome = engine.process(&document()).unwrap();

        assert_eq!(outcome.fields.value("account_number"), Some("1234567890"));
        assert_eq!(outcome.applied_rules, vec![1]);
        let mapped: Vec<(&str, &str)> = outcome
            .mappings
            .iter()
            .map(|m| (m.target_location.as_str(), m.value.as_str()))
            .collect();
        assert_eq!(mapped, vec![("B2", "1234567890"), ("B3", "$1,250.00")]);
        assert_eq!(outcome.selected.len(), 2);
        assert!(!outcome.needs_review);
    }

    #[test]
    fn test_supplied_fields_win_over_patterns() {
        let (engine, _) = engine(EngineConfig::default());
        let mut doc = document();
        doc.fields.insert(ExtractedField::new("account_number", "9999999999", 1.0));

        let outcome = engine.process(&doc).unwrap();
        assert_eq!(outcome.fields.value("account_number"), Some("9999999999"));
        assert_eq!(outcome.mappings[0].value, "9999999999");
    }

    #[test]
    fn test_all_applicable_last_writer_wins() {
        let mut config = EngineConfig::default();
        config.evaluation.selection_mode = SelectionMode::AllApplicable;
        let (engine, _) = engine(config);

        let outcome = engine.process(&document()).unwrap();
        assert_eq!(outcome.applied_rules, vec![1, 2]);
        let b3: Vec<&FieldMapping> = outcome.mappings.iter().filter(|m| m.target_location == "B3").collect();
        assert_eq!(b3.len(), 1);
        assert_eq!(b3[0].rule_id, 2);
        assert_eq!(b3[0].value, "1,250.00");
        assert!(outcome.warnings.iter().any(|w| w.contains("overwrites `B3`")));
    }

    #[test]
    fn test_no_applicable_rule_needs_review() {
        let (engine, _) = engine(EngineConfig::default());
        let doc = Document {
            id: "empty".to_string(),
            context: DocumentContext::new().with_supplier("Globex"),
            text: Some("nothing to see".to_string()),
            fields: FieldSet::new(),
        };
        let outcome = engine.process(&doc).unwrap();
        assert!(outcome.applied_rules.is_empty());
        assert!(outcome.needs_review);
    }

    #[test]
    fn test_document_past_deadline_is_abandoned() {
        let mut config = EngineConfig::default();
        config.evaluation.document_timeout_ms = 1;
        let (engine, _) = engine(config);
        let doc = Document {
            text: Some(format!("{}\n", TEXT).repeat(20_000)),
            ..document()
        };

        let outcome = engine.process(&doc).unwrap();
        assert!(outcome.abandoned);
        assert!(outcome.needs_review);
        assert!(outcome.mappings.is_empty());
        assert!(outcome.applied_rules.is_empty());
        assert!(outcome.warnings.iter().any(|w| w.contains("timed out")));
    }

    #[test]
    fn test_action_cycle_aborts_document() {
        let repo = InMemoryRepository::new();
        repo.save_rule(
            Rule::new("loop")
                .with_action(Action::direct("b", "X1").with_output("a"))
                .with_action(Action::direct("a", "X2").with_output("b")),
        )
        .unwrap();
        let engine = MappingEngine::from_repository(&repo, EngineConfig::default(), Registry::new()).unwrap();

        let err = engine.process(&Document::default()).unwrap_err();
        assert!(matches!(
            err,
            DocmapError::Action(ActionError::CycleDetected { rule_id: 1, .. })
        ));
    }

    #[test]
    fn test_invalid_rules_are_not_loaded() {
        let repo = repository();
        repo.save_rule(
            Rule::new("broken").with_condition(Condition::field("a", Operator::Matches, "(unclosed")),
        )
        .unwrap();
        let engine = MappingEngine::from_repository(&repo, EngineConfig::default(), Registry::new()).unwrap();

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.rules().len(), 2);
        assert_eq!(snapshot.rejected_rules().len(), 1);
        assert_eq!(snapshot.rejected_rules()[0].0, 3);
    }

    #[test]
    fn test_commit_updates_ledger_and_repository() {
        let (engine, repo) = engine(EngineConfig::default());
        let outcome = engine.process(&document()).unwrap();
        let confirmations = outcome.confirmations(true);
        assert!(confirmations.contains(&Confirmation {
            key: EntityKey::Rule(1),
            success: true
        }));
        assert!(confirmations.contains(&Confirmation {
            key: EntityKey::Pattern(1),
            success: true
        }));

        engine.commit(&repo, &confirmations).unwrap();
        let stored = repo.rule(1).unwrap();
        assert_eq!(stored.stats.usage_count, 1);
        assert!((stored.stats.success_rate - 0.946).abs() < 1e-9);
        assert_eq!(engine.stats(EntityKey::Rule(1)), Some(stored.stats));
        assert_eq!(repo.pattern(1).unwrap().stats.success_count, 1);
    }

    #[test]
    fn test_failed_commit_leaves_ledger_unchanged() {
        let (engine, repo) = engine(EngineConfig::default());
        let before = engine.stats(EntityKey::Rule(2));
        repo.delete_rule(2).unwrap();

        let err = engine
            .commit(
                &repo,
                &[
                    Confirmation {
                        key: EntityKey::Rule(2),
                        success: false,
                    },
                    Confirmation {
                        key: EntityKey::Rule(1),
                        success: true,
                    },
                ],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            DocmapError::Repository(RepositoryError::NotFound { kind: "rule", id: 2 })
        ));
        assert_eq!(engine.stats(EntityKey::Rule(2)), before);
        assert_eq!(engine.stats(EntityKey::Rule(1)).unwrap().usage_count, 0);
        assert_eq!(repo.rule(1).unwrap().stats.usage_count, 0);

        let unknown = Confirmation {
            key: EntityKey::Rule(42),
            success: true,
        };
        assert!(engine.commit(&repo, &[unknown]).is_err());
        assert_eq!(engine.stats(EntityKey::Rule(42)), None);
        assert_eq!(engine.statistics(0).total_applications, 0);
    }

    #[test]
    fn test_committed_rates_change_ranking() {
        let (engine, repo) = engine(EngineConfig::default());
        let failures: Vec<Confirmation> = (0..5)
            .map(|_| Confirmation {
                key: EntityKey::Rule(1),
                success: false,
            })
            .collect();
        engine.commit(&repo, &failures).unwrap();

        let outcome = engine.process(&document()).unwrap();
        assert_eq!(outcome.applied_rules, vec![2]);
    }

    #[test]
    fn test_statistics() {
        let (engine, repo) = engine(EngineConfig::default());
        engine.process(&document()).unwrap();
        engine
            .commit(
                &repo,
                &[
                    Confirmation {
                        key: EntityKey::Rule(1),
                        success: true,
                    },
                    Confirmation {
                        key: EntityKey::Rule(2),
                        success: false,
                    },
                ],
            )
            .unwrap();

        let stats = engine.statistics(1);
        assert_eq!(stats.active_rule_count, 2);
        assert_eq!(stats.active_pattern_count, 2);
        assert_eq!(stats.total_applications, 2);
        assert_eq!(stats.documents_processed, 1);
        assert!((stats.overall_success_rate - (0.946 + 0.72) / 2.0).abs() < 1e-9);
        assert_eq!(stats.top_rules.len(), 1);
        assert_eq!(stats.top_rules[0].id, 1);
    }

    #[test]
    fn test_batch_keeps_order() {
        let (engine, _) = engine(EngineConfig::default());
        let documents: Vec<Document> = (0..12)
            .map(|i| Document {
                id: format!("doc-{}", i),
                ..document()
            })
            .collect();

        let outcomes = engine.process_batch(&documents, 4);
        let ids: Vec<String> = outcomes
            .into_iter()
            .map(|r| r.unwrap().document_id)
            .collect();
        let expected: Vec<String> = (0..12).map(|i| format!("doc-{}", i)).collect();
        assert_eq!(ids, expected);
        assert_eq!(engine.statistics(0).documents_processed, 12);
    }

    #[test]
    fn test_teach_then_extract() {
        let engine = MappingEngine::new(EngineConfig::default(), Registry::new()).unwrap();
        let pattern = engine
            .teach("ACME", "invoice_number", TEXT, "INV-2024-001", SemanticType::Identifier)
            .unwrap();

        engine.load(&[Pattern { id: 1, ..pattern }], &[]);
        let extraction = engine.extract("acme", TEXT);
        assert_eq!(extraction.fields.value("invoice_number"), Some("INV-2024-001"));
    }
}
