//! The compiled set of active patterns across all suppliers.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{CompiledPattern, ExtractionResult, FieldExtractor, PatternMatcher};
use crate::error::CompileError;
use crate::models::{ExtractedField, FieldSet, FieldSource, Pattern};

/// Fields extracted from one document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentExtraction {
    /// Successfully extracted fields.
    pub fields: FieldSet,
    /// Every pattern application, hits and misses.
    pub results: Vec<ExtractionResult>,
}

/// Active compiled patterns, ordered for selection.
#[derive(Debug, Clone, Default)]
pub struct PatternLibrary {
    patterns: Vec<CompiledPattern>,
    rejected: Vec<(u64, CompileError)>,
}

impl PatternLibrary {
    /// Compile every active pattern. Patterns that fail to compile are
    /// left out and reported through [`PatternLibrary::rejected`].
    pub fn build(patterns: &[Pattern], matcher: &PatternMatcher) -> Self {
        let mut library = Self::default();

        for pattern in patterns.iter().filter(|p| p.is_active) {
            match matcher.compile(pattern) {
                Ok(compiled) => library.patterns.push(compiled),
                Err(e) => {
                    warn!("Pattern {} rejected: {}", pattern.id, e);
                    library.rejected.push((pattern.id, e));
                }
            }
        }

        library.patterns.sort_by(|a, b| rank(a.pattern(), b.pattern()));

        info!(
            "Loaded {} patterns ({} rejected)",
            library.patterns.len(),
            library.rejected.len()
        );
        library
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Patterns that failed to compile.
    pub fn rejected(&self) -> &[(u64, CompileError)] {
        &self.rejected
    }

    /// Candidate patterns for a supplier's field, best first.
    pub fn candidates<'a>(
        &'a self,
        supplier: &'a str,
        field_name: &'a str,
    ) -> impl Iterator<Item = &'a CompiledPattern> + 'a {
        self.patterns
            .iter()
            .filter(move |p| p.pattern().is_for_supplier(supplier) && p.field_name() == field_name)
    }

    /// Field names known for a supplier.
    pub fn fields_for(&self, supplier: &str) -> BTreeSet<String> {
        self.patterns
            .iter()
            .filter(|p| p.pattern().is_for_supplier(supplier))
            .map(|p| p.field_name().to_string())
            .collect()
    }

    /// Extract one field, trying candidates best first.
    ///
    /// Returns the first hit, or the last miss when every candidate misses;
    /// `None` when no pattern exists for the field.
    pub fn extract_field(
        &self,
        supplier: &str,
        field_name: &str,
        text: &str,
    ) -> Option<ExtractionResult> {
        let mut last_miss = None;
        for compiled in self.candidates(supplier, field_name) {
            let result = compiled.extract(text);
            if result.success {
                return Some(result);
            }
            last_miss = Some(result);
        }
        last_miss
    }

    /// Extract every field known for the supplier.
    pub fn extract_document(&self, supplier: &str, text: &str) -> DocumentExtraction {
        let mut extraction = DocumentExtraction::default();

        for field_name in self.fields_for(supplier) {
            for compiled in self.candidates(supplier, &field_name) {
                let result = compiled.extract(text);
                let hit = result.success;
                if let (true, Some(value)) = (hit, &result.value) {
                    extraction.fields.insert(
                        ExtractedField::new(&field_name, value, result.confidence)
                            .with_source(FieldSource::Pattern { id: compiled.id() }),
                    );
                }
                extraction.results.push(result);
                if hit {
                    break;
                }
            }
        }

        debug!(
            "Extracted {} of {} known fields for supplier `{}`",
            extraction.fields.len(),
            self.fields_for(supplier).len(),
            supplier
        );
        extraction
    }
}

/// Priority desc, success rate desc, id asc.
fn rank(a: &Pattern, b: &Pattern) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.stats.success_rate.total_cmp(&a.stats.success_rate))
        .then_with(|| a.id.cmp(&b.id))
}
