//! Document-side inputs: classification context and extracted fields.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Classification of the document and its destination template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentContext {
    pub supplier: Option<String>,
    pub document_type: Option<String>,
    pub template_pattern: Option<String>,
    pub template_category: Option<String>,
    /// Names of the fields the extraction step produced.
    pub available_fields: BTreeSet<String>,
}

impl DocumentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_supplier(mut self, supplier: impl Into<String>) -> Self {
        self.supplier = Some(supplier.into());
        self
    }

    pub fn with_document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }

    pub fn with_template(mut self, pattern: impl Into<String>, category: impl Into<String>) -> Self {
        self.template_pattern = Some(pattern.into());
        self.template_category = Some(category.into());
        self
    }
}

/// Where an extracted field came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldSource {
    /// Produced by a learned pattern.
    Pattern { id: u64 },
    /// Supplied by an external extraction subsystem.
    #[default]
    External,
    /// Produced by an earlier action in the same batch.
    Action { id: u64 },
}

/// One extracted field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedField {
    pub name: String,
    pub value: String,
    /// Extraction confidence (0.0 - 1.0).
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub source: FieldSource,
}

fn default_confidence() -> f64 {
    1.0
}

impl ExtractedField {
    pub fn new(name: impl Into<String>, value: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source: FieldSource::External,
        }
    }

    pub fn with_source(mut self, source: FieldSource) -> Self {
        self.source = source;
        self
    }

    /// Whether the value is blank after trimming.
    pub fn is_blank(&self) -> bool {
        self.value.trim().is_empty()
    }
}

/// Extracted fields of one document, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldSet {
    fields: BTreeMap<String, ExtractedField>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, field: ExtractedField) {
        self.fields.insert(field.name.clone(), field);
    }

    pub fn get(&self, name: &str) -> Option<&ExtractedField> {
        self.fields.get(name)
    }

    /// Value of a field, if present.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|f| f.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtractedField> {
        self.fields.values()
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.fields.keys().cloned().collect()
    }
}

impl FromIterator<ExtractedField> for FieldSet {
    fn from_iter<I: IntoIterator<Item = ExtractedField>>(iter: I) -> Self {
        let mut set = FieldSet::new();
        for field in iter {
            set.insert(field);
        }
        set
    }
}

impl Extend<ExtractedField> for FieldSet {
    fn extend<I: IntoIterator<Item = ExtractedField>>(&mut self, iter: I) {
        for field in iter {
            self.insert(field);
        }
    }
}
