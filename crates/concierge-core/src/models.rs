//! Core data models: documents, metadata, filters, and search queries.
//!
//! A [`Document`] is the unit stored in a [`VectorIndex`](crate::store::VectorIndex):
//! a piece of text plus a flat map of scalar metadata. Documents are
//! immutable once stored; the only way to remove them is a whole-index
//! reset.
//!
//! A [`Filter`] is a conjunction of field (in)equality predicates. It is the
//! single filter representation callers use; each backend translates it
//! into its own dialect (SQL `json_extract` predicates, or a client-side
//! post-filter).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Well-known metadata keys.
pub mod keys {
    pub const CATEGORY: &str = "category";
    pub const SOURCE: &str = "source";
    pub const CHUNK_INDEX: &str = "chunk_index";
    pub const START_INDEX: &str = "start_index";
    pub const USER_ID: &str = "user_id";
    pub const INFO_TYPE: &str = "info_type";
}

/// A scalar metadata value.
///
/// Serialized untagged, so metadata round-trips as a plain JSON object
/// (`{"category": "product", "chunk_index": 3}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            MetadataValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            MetadataValue::Int(i) => Some(*i as f64),
            MetadataValue::Float(f) => Some(*f),
            MetadataValue::Text(_) => None,
        }
    }

    /// Equality as a SQL engine sees it: text compares to text, and
    /// booleans, integers and floats compare numerically.
    pub fn matches(&self, other: &MetadataValue) -> bool {
        match (self, other) {
            (MetadataValue::Text(a), MetadataValue::Text(b)) => a == b,
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Int(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::Text(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        MetadataValue::Int(i)
    }
}

impl From<usize> for MetadataValue {
    fn from(i: usize) -> Self {
        MetadataValue::Int(i as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(x: f64) -> Self {
        MetadataValue::Float(x)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        MetadataValue::Bool(b)
    }
}

/// Ordered metadata map. `BTreeMap` keeps serialized output stable.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A stored unit of text with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// UUID assigned at creation.
    pub id: String,
    /// The text that is embedded and returned as evidence.
    pub content: String,
    /// Scalar metadata used for filtering (`category`, `source`, `user_id`, ...).
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Create a document with a fresh UUID and no metadata.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// Builder-style metadata setter.
    pub fn with_meta(mut self, key: &str, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.metadata.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// A document paired with the similarity score the backend assigned it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    pub document: Document,
    pub similarity: f32,
}

/// Comparison a [`Predicate`] applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    #[default]
    Eq,
    /// Holds when the field is absent or differs from the value.
    Ne,
}

/// A single `field = value` or `field != value` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    #[serde(default)]
    pub op: Op,
    pub value: MetadataValue,
}

impl Predicate {
    pub fn holds(&self, metadata: &Metadata) -> bool {
        let equal = metadata
            .get(&self.field)
            .map(|v| v.matches(&self.value))
            .unwrap_or(false);
        match self.op {
            Op::Eq => equal,
            Op::Ne => !equal,
        }
    }
}

/// Conjunction of predicates over document metadata.
///
/// An empty filter matches every document.
///
/// ```rust
/// use concierge_core::models::{Document, Filter};
///
/// let doc = Document::new("refund policy").with_meta("category", "service");
/// assert!(Filter::new().eq("category", "service").matches(&doc.metadata));
/// assert!(!Filter::new().eq("category", "product").matches(&doc.metadata));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter on `category = value`.
    pub fn category(value: &str) -> Self {
        Self::new().eq(crate::models::keys::CATEGORY, value)
    }

    /// Add a `field = value` predicate (ANDed with the existing ones).
    pub fn eq(self, field: &str, value: impl Into<MetadataValue>) -> Self {
        self.with(field, Op::Eq, value)
    }

    /// Add a `field != value` predicate. Documents without the field pass.
    pub fn ne(self, field: &str, value: impl Into<MetadataValue>) -> Self {
        self.with(field, Op::Ne, value)
    }

    fn with(mut self, field: &str, op: Op, value: impl Into<MetadataValue>) -> Self {
        self.predicates.push(Predicate {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// True when every predicate holds. A missing field never satisfies
    /// an equality predicate.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.predicates.iter().all(|p| p.holds(metadata))
    }
}

/// A retrieval request as the retrieval engine receives it.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    /// Restrict results to documents with this `category`.
    pub category: Option<String>,
    /// Number of results the caller wants. Must be positive.
    pub top_k: usize,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            category: None,
            top_k,
        }
    }

    pub fn in_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::InvalidArgument("top_k must be > 0".to_string()));
        }
        Ok(())
    }

    /// The metadata filter this query implies.
    pub fn filter(&self) -> Option<Filter> {
        self.category.as_deref().map(Filter::category)
    }
}
