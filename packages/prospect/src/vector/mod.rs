//! Vector store gateway.
//!
//! One record per company id: the embedding vector plus a small declared
//! set of filterable scalar fields. Full profiles live in the document
//! store under the same id. Dimension is fixed at index creation and
//! validated on every upsert.

pub mod memory;

pub use memory::InMemoryVectorStore;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{PersistResult, PersistenceError};
use crate::types::CompanyId;

/// Hard cap on declared metadata fields per record.
pub const MAX_METADATA_FIELDS: usize = 16;

/// Hard cap on similarity edges kept in metadata.
pub const MAX_EDGE_REFS: usize = 50;

/// A scalar (or the one structured exception: the bounded edge list)
/// stored alongside a vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Number(f64),
    Flag(bool),
    Edges(Vec<EdgeRef>),
}

impl MetadataValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_edges(&self) -> Option<&[EdgeRef]> {
        match self {
            Self::Edges(edges) => Some(edges),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for MetadataValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Flag(b)
    }
}

/// A compact similarity reference embedded in metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeRef {
    pub target: CompanyId,
    pub score: f32,
}

/// The declared metadata schema: field names, bounded in count.
#[derive(Debug, Clone)]
pub struct MetadataSchema {
    fields: Vec<String>,
}

impl MetadataSchema {
    /// Declare a schema. Fails when more than the supported field count is
    /// requested.
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> PersistResult<Self> {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.len() > MAX_METADATA_FIELDS {
            return Err(PersistenceError::MetadataRejected {
                reason: format!(
                    "{} fields declared, at most {} supported",
                    fields.len(),
                    MAX_METADATA_FIELDS
                ),
            });
        }
        Ok(Self { fields })
    }

    /// The engine's standard company schema.
    pub fn company_default() -> Self {
        Self::new([
            "name",
            "industry",
            "business_model",
            "stage",
            "geographic_scope",
            "has_leadership",
            "services_count",
            "low_quality",
            "embedding_model",
            "updated_at",
            "similar",
        ])
        .expect("default schema is under the field cap")
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Validate a metadata map against this schema.
    pub fn validate(&self, metadata: &IndexMap<String, MetadataValue>) -> PersistResult<()> {
        if metadata.len() > MAX_METADATA_FIELDS {
            return Err(PersistenceError::MetadataRejected {
                reason: format!("{} fields written, cap is {}", metadata.len(), MAX_METADATA_FIELDS),
            });
        }
        for (field, value) in metadata {
            if !self.contains(field) {
                return Err(PersistenceError::MetadataRejected {
                    reason: format!("field \"{field}\" is not in the declared schema"),
                });
            }
            if let MetadataValue::Edges(edges) = value {
                if edges.len() > MAX_EDGE_REFS {
                    return Err(PersistenceError::MetadataRejected {
                        reason: format!(
                            "{} similarity edges, cap is {}",
                            edges.len(),
                            MAX_EDGE_REFS
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// One stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: CompanyId,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: IndexMap<String, MetadataValue>,
}

/// A conjunctive filter term over scalar metadata.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Field equals the value exactly.
    Eq(String, MetadataValue),

    /// Field is one of the values.
    In(String, Vec<MetadataValue>),
}

impl Filter {
    pub fn matches(&self, metadata: &IndexMap<String, MetadataValue>) -> bool {
        match self {
            Self::Eq(field, expected) => metadata.get(field) == Some(expected),
            Self::In(field, options) => metadata
                .get(field)
                .map(|v| options.contains(v))
                .unwrap_or(false),
        }
    }
}

/// A query hit.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub id: CompanyId,
    pub score: f32,
    pub metadata: IndexMap<String, MetadataValue>,
}

/// The gateway contract.
///
/// Results of [`VectorStore::query`] are ranked by cosine similarity
/// descending with ties broken by id order, so queries are deterministic.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The immutable index dimension.
    fn dimension(&self) -> usize;

    /// The declared metadata schema.
    fn schema(&self) -> &MetadataSchema;

    /// Insert or replace the record for an id.
    async fn upsert(&self, record: VectorRecord) -> PersistResult<()>;

    /// K nearest neighbors by cosine similarity, after filtering.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &[Filter],
    ) -> PersistResult<Vec<QueryMatch>>;

    /// Fetch one record by id.
    async fn fetch(&self, id: CompanyId) -> PersistResult<Option<VectorRecord>>;

    /// Delete a record. Deleting a missing id is not an error.
    async fn delete(&self, id: CompanyId) -> PersistResult<()>;

    /// Merge a metadata patch into an existing record.
    async fn update_metadata(
        &self,
        id: CompanyId,
        patch: IndexMap<String, MetadataValue>,
    ) -> PersistResult<()>;
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Insert an edge into a bounded edge list, newest-highest-score retained
/// on overflow. An existing entry for the same target is replaced.
pub fn push_edge(edges: &mut Vec<EdgeRef>, edge: EdgeRef, cap: usize) {
    edges.retain(|e| e.target != edge.target);
    edges.push(edge);
    edges.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    edges.truncate(cap);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_basics() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn schema_rejects_over_cap() {
        let fields: Vec<String> = (0..17).map(|i| format!("f{i}")).collect();
        assert!(MetadataSchema::new(fields).is_err());
    }

    #[test]
    fn schema_rejects_undeclared_field() {
        let schema = MetadataSchema::company_default();
        let mut metadata = IndexMap::new();
        metadata.insert("name".to_string(), MetadataValue::from("Acme"));
        assert!(schema.validate(&metadata).is_ok());

        metadata.insert("rogue_field".to_string(), MetadataValue::from(1.0));
        assert!(schema.validate(&metadata).is_err());
    }

    #[test]
    fn schema_rejects_oversized_edge_list() {
        let schema = MetadataSchema::company_default();
        let edges: Vec<EdgeRef> = (0..MAX_EDGE_REFS + 1)
            .map(|_| EdgeRef {
                target: CompanyId::new(),
                score: 0.8,
            })
            .collect();
        let mut metadata = IndexMap::new();
        metadata.insert("similar".to_string(), MetadataValue::Edges(edges));
        assert!(schema.validate(&metadata).is_err());
    }

    #[test]
    fn push_edge_bounds_and_replaces() {
        let target = CompanyId::new();
        let mut edges = Vec::new();
        for i in 0..10 {
            push_edge(
                &mut edges,
                EdgeRef {
                    target: CompanyId::new(),
                    score: 0.5 + (i as f32) * 0.01,
                },
                5,
            );
        }
        assert_eq!(edges.len(), 5);
        // Highest scores survived
        assert!(edges.iter().all(|e| e.score >= 0.55));

        push_edge(&mut edges, EdgeRef { target, score: 0.9 }, 5);
        push_edge(&mut edges, EdgeRef { target, score: 0.7 }, 5);
        let for_target: Vec<_> = edges.iter().filter(|e| e.target == target).collect();
        assert_eq!(for_target.len(), 1);
        assert_eq!(for_target[0].score, 0.7);
    }

    #[test]
    fn filters_match_conjunctively() {
        let mut metadata = IndexMap::new();
        metadata.insert("industry".to_string(), MetadataValue::from("biotechnology"));
        metadata.insert("low_quality".to_string(), MetadataValue::from(false));

        let eq = Filter::Eq("industry".into(), MetadataValue::from("biotechnology"));
        let within = Filter::In(
            "industry".into(),
            vec![MetadataValue::from("saas"), MetadataValue::from("biotechnology")],
        );
        let miss = Filter::Eq("industry".into(), MetadataValue::from("fintech"));

        assert!(eq.matches(&metadata));
        assert!(within.matches(&metadata));
        assert!(!miss.matches(&metadata));
    }
}
