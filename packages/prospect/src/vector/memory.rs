//! In-memory vector store.
//!
//! The reference implementation used by tests and single-process
//! deployments. Brute-force cosine ranking is fine at the scale one
//! process researches.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::error::{PersistResult, PersistenceError};
use crate::types::CompanyId;

use super::{
    cosine_similarity, Filter, MetadataSchema, MetadataValue, QueryMatch, VectorRecord,
    VectorStore,
};

/// In-memory [`VectorStore`].
pub struct InMemoryVectorStore {
    dimension: usize,
    schema: MetadataSchema,
    records: RwLock<HashMap<CompanyId, VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize, schema: MetadataSchema) -> Self {
        Self {
            dimension,
            schema,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// With the engine's standard company schema.
    pub fn with_default_schema(dimension: usize) -> Self {
        Self::new(dimension, MetadataSchema::company_default())
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn schema(&self) -> &MetadataSchema {
        &self.schema
    }

    async fn upsert(&self, record: VectorRecord) -> PersistResult<()> {
        if record.vector.len() != self.dimension {
            return Err(PersistenceError::DimensionMismatch {
                expected: self.dimension,
                actual: record.vector.len(),
            });
        }
        self.schema.validate(&record.metadata)?;

        self.records.write().unwrap().insert(record.id, record);
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &[Filter],
    ) -> PersistResult<Vec<QueryMatch>> {
        if vector.len() != self.dimension {
            return Err(PersistenceError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let records = self.records.read().unwrap();
        let mut matches: Vec<QueryMatch> = records
            .values()
            .filter(|r| filter.iter().all(|f| f.matches(&r.metadata)))
            .map(|r| QueryMatch {
                id: r.id,
                score: cosine_similarity(vector, &r.vector),
                metadata: r.metadata.clone(),
            })
            .collect();

        // Rank by similarity descending; ties break by id order so results
        // are deterministic.
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn fetch(&self, id: CompanyId) -> PersistResult<Option<VectorRecord>> {
        Ok(self.records.read().unwrap().get(&id).cloned())
    }

    async fn delete(&self, id: CompanyId) -> PersistResult<()> {
        self.records.write().unwrap().remove(&id);
        Ok(())
    }

    async fn update_metadata(
        &self,
        id: CompanyId,
        patch: IndexMap<String, MetadataValue>,
    ) -> PersistResult<()> {
        let mut records = self.records.write().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| PersistenceError::Backend(format!("no record for {id}")))?;

        let mut merged = record.metadata.clone();
        for (field, value) in patch {
            merged.insert(field, value);
        }
        self.schema.validate(&merged)?;
        record.metadata = merged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: CompanyId, vector: Vec<f32>, industry: &str) -> VectorRecord {
        let mut metadata = IndexMap::new();
        metadata.insert("industry".to_string(), MetadataValue::from(industry));
        VectorRecord {
            id,
            vector,
            metadata,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryVectorStore::with_default_schema(3);
        let id = CompanyId::new();

        store.upsert(record(id, vec![1.0, 0.0, 0.0], "biotech")).await.unwrap();
        store.upsert(record(id, vec![0.0, 1.0, 0.0], "biotech")).await.unwrap();

        assert_eq!(store.len(), 1);
        let fetched = store.fetch(id).await.unwrap().unwrap();
        assert_eq!(fetched.vector, vec![0.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn dimension_mismatch_rejected_with_no_partial_write() {
        let store = InMemoryVectorStore::with_default_schema(3);
        let err = store
            .upsert(record(CompanyId::new(), vec![1.0, 0.0], "biotech"))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::DimensionMismatch { expected: 3, actual: 2 }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn query_ranks_by_cosine_with_id_tiebreak() {
        let store = InMemoryVectorStore::with_default_schema(2);
        let close = CompanyId::new();
        let far = CompanyId::new();
        store.upsert(record(close, vec![1.0, 0.1], "saas")).await.unwrap();
        store.upsert(record(far, vec![0.1, 1.0], "saas")).await.unwrap();

        let matches = store.query(&[1.0, 0.0], 10, &[]).await.unwrap();
        assert_eq!(matches[0].id, close);
        assert!(matches[0].score > matches[1].score);

        // Identical vectors tie; ordering must be by id
        let a = CompanyId::new();
        let b = CompanyId::new();
        store.upsert(record(a, vec![0.5, 0.5], "tie")).await.unwrap();
        store.upsert(record(b, vec![0.5, 0.5], "tie")).await.unwrap();
        let tied = store
            .query(&[0.5, 0.5], 2, &[Filter::Eq("industry".into(), "tie".into())])
            .await
            .unwrap();
        let expected_first = a.min(b);
        assert_eq!(tied[0].id, expected_first);
    }

    #[tokio::test]
    async fn filters_restrict_results() {
        let store = InMemoryVectorStore::with_default_schema(2);
        store
            .upsert(record(CompanyId::new(), vec![1.0, 0.0], "biotech"))
            .await
            .unwrap();
        store
            .upsert(record(CompanyId::new(), vec![1.0, 0.0], "fintech"))
            .await
            .unwrap();

        let matches = store
            .query(&[1.0, 0.0], 10, &[Filter::Eq("industry".into(), "biotech".into())])
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].metadata["industry"], MetadataValue::from("biotech"));
    }

    #[tokio::test]
    async fn metadata_patch_merges_and_validates() {
        let store = InMemoryVectorStore::with_default_schema(2);
        let id = CompanyId::new();
        store.upsert(record(id, vec![1.0, 0.0], "biotech")).await.unwrap();

        let mut patch = IndexMap::new();
        patch.insert("low_quality".to_string(), MetadataValue::from(true));
        store.update_metadata(id, patch).await.unwrap();

        let fetched = store.fetch(id).await.unwrap().unwrap();
        assert_eq!(fetched.metadata["industry"], MetadataValue::from("biotech"));
        assert_eq!(fetched.metadata["low_quality"], MetadataValue::from(true));

        let mut bad_patch = IndexMap::new();
        bad_patch.insert("undeclared".to_string(), MetadataValue::from(1.0));
        assert!(store.update_metadata(id, bad_patch).await.is_err());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryVectorStore::with_default_schema(2);
        let id = CompanyId::new();
        store.upsert(record(id, vec![1.0, 0.0], "biotech")).await.unwrap();
        store.delete(id).await.unwrap();
        store.delete(id).await.unwrap();
        assert!(store.fetch(id).await.unwrap().is_none());
    }
}
