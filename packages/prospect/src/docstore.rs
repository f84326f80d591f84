//! Document store for full company profiles.
//!
//! The vector index only carries filterable scalars; the complete profile
//! and provenance live here as schemaless JSON-shaped documents keyed by
//! the same company id.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::PersistResult;
use crate::types::{Company, CompanyId};

/// Full-profile persistence contract.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the document for a company.
    async fn put(&self, company: &Company) -> PersistResult<()>;

    /// Fetch by id.
    async fn get(&self, id: CompanyId) -> PersistResult<Option<Company>>;

    /// Fetch by canonical (name, website) key.
    async fn find_by_canonical(&self, key: &str) -> PersistResult<Option<Company>>;

    /// Delete by id. Missing ids are not an error.
    async fn delete(&self, id: CompanyId) -> PersistResult<()>;
}

/// In-memory [`DocumentStore`] with a canonical-key index.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    inner: RwLock<Docs>,
}

#[derive(Default)]
struct Docs {
    by_id: HashMap<CompanyId, Company>,
    by_canonical: HashMap<String, CompanyId>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn put(&self, company: &Company) -> PersistResult<()> {
        let mut docs = self.inner.write().unwrap();
        docs.by_canonical.insert(company.canonical_key(), company.id);
        docs.by_id.insert(company.id, company.clone());
        Ok(())
    }

    async fn get(&self, id: CompanyId) -> PersistResult<Option<Company>> {
        Ok(self.inner.read().unwrap().by_id.get(&id).cloned())
    }

    async fn find_by_canonical(&self, key: &str) -> PersistResult<Option<Company>> {
        let docs = self.inner.read().unwrap();
        Ok(docs
            .by_canonical
            .get(key)
            .and_then(|id| docs.by_id.get(id))
            .cloned())
    }

    async fn delete(&self, id: CompanyId) -> PersistResult<()> {
        let mut docs = self.inner.write().unwrap();
        if let Some(company) = docs.by_id.remove(&id) {
            docs.by_canonical.remove(&company.canonical_key());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompanyProfile, Provenance};

    fn company(name: &str, website: &str) -> Company {
        Company {
            id: CompanyId::new(),
            name: name.to_string(),
            website: website.to_string(),
            profile: CompanyProfile::default(),
            embedding_text: format!("{name}."),
            embedding: vec![0.0; 4],
            low_quality: false,
            provenance: Provenance::default(),
        }
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let store = InMemoryDocumentStore::new();
        let c = company("Acme", "https://acme.com");
        store.put(&c).await.unwrap();

        let fetched = store.get(c.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Acme");
    }

    #[tokio::test]
    async fn canonical_lookup_survives_replacement() {
        let store = InMemoryDocumentStore::new();
        let mut c = company("Acme", "https://acme.com");
        store.put(&c).await.unwrap();

        c.low_quality = true;
        store.put(&c).await.unwrap();

        let found = store
            .find_by_canonical(&c.canonical_key())
            .await
            .unwrap()
            .unwrap();
        assert!(found.low_quality);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn delete_clears_canonical_index() {
        let store = InMemoryDocumentStore::new();
        let c = company("Acme", "https://acme.com");
        store.put(&c).await.unwrap();
        store.delete(c.id).await.unwrap();

        assert!(store.get(c.id).await.unwrap().is_none());
        assert!(store
            .find_by_canonical(&c.canonical_key())
            .await
            .unwrap()
            .is_none());
    }
}
