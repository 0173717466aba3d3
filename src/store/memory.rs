//! In-memory [`VectorStore`] used as a test double.
//!
//! Collections are `HashMap`s behind a `std::sync::RwLock`. Query is
//! brute-force cosine distance, same as the SQLite backend.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{RagError, Result};
use crate::models::{ChunkMetadata, RetrievedDocument};

use super::{
    check_compatible, check_dims, cosine_distance, nearest, CollectionHandle, CollectionInfo,
    StoredRecord, VectorStore,
};

struct MemoryRecord {
    text: String,
    metadata: ChunkMetadata,
    embedding: Vec<f32>,
}

struct MemoryCollection {
    id: String,
    model: String,
    dims: usize,
    records: HashMap<String, MemoryRecord>,
}

#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MemoryCollection>>> {
        self.collections
            .read()
            .map_err(|_| RagError::store("memory", "lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MemoryCollection>>> {
        self.collections
            .write()
            .map_err(|_| RagError::store("memory", "lock poisoned"))
    }
}

fn missing(name: &str) -> RagError {
    RagError::store("memory", format!("collection '{}' does not exist", name))
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn create_or_get_collection(
        &self,
        name: &str,
        model: &str,
        dims: usize,
    ) -> Result<CollectionHandle> {
        let mut collections = self.write()?;
        let collection = collections
            .entry(name.to_string())
            .or_insert_with(|| MemoryCollection {
                id: uuid::Uuid::new_v4().to_string(),
                model: model.to_string(),
                dims,
                records: HashMap::new(),
            });
        check_compatible(name, &collection.model, collection.dims, model, dims)?;
        Ok(CollectionHandle {
            id: collection.id.clone(),
            name: name.to_string(),
            model: collection.model.clone(),
            dims: collection.dims,
        })
    }

    async fn upsert(&self, handle: &CollectionHandle, records: &[StoredRecord]) -> Result<()> {
        for record in records {
            check_dims(handle, &record.embedding)?;
        }
        let mut collections = self.write()?;
        let collection = collections
            .get_mut(&handle.name)
            .filter(|c| c.id == handle.id)
            .ok_or_else(|| missing(&handle.name))?;
        for record in records {
            collection.records.insert(
                record.id.clone(),
                MemoryRecord {
                    text: record.text.clone(),
                    metadata: record.metadata.clone(),
                    embedding: record.embedding.clone(),
                },
            );
        }
        Ok(())
    }

    async fn query(
        &self,
        handle: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        check_dims(handle, vector)?;
        let collections = self.read()?;
        let collection = collections
            .get(&handle.name)
            .filter(|c| c.id == handle.id)
            .ok_or_else(|| missing(&handle.name))?;
        let docs = collection
            .records
            .iter()
            .map(|(id, r)| RetrievedDocument {
                id: id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                distance: cosine_distance(vector, &r.embedding),
            })
            .collect();
        Ok(nearest(docs, k))
    }

    async fn count(&self, handle: &CollectionHandle) -> Result<usize> {
        let collections = self.read()?;
        collections
            .get(&handle.name)
            .filter(|c| c.id == handle.id)
            .map(|c| c.records.len())
            .ok_or_else(|| missing(&handle.name))
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        Ok(self.write()?.remove(name).is_some())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let collections = self.read()?;
        let mut out: Vec<CollectionInfo> = collections
            .iter()
            .map(|(name, c)| CollectionInfo {
                name: name.clone(),
                model: c.model.clone(),
                dims: c.dims,
                count: c.records.len(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, embedding: Vec<f32>) -> StoredRecord {
        StoredRecord {
            id: id.to_string(),
            text: format!("text of {}", id),
            metadata: ChunkMetadata {
                source_file: "a.pdf".into(),
                page_number: 1,
                chunk_index: 0,
                total_chunks: 1,
                text_length: 0,
                description_length: 0,
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryStore::new();
        let h = store.create_or_get_collection("c", "m", 2).await.unwrap();
        store.upsert(&h, &[record("x", vec![1.0, 0.0])]).await.unwrap();
        store.upsert(&h, &[record("x", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(store.count(&h).await.unwrap(), 1);

        let hits = store.query(&h, &[0.0, 1.0], 5).await.unwrap();
        assert!(hits[0].distance < 1e-6);
    }

    #[tokio::test]
    async fn query_orders_by_distance() {
        let store = InMemoryStore::new();
        let h = store.create_or_get_collection("c", "m", 2).await.unwrap();
        store
            .upsert(
                &h,
                &[
                    record("far", vec![-1.0, 0.0]),
                    record("near", vec![1.0, 0.1]),
                    record("mid", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        let hits = store.query(&h, &[1.0, 0.0], 3).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
    }

    #[tokio::test]
    async fn stale_handle_after_delete_fails() {
        let store = InMemoryStore::new();
        let h = store.create_or_get_collection("c", "m", 2).await.unwrap();
        assert!(store.delete_collection("c").await.unwrap());
        assert!(!store.delete_collection("c").await.unwrap());
        assert!(store.count(&h).await.is_err());
    }

    #[tokio::test]
    async fn wrong_dims_rejected() {
        let store = InMemoryStore::new();
        let h = store.create_or_get_collection("c", "m", 3).await.unwrap();
        let err = store.upsert(&h, &[record("x", vec![1.0])]).await.unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
    }
}
