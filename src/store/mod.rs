//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only seam between the pipeline and the
//! persistence backend. Two implementations exist:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`sqlite::SqliteStore`] | Production; one SQLite file, WAL mode |
//! | [`memory::InMemoryStore`] | Tests; identical semantics, nothing persisted |
//!
//! Both compute brute-force cosine distance over every record in the
//! collection. Distances are `1 - cosine_similarity`, so they fall in
//! `[0, 2]` and lower means more similar.
//!
//! A collection remembers the embedding model and dimensionality it was
//! created with. Opening it again with a different model is a
//! [`RagError::Config`]: vectors from two embedding functions are not
//! comparable.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::{ChunkMetadata, RetrievedDocument};

/// A named collection, opened against a specific embedding model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionHandle {
    pub id: String,
    pub name: String,
    pub model: String,
    pub dims: usize,
}

/// One record to write: a chunk together with its embedding.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

/// Summary row for `rag status`.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub model: String,
    pub dims: usize,
    pub count: usize,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend identifier used in errors and logs.
    fn backend_name(&self) -> &str;

    /// Open the collection, creating it if it doesn't exist.
    async fn create_or_get_collection(
        &self,
        name: &str,
        model: &str,
        dims: usize,
    ) -> Result<CollectionHandle>;

    /// Insert or replace records by id.
    async fn upsert(&self, handle: &CollectionHandle, records: &[StoredRecord]) -> Result<()>;

    /// Up to `k` nearest records, ascending by distance.
    async fn query(
        &self,
        handle: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedDocument>>;

    async fn count(&self, handle: &CollectionHandle) -> Result<usize>;

    /// Drop the collection and its records. Returns `false` if it didn't exist.
    async fn delete_collection(&self, name: &str) -> Result<bool>;

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;

    /// Release connections. Further calls fail.
    async fn close(&self) {}
}

/// Reject reopening a collection with a different embedding function.
pub(crate) fn check_compatible(
    name: &str,
    stored_model: &str,
    stored_dims: usize,
    model: &str,
    dims: usize,
) -> Result<()> {
    if stored_model != model || stored_dims != dims {
        return Err(RagError::Config(format!(
            "collection '{}' was built with embedding model '{}' ({} dims), \
             but the configured model is '{}' ({} dims); re-ingest with --rebuild",
            name, stored_model, stored_dims, model, dims
        )));
    }
    Ok(())
}

pub(crate) fn check_dims(handle: &CollectionHandle, vector: &[f32]) -> Result<()> {
    if vector.len() != handle.dims {
        return Err(RagError::Config(format!(
            "vector has {} dims but collection '{}' expects {}",
            vector.len(),
            handle.name,
            handle.dims
        )));
    }
    Ok(())
}

pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - cosine_similarity(a, b)).clamp(0.0, 2.0)
}

/// Sort ascending by distance (ties by id, so results are stable) and keep `k`.
pub(crate) fn nearest(mut docs: Vec<RetrievedDocument>, k: usize) -> Vec<RetrievedDocument> {
    docs.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    docs.truncate(k);
    docs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, distance: f32) -> RetrievedDocument {
        RetrievedDocument {
            id: id.to_string(),
            text: String::new(),
            metadata: ChunkMetadata {
                source_file: "a.pdf".into(),
                page_number: 1,
                chunk_index: 0,
                total_chunks: 1,
                text_length: 0,
                description_length: 0,
            },
            distance,
        }
    }

    #[test]
    fn nearest_sorts_ascending_and_truncates() {
        let out = nearest(vec![doc("c", 0.9), doc("a", 0.1), doc("b", 0.5)], 2);
        let ids: Vec<_> = out.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn cosine_distance_range() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn model_mismatch_is_config_error() {
        let err = check_compatible("docs", "model-a", 8, "model-b", 8).unwrap_err();
        assert!(matches!(err, RagError::Config(_)));
        assert!(check_compatible("docs", "model-a", 8, "model-a", 8).is_ok());
    }
}
