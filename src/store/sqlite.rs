//! SQLite-backed [`VectorStore`].
//!
//! Embeddings are stored as little-endian f32 BLOBs next to the chunk text
//! and its JSON metadata. Query loads every vector of the collection and
//! ranks in Rust.

use std::path::Path;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{RagError, Result};
use crate::migrate;
use crate::models::{ChunkMetadata, RetrievedDocument};

use super::{
    check_compatible, check_dims, cosine_distance, nearest, CollectionHandle, CollectionInfo,
    StoredRecord, VectorStore,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

fn decode_metadata(raw: &str) -> Result<ChunkMetadata> {
    serde_json::from_str(raw).map_err(|e| RagError::store("sqlite", format!("bad metadata: {}", e)))
}

#[async_trait]
impl VectorStore for SqliteStore {
    fn backend_name(&self) -> &str {
        "sqlite"
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    async fn create_or_get_collection(
        &self,
        name: &str,
        model: &str,
        dims: usize,
    ) -> Result<CollectionHandle> {
        sqlx::query(
            r#"
            INSERT INTO collections (id, name, model, dims, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(name)
        .bind(model)
        .bind(dims as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT id, model, dims FROM collections WHERE name = ?")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

        let stored_model: String = row.get("model");
        let stored_dims: i64 = row.get("dims");
        check_compatible(name, &stored_model, stored_dims as usize, model, dims)?;

        Ok(CollectionHandle {
            id: row.get("id"),
            name: name.to_string(),
            model: stored_model,
            dims: stored_dims as usize,
        })
    }

    async fn upsert(&self, handle: &CollectionHandle, records: &[StoredRecord]) -> Result<()> {
        for record in records {
            check_dims(handle, &record.embedding)?;
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for record in records {
            let metadata_json = serde_json::to_string(&record.metadata)
                .map_err(|e| RagError::store("sqlite", e))?;
            sqlx::query(
                r#"
                INSERT INTO records (collection_id, id, text, metadata_json, embedding, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection_id, id) DO UPDATE SET
                    text = excluded.text,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&handle.id)
            .bind(&record.id)
            .bind(&record.text)
            .bind(&metadata_json)
            .bind(vec_to_blob(&record.embedding))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        handle: &CollectionHandle,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<RetrievedDocument>> {
        check_dims(handle, vector)?;

        let rows = sqlx::query(
            "SELECT id, text, metadata_json, embedding FROM records WHERE collection_id = ?",
        )
        .bind(&handle.id)
        .fetch_all(&self.pool)
        .await?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            docs.push(RetrievedDocument {
                id: row.get("id"),
                text: row.get("text"),
                metadata: decode_metadata(&metadata_json)?,
                distance: cosine_distance(vector, &blob_to_vec(&blob)),
            });
        }

        Ok(nearest(docs, k))
    }

    async fn count(&self, handle: &CollectionHandle) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection_id = ?")
            .bind(&handle.id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn delete_collection(&self, name: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM records WHERE collection_id IN (SELECT id FROM collections WHERE name = ?)",
        )
        .bind(name)
        .execute(&mut *tx)
        .await?;
        let deleted = sqlx::query("DELETE FROM collections WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT c.name, c.model, c.dims, COUNT(r.id) AS count
            FROM collections c
            LEFT JOIN records r ON r.collection_id = c.id
            GROUP BY c.id
            ORDER BY c.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let dims: i64 = row.get("dims");
                let count: i64 = row.get("count");
                CollectionInfo {
                    name: row.get("name"),
                    model: row.get("model"),
                    dims: dims as usize,
                    count: count as usize,
                }
            })
            .collect())
    }
}
