//! Embedding and writing chunks into a collection.
//!
//! [`index_chunks`] embeds and upserts in fixed-size batches. A batch that
//! fails to embed or write is logged and skipped; the run continues with
//! the next one. Because chunk ids are deterministic, indexing the same
//! pages again replaces records instead of duplicating them.

use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{Chunk, ChunkMetadata};
use crate::pipeline::Services;
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::store::{CollectionHandle, StoredRecord};

/// Outcome of one [`index_chunks`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexOutcome {
    pub stored: usize,
    pub failed_batches: usize,
    pub failed_chunks: usize,
}

/// Open `name` for the configured embedder. With `rebuild`, any existing
/// collection of that name is deleted first.
pub async fn open_collection(
    services: &Services,
    name: &str,
    rebuild: bool,
) -> Result<CollectionHandle> {
    if rebuild {
        let existed = services.store.delete_collection(name).await?;
        warn!(collection = name, existed, "rebuild: collection deleted");
    }
    services
        .store
        .create_or_get_collection(name, services.embedder.model_name(), services.embedder.dims())
        .await
}

/// Embed and store `chunks`, `batch_size` at a time.
pub async fn index_chunks(
    services: &Services,
    handle: &CollectionHandle,
    chunks: &[Chunk],
    progress: &dyn IngestProgressReporter,
) -> IndexOutcome {
    let batch_size = services.settings.index_batch_size.max(1);
    let total_batches = chunks.len().div_ceil(batch_size);
    let mut outcome = IndexOutcome::default();

    for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
        match index_batch(services, handle, batch).await {
            Ok(()) => {
                outcome.stored += batch.len();
                debug!(batch = batch_no + 1, total_batches, size = batch.len(), "batch indexed");
            }
            Err(e) => {
                warn!(
                    batch = batch_no + 1,
                    total_batches,
                    size = batch.len(),
                    error = %e,
                    "skipping batch: indexing failed"
                );
                outcome.failed_batches += 1;
                outcome.failed_chunks += batch.len();
            }
        }
        progress.report(IngestProgressEvent::Indexing {
            n: (batch_no + 1) as u64,
            total: total_batches as u64,
        });
    }

    outcome
}

async fn index_batch(services: &Services, handle: &CollectionHandle, batch: &[Chunk]) -> Result<()> {
    let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
    let vectors = services.embedder.embed(&texts).await?;

    let records: Vec<StoredRecord> = batch
        .iter()
        .zip(vectors)
        .map(|(chunk, embedding)| StoredRecord {
            id: chunk.id.clone(),
            text: chunk.text.clone(),
            metadata: chunk.metadata.clone(),
            embedding,
        })
        .collect();

    services.store.upsert(handle, &records).await
}

/// Connectivity check before a long ingestion run: create a throwaway
/// collection, write one record, read it back, delete the collection.
pub async fn self_test(services: &Services) -> Result<()> {
    let name = format!("selftest_{}", uuid::Uuid::new_v4().simple());
    let probe = "connectivity probe";
    let result = run_self_test(services, &name, probe).await;

    // Always try to clean up, even after a failure.
    if let Err(e) = services.store.delete_collection(&name).await {
        warn!(collection = %name, error = %e, "self-test cleanup failed");
    }
    result
}

async fn run_self_test(services: &Services, name: &str, probe: &str) -> Result<()> {
    let handle = services
        .store
        .create_or_get_collection(name, services.embedder.model_name(), services.embedder.dims())
        .await?;
    let vector = crate::embedding::embed_query(services.embedder.as_ref(), probe).await?;

    let record = StoredRecord {
        id: "probe".to_string(),
        text: probe.to_string(),
        metadata: ChunkMetadata {
            source_file: "selftest".to_string(),
            page_number: 1,
            chunk_index: 0,
            total_chunks: 1,
            text_length: probe.len(),
            description_length: 0,
        },
        embedding: vector.clone(),
    };
    services.store.upsert(&handle, &[record]).await?;

    let hits = services.store.query(&handle, &vector, 1).await?;
    if hits.first().map(|d| d.id.as_str()) != Some("probe") {
        return Err(crate::error::RagError::store(
            services.store.backend_name(),
            "self-test record was written but could not be read back",
        ));
    }
    debug!(collection = name, "vector store self-test passed");
    Ok(())
}
