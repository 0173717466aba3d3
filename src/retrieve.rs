//! Nearest-neighbour retrieval for a query.

use tracing::debug;

use crate::embedding::{embed_query, Embedder};
use crate::error::Result;
use crate::models::RetrievedDocument;
use crate::store::{CollectionHandle, VectorStore};

/// The `k` chunks closest to `query`, ascending by distance.
///
/// An empty collection yields an empty list without touching the embedder,
/// and `k` is clamped to the collection size.
pub async fn retrieve(
    store: &dyn VectorStore,
    embedder: &dyn Embedder,
    handle: &CollectionHandle,
    query: &str,
    k: usize,
) -> Result<Vec<RetrievedDocument>> {
    let count = store.count(handle).await?;
    let k = k.min(count);
    if k == 0 {
        debug!(collection = %handle.name, count, "nothing to retrieve");
        return Ok(Vec::new());
    }

    let vector = embed_query(embedder, query).await?;
    let documents = store.query(handle, &vector, k).await?;
    debug!(
        collection = %handle.name,
        k,
        returned = documents.len(),
        nearest = documents.first().map(|d| d.distance),
        "retrieved"
    );
    Ok(documents)
}
