//! Core data models used throughout the pipeline.
//!
//! These types represent the pages, chunks, retrieved documents, and query
//! results that flow through ingestion and question answering.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Number of leading characters of page text that feed the content hash.
const HASH_TEXT_PREFIX_CHARS: usize = 100;

/// One physical PDF page: extracted text plus a description of its visuals.
///
/// Created once per ingestion run and consumed immediately by the chunker.
#[derive(Debug, Clone)]
pub struct PageRecord {
    /// Path of the PDF relative to the corpus root.
    pub source_file: String,
    /// 1-based page number.
    pub page_number: u32,
    pub raw_text: String,
    /// Description of charts, tables, and images; empty when there are none.
    pub visual_description: String,
    /// Cache key for `visual_description`, see [`page_content_hash`].
    pub content_hash: String,
}

/// Stable hash of `(source_file, page_number, raw_text[..100 chars])`.
///
/// Used as the image description cache key, so the same page in the same
/// file never triggers a second vision call.
pub fn page_content_hash(source_file: &str, page_number: u32, raw_text: &str) -> String {
    let prefix: String = raw_text.chars().take(HASH_TEXT_PREFIX_CHARS).collect();
    let mut hasher = Sha256::new();
    hasher.update(format!("{}-page-{}-{}", source_file, page_number, prefix).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Metadata carried with every chunk into the vector store and back out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_file: String,
    pub page_number: u32,
    pub chunk_index: usize,
    pub total_chunks: usize,
    #[serde(default)]
    pub text_length: usize,
    #[serde(default)]
    pub description_length: usize,
}

/// A bounded slice of one page's combined text.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Deterministic id, see [`crate::chunk::chunk_id`].
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A chunk returned by a similarity query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine distance to the query; lower is more similar.
    pub distance: f32,
}

/// A retrieved document with a relevance score; higher is more relevant.
#[derive(Debug, Clone, Serialize)]
pub struct RerankedDocument {
    #[serde(flatten)]
    pub document: RetrievedDocument,
    pub rerank_score: f32,
}

/// Coarse quality bucket for the mean confidence of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Good,
    Moderate,
    Low,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Good => "good",
            Quality::Moderate => "moderate",
            Quality::Low => "low",
        }
    }
}

/// Per-document confidence in `[0, 1]` plus the aggregate assessment.
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceReport {
    pub scores: Vec<f32>,
    pub mean: f32,
    pub quality: Quality,
    pub has_sufficient_data: bool,
}

impl ConfidenceReport {
    pub fn empty() -> Self {
        Self {
            scores: Vec::new(),
            mean: 0.0,
            quality: Quality::Low,
            has_sufficient_data: false,
        }
    }
}

/// The unit returned by the query entry point.
///
/// `response` is never empty: it holds either the synthesized answer or a
/// fixed user-facing message, in which case `error` says what went wrong.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub query: String,
    pub response: String,
    pub retrieved_documents: Vec<RetrievedDocument>,
    pub reranked_documents: Vec<RerankedDocument>,
    /// Distance-based confidence of each retrieved document, before reranking.
    pub retrieval_confidence: Vec<f32>,
    /// Confidence of each reranked document, parallel to `reranked_documents`.
    pub confidence_scores: Vec<f32>,
    pub confidence: ConfidenceReport,
    pub reranking_enabled: bool,
    pub processing_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
