//! Service wiring and the query entry point.
//!
//! [`Services`] holds one handle per collaborator (vector store, embedder,
//! page renderer, vision describer, completer, reranker, description cache,
//! query log, sleeper) plus the settings the stages read. It is built once,
//! from configuration in production or field by field with fakes in tests,
//! and passed by reference to ingestion and to [`RagPipeline`].
//!
//! A query moves through these stages, each logged at `debug`:
//!
//! ```text
//! Received → Retrieving → Reranking | SkipRerank → Scoring → Synthesizing → Logged → Returned
//! ```
//!
//! [`RagPipeline::query`] never fails. Every error is turned into a
//! [`QueryResult`] with a fixed user-facing `response` and the cause in
//! `error`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::answer::{AnswerSynthesizer, NO_DOCUMENTS_RESPONSE, SYNTHESIS_FAILED_RESPONSE};
use crate::cache::DescriptionCache;
use crate::completion::{create_completer, Completer};
use crate::config::{ChunkingConfig, Config, CorpusConfig, RetrievalConfig};
use crate::confidence;
use crate::embedding::{create_provider, Embedder};
use crate::models::{ConfidenceReport, QueryResult};
use crate::page_image::{create_renderer, PageRenderer};
use crate::query_log::QueryLogger;
use crate::rerank::{load_reranker, rerank, RerankSource, Reranker};
use crate::retrieve::retrieve;
use crate::retry::{RetryPolicy, Sleeper, TokioSleeper};
use crate::store::sqlite::SqliteStore;
use crate::store::VectorStore;
use crate::vision::{create_describer, VisionDescriber};

/// Response when the collection cannot be opened or searched.
pub const RETRIEVAL_FAILED_RESPONSE: &str =
    "The document collection could not be searched. Please try again later.";

/// Response to a blank question.
pub const EMPTY_QUERY_RESPONSE: &str = "Please enter a question.";

/// Settings read by the ingestion and query stages.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub collection: String,
    pub corpus: CorpusConfig,
    pub chunking: ChunkingConfig,
    pub index_batch_size: usize,
    pub max_image_dim: u32,
    pub vision_retry: RetryPolicy,
    pub completion_retry: RetryPolicy,
    pub retrieval: RetrievalConfig,
    pub reranking_enabled: bool,
    pub domain: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&Config::minimal())
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            collection: config.collection.name.clone(),
            corpus: config.corpus.clone(),
            chunking: config.chunking.clone(),
            index_batch_size: config.indexing.batch_size,
            max_image_dim: config.extraction.max_image_dim,
            vision_retry: config.vision.retry.clone(),
            completion_retry: config.completion.retry.clone(),
            retrieval: config.retrieval.clone(),
            reranking_enabled: config.reranking.enabled,
            domain: config.answer.domain.clone(),
        }
    }
}

/// Every collaborator the pipeline talks to.
pub struct Services {
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub renderer: Arc<dyn PageRenderer>,
    pub vision: Arc<dyn VisionDescriber>,
    pub completer: Arc<dyn Completer>,
    /// `None` when reranking is disabled or its model failed to load.
    pub reranker: Option<Arc<dyn Reranker>>,
    pub cache: DescriptionCache,
    pub query_log: Option<QueryLogger>,
    pub sleeper: Arc<dyn Sleeper>,
    pub settings: PipelineSettings,
}

impl Services {
    /// Build production services. Missing credentials, unknown providers
    /// and an unopenable database fail here, before any work starts.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::from(
            create_provider(&config.embedding).context("Failed to set up embedding provider")?,
        );
        let renderer: Arc<dyn PageRenderer> = Arc::from(create_renderer(&config.extraction)?);
        let vision: Arc<dyn VisionDescriber> = Arc::from(
            create_describer(&config.vision).context("Failed to set up vision provider")?,
        );
        let completer: Arc<dyn Completer> = Arc::from(
            create_completer(&config.completion).context("Failed to set up completion provider")?,
        );
        let store = SqliteStore::open(&config.db.path)
            .await
            .with_context(|| format!("Failed to open database {}", config.db.path.display()))?;
        let reranker = load_reranker(&config.reranking).await;

        info!(
            db = %config.db.path.display(),
            embedder = embedder.model_name(),
            renderer = renderer.name(),
            vision = vision.is_enabled(),
            completion = completer.model_name(),
            reranker = ?reranker.as_ref().map(|r| r.name()),
            "services ready"
        );

        Ok(Self {
            store: Arc::new(store),
            embedder,
            renderer,
            vision,
            completer,
            reranker,
            cache: DescriptionCache::new(&config.extraction.cache_dir),
            query_log: QueryLogger::from_config(&config.query_log),
            sleeper: Arc::new(TokioSleeper),
            settings: PipelineSettings::from(config),
        })
    }

    /// Whether queries will actually go through a relevance model.
    pub fn reranking_active(&self) -> bool {
        self.settings.reranking_enabled && self.reranker.is_some()
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}

/// Query state, logged as the query advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Received,
    Retrieving,
    Reranking,
    SkipRerank,
    Scoring,
    Synthesizing,
    Logged,
    Returned,
}

impl QueryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStage::Received => "received",
            QueryStage::Retrieving => "retrieving",
            QueryStage::Reranking => "reranking",
            QueryStage::SkipRerank => "skip_rerank",
            QueryStage::Scoring => "scoring",
            QueryStage::Synthesizing => "synthesizing",
            QueryStage::Logged => "logged",
            QueryStage::Returned => "returned",
        }
    }
}

/// The query entry point over a set of [`Services`].
pub struct RagPipeline {
    services: Services,
}

impl RagPipeline {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Answer `query` with the configured `top_k` values.
    pub async fn ask(&self, query: &str) -> QueryResult {
        let retrieval = &self.services.settings.retrieval;
        self.query(query, retrieval.top_k_retrieve, retrieval.top_k_final)
            .await
    }

    /// Retrieve `top_k_retrieve` chunks, keep the best `top_k_final`, and
    /// answer from them. Always returns a result with a non-empty response.
    pub async fn query(&self, query: &str, top_k_retrieve: usize, top_k_final: usize) -> QueryResult {
        let started = Instant::now();
        let services = &self.services;
        let mut result = QueryResult {
            query: query.to_string(),
            response: String::new(),
            retrieved_documents: Vec::new(),
            reranked_documents: Vec::new(),
            retrieval_confidence: Vec::new(),
            confidence_scores: Vec::new(),
            confidence: ConfidenceReport::empty(),
            reranking_enabled: services.reranking_active(),
            processing_time_ms: 0.0,
            error: None,
        };
        enter(QueryStage::Received);
        info!(query = %query, top_k_retrieve, top_k_final, "query received");

        if query.trim().is_empty() {
            result.response = EMPTY_QUERY_RESPONSE.to_string();
            result.error = Some("Empty query.".to_string());
            return self.finish(result, started);
        }

        enter(QueryStage::Retrieving);
        let retrieved = match self.retrieve_documents(query, top_k_retrieve).await {
            Ok(documents) => documents,
            Err(e) => {
                warn!(error = %e, "retrieval failed");
                result.response = RETRIEVAL_FAILED_RESPONSE.to_string();
                result.error = Some(e.to_string());
                return self.finish(result, started);
            }
        };
        if retrieved.is_empty() {
            warn!("no relevant documents found");
            result.response = NO_DOCUMENTS_RESPONSE.to_string();
            result.error = Some("No documents found.".to_string());
            return self.finish(result, started);
        }
        result.retrieval_confidence =
            confidence::distance_scores(&retrieved, &services.settings.retrieval);

        let reranker = if services.settings.reranking_enabled {
            services.reranker.as_deref()
        } else {
            None
        };
        enter(if reranker.is_some() {
            QueryStage::Reranking
        } else {
            QueryStage::SkipRerank
        });
        let outcome = rerank(reranker, query, &retrieved, top_k_final).await;
        if outcome.source == RerankSource::Failed {
            debug!("rerank fell back to retrieval order");
        }

        enter(QueryStage::Scoring);
        let scores = confidence::rerank_scores(&outcome.documents);
        result.confidence = confidence::assess(scores.clone());
        result.confidence_scores = scores;

        enter(QueryStage::Synthesizing);
        let synthesizer = AnswerSynthesizer {
            completer: services.completer.as_ref(),
            sleeper: services.sleeper.as_ref(),
            retry: &services.settings.completion_retry,
            domain: &services.settings.domain,
        };
        match synthesizer
            .generate(query, &outcome.documents, &result.confidence_scores)
            .await
        {
            Ok(answer) => result.response = answer,
            Err(e) => {
                warn!(error = %e, "answer synthesis failed");
                result.response = SYNTHESIS_FAILED_RESPONSE.to_string();
                result.error = Some(e.to_string());
            }
        }

        result.retrieved_documents = retrieved;
        result.reranked_documents = outcome.documents;
        self.finish(result, started)
    }

    async fn retrieve_documents(
        &self,
        query: &str,
        k: usize,
    ) -> crate::error::Result<Vec<crate::models::RetrievedDocument>> {
        let services = &self.services;
        let handle = services
            .store
            .create_or_get_collection(
                &services.settings.collection,
                services.embedder.model_name(),
                services.embedder.dims(),
            )
            .await?;
        retrieve(
            services.store.as_ref(),
            services.embedder.as_ref(),
            &handle,
            query,
            k,
        )
        .await
    }

    fn finish(&self, mut result: QueryResult, started: Instant) -> QueryResult {
        result.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        if let Some(logger) = &self.services.query_log {
            logger.log(&result);
            enter(QueryStage::Logged);
        }
        enter(QueryStage::Returned);
        info!(
            retrieved = result.retrieved_documents.len(),
            reranked = result.reranked_documents.len(),
            confidence = result.confidence.mean,
            quality = result.confidence.quality.as_str(),
            elapsed_ms = result.processing_time_ms,
            error = result.error.as_deref(),
            "query done"
        );
        result
    }
}

fn enter(stage: QueryStage) {
    debug!(stage = stage.as_str(), "query stage");
}
