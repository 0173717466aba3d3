//! Second-pass relevance scoring of retrieved chunks.
//!
//! A [`Reranker`] scores each `(query, chunk text)` pair independently;
//! [`rerank`] sorts by that score and keeps the top N. When there is no
//! reranker (disabled, or its model failed to load) or scoring the batch
//! fails, the documents keep their retrieval order and get synthetic,
//! strictly descending scores from [`synthetic_scores`]. [`rerank`] itself
//! never fails.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::RerankingConfig;
use crate::error::{RagError, Result};
use crate::models::{RerankedDocument, RetrievedDocument};

#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// One relevance score per text, in input order. Higher is more relevant.
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>>;
}

/// Which path produced the scores of a [`RerankOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankSource {
    Model,
    /// No reranker configured or loaded.
    Disabled,
    /// The reranker failed on this batch.
    Failed,
}

#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub documents: Vec<RerankedDocument>,
    pub source: RerankSource,
}

/// `0.8, 0.7, ... 0.2` for the first seven ranks, then halving from 0.1.
/// Always strictly descending and within `(0, 1]`.
pub fn synthetic_scores(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            if i < 7 {
                0.8 - 0.1 * i as f32
            } else {
                0.1 * 0.5f32.powi((i - 6) as i32)
            }
        })
        .collect()
}

fn fallback(documents: &[RetrievedDocument], top_n: usize) -> Vec<RerankedDocument> {
    let kept = &documents[..top_n.min(documents.len())];
    kept.iter()
        .cloned()
        .zip(synthetic_scores(kept.len()))
        .map(|(document, rerank_score)| RerankedDocument {
            document,
            rerank_score,
        })
        .collect()
}

/// Score, sort descending, keep `top_n`. Falls back instead of failing.
pub async fn rerank(
    reranker: Option<&dyn Reranker>,
    query: &str,
    documents: &[RetrievedDocument],
    top_n: usize,
) -> RerankOutcome {
    let Some(reranker) = reranker else {
        return RerankOutcome {
            documents: fallback(documents, top_n),
            source: RerankSource::Disabled,
        };
    };
    if documents.is_empty() {
        return RerankOutcome {
            documents: Vec::new(),
            source: RerankSource::Model,
        };
    }

    let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
    let scores = reranker
        .score(query, &texts)
        .await
        .and_then(|scores| check_scores(reranker.name(), scores, documents.len()));

    match scores {
        Ok(scores) => {
            let mut reranked: Vec<RerankedDocument> = documents
                .iter()
                .cloned()
                .zip(scores)
                .map(|(document, rerank_score)| RerankedDocument {
                    document,
                    rerank_score,
                })
                .collect();
            // Stable sort: equal scores keep retrieval order.
            reranked.sort_by(|a, b| {
                b.rerank_score
                    .partial_cmp(&a.rerank_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            reranked.truncate(top_n);
            debug!(
                reranker = reranker.name(),
                kept = reranked.len(),
                top_score = reranked.first().map(|d| d.rerank_score),
                "reranked"
            );
            RerankOutcome {
                documents: reranked,
                source: RerankSource::Model,
            }
        }
        Err(e) => {
            warn!(reranker = reranker.name(), error = %e, "reranking failed, keeping retrieval order");
            RerankOutcome {
                documents: fallback(documents, top_n),
                source: RerankSource::Failed,
            }
        }
    }
}

fn check_scores(name: &str, scores: Vec<f32>, expected: usize) -> Result<Vec<f32>> {
    if scores.len() != expected {
        return Err(RagError::Rerank {
            reranker: name.to_string(),
            message: format!("expected {} scores, got {}", expected, scores.len()),
        });
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(RagError::Rerank {
            reranker: name.to_string(),
            message: "non-finite score".to_string(),
        });
    }
    Ok(scores)
}

#[cfg(any(test, feature = "local-models"))]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Local cross-encoder through fastembed. Raw logits are squashed with a
/// sigmoid so scores land in `(0, 1)`.
#[cfg(feature = "local-models")]
pub struct CrossEncoderReranker {
    name: String,
    model: std::sync::Arc<std::sync::Mutex<fastembed::TextRerank>>,
}

#[cfg(feature = "local-models")]
impl CrossEncoderReranker {
    /// Loads (downloading on first use) the model. Blocking.
    pub fn load(model_name: &str) -> Result<Self> {
        let model = match model_name {
            "bge-reranker-base" => fastembed::RerankerModel::BGERerankerBase,
            "bge-reranker-v2-m3" => fastembed::RerankerModel::BGERerankerV2M3,
            "jina-reranker-v1-turbo-en" => fastembed::RerankerModel::JINARerankerV1TurboEn,
            other => {
                return Err(RagError::Config(format!(
                    "Unknown reranker model: '{}'. Supported models: bge-reranker-base, \
                     bge-reranker-v2-m3, jina-reranker-v1-turbo-en",
                    other
                )))
            }
        };
        let loaded = fastembed::TextRerank::try_new(
            fastembed::RerankInitOptions::new(model).with_show_download_progress(true),
        )
        .map_err(|e| RagError::Rerank {
            reranker: model_name.to_string(),
            message: format!("failed to load model: {}", e),
        })?;
        Ok(Self {
            name: model_name.to_string(),
            model: std::sync::Arc::new(std::sync::Mutex::new(loaded)),
        })
    }
}

#[cfg(feature = "local-models")]
#[async_trait]
impl Reranker for CrossEncoderReranker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let model = self.model.clone();
        let name = self.name.clone();
        let query = query.to_string();
        let texts = texts.to_vec();
        let count = texts.len();

        tokio::task::spawn_blocking(move || {
            let mut model = model.lock().map_err(|_| RagError::Rerank {
                reranker: name.clone(),
                message: "model lock poisoned".to_string(),
            })?;
            let results = model
                .rerank(query, texts, false, None)
                .map_err(|e| RagError::Rerank {
                    reranker: name.clone(),
                    message: e.to_string(),
                })?;
            // Results come back sorted by score; put them back in input order.
            let mut scores = vec![f32::NAN; count];
            for r in results {
                if let Some(slot) = scores.get_mut(r.index) {
                    *slot = sigmoid(r.score);
                }
            }
            Ok(scores)
        })
        .await
        .map_err(|e| RagError::Rerank {
            reranker: self.name.clone(),
            message: e.to_string(),
        })?
    }
}

/// Build the configured reranker. A model that fails to load is logged and
/// treated as "no reranker"; queries then use the fallback ordering.
pub async fn load_reranker(config: &RerankingConfig) -> Option<std::sync::Arc<dyn Reranker>> {
    if !config.enabled {
        return None;
    }
    #[cfg(feature = "local-models")]
    {
        let model_name = config.model.clone();
        let loaded =
            tokio::task::spawn_blocking(move || CrossEncoderReranker::load(&model_name)).await;
        match loaded {
            Ok(Ok(reranker)) => Some(std::sync::Arc::new(reranker)),
            Ok(Err(e)) => {
                warn!(error = %e, "reranker unavailable, using retrieval order");
                None
            }
            Err(e) => {
                warn!(error = %e, "reranker load task failed, using retrieval order");
                None
            }
        }
    }
    #[cfg(not(feature = "local-models"))]
    {
        warn!(
            model = %config.model,
            "reranking requires --features local-models; using retrieval order"
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn doc(id: &str, text: &str, distance: f32) -> RetrievedDocument {
        RetrievedDocument {
            id: id.to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata {
                source_file: "r.pdf".into(),
                page_number: 1,
                chunk_index: 0,
                total_chunks: 1,
                text_length: 0,
                description_length: 0,
            },
            distance,
        }
    }

    struct LengthReranker;

    #[async_trait]
    impl Reranker for LengthReranker {
        fn name(&self) -> &str {
            "length"
        }
        async fn score(&self, _query: &str, texts: &[String]) -> Result<Vec<f32>> {
            Ok(texts.iter().map(|t| t.len() as f32 / 100.0).collect())
        }
    }

    struct BrokenReranker;

    #[async_trait]
    impl Reranker for BrokenReranker {
        fn name(&self) -> &str {
            "broken"
        }
        async fn score(&self, _query: &str, _texts: &[String]) -> Result<Vec<f32>> {
            Err(RagError::Rerank {
                reranker: "broken".into(),
                message: "predict exploded".into(),
            })
        }
    }

    fn docs() -> Vec<RetrievedDocument> {
        vec![
            doc("a", "x", 0.1),
            doc("b", "xxxxx", 0.2),
            doc("c", "xxx", 0.3),
        ]
    }

    #[test]
    fn synthetic_scores_descend_within_bounds() {
        let s = synthetic_scores(12);
        assert!((s[0] - 0.8).abs() < 1e-6);
        assert!((s[1] - 0.7).abs() < 1e-6);
        for pair in s.windows(2) {
            assert!(pair[0] > pair[1]);
        }
        assert!(s.iter().all(|&x| x > 0.0 && x <= 1.0));
    }

    #[tokio::test]
    async fn model_scores_sort_descending() {
        let out = rerank(Some(&LengthReranker), "q", &docs(), 2).await;
        assert_eq!(out.source, RerankSource::Model);
        let ids: Vec<_> = out.documents.iter().map(|d| d.document.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn disabled_keeps_order_with_synthetic_scores() {
        let out = rerank(None, "q", &docs(), 5).await;
        assert_eq!(out.source, RerankSource::Disabled);
        assert_eq!(out.documents.len(), 3);
        assert_eq!(out.documents[0].document.id, "a");
        assert!((out.documents[0].rerank_score - 0.8).abs() < 1e-6);
        assert!((out.documents[2].rerank_score - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn failure_falls_back() {
        let out = rerank(Some(&BrokenReranker), "q", &docs(), 2).await;
        assert_eq!(out.source, RerankSource::Failed);
        let scores: Vec<f32> = out.documents.iter().map(|d| d.rerank_score).collect();
        assert_eq!(scores.len(), 2);
        assert!((scores[0] - 0.8).abs() < 1e-6 && (scores[1] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn wrong_score_count_is_rejected() {
        assert!(check_scores("m", vec![0.5], 2).is_err());
        assert!(check_scores("m", vec![0.5, f32::NAN], 2).is_err());
    }

    #[test]
    fn sigmoid_is_bounded() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) < 1.0 && sigmoid(-10.0) > 0.0);
    }
}
