//! End-to-end ingestion and query tests against the in-memory store.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{
    write_pdf, BlankCompleter, DownCompleter, FlakyEmbedder, OverlapReranker, TestEnv,
    ThrowingReranker,
};
use rag_harness::answer::{NO_DOCUMENTS_RESPONSE, SYNTHESIS_FAILED_RESPONSE};
use rag_harness::chunk::Chunker;
use rag_harness::index::{index_chunks, open_collection, IndexOutcome};
use rag_harness::ingest::ingest;
use rag_harness::models::{page_content_hash, PageRecord};
use rag_harness::pipeline::{RagPipeline, RETRIEVAL_FAILED_RESPONSE};
use rag_harness::progress::NoProgress;
use rag_harness::query_log::QueryLogger;
use rag_harness::rerank::rerank;
use rag_harness::retrieve::retrieve;
use rag_harness::status::{diagnose, CheckStatus, OverallStatus};

fn page(file: &str, n: u32, text: &str) -> PageRecord {
    PageRecord {
        source_file: file.to_string(),
        page_number: n,
        raw_text: text.to_string(),
        visual_description: String::new(),
        content_hash: page_content_hash(file, n, text),
    }
}

fn economy_pages() -> Vec<PageRecord> {
    vec![
        page("report.pdf", 1, "Industrial output grew 5% in the region."),
        page("report.pdf", 2, "Vehicle exports fell 3% after new tariffs."),
        page("labour.pdf", 1, "Unemployment stayed at 7% across the state."),
    ]
}

#[tokio::test]
async fn single_page_answer_cites_figure() {
    let env = TestEnv::new();
    let corpus = env.corpus_dir();
    write_pdf(&corpus.join("report.pdf"), &["Industrial output grew 5%."]);

    let services = env.services();
    let report = ingest(&services, &corpus, "test", false, &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.files_seen, 1);
    assert_eq!(report.files_skipped, 0);
    assert_eq!(report.pages_processed, 1);
    assert!(report.chunks_indexed >= 1);

    let pipeline = RagPipeline::new(services);
    let result = pipeline
        .query("What was industrial output growth?", 10, 5)
        .await;

    assert!(!result.retrieved_documents.is_empty());
    assert!(result.response.contains("5%"), "response: {}", result.response);
    assert!(result.error.is_none());
    assert_eq!(
        result.reranked_documents[0].document.metadata.source_file,
        "report.pdf"
    );
}

#[tokio::test]
async fn empty_collection_returns_fixed_message() {
    let env = TestEnv::new();
    let pipeline = RagPipeline::new(env.services());

    let result = pipeline.query("anything", 10, 5).await;

    assert_eq!(result.response, NO_DOCUMENTS_RESPONSE);
    assert!(result.error.is_some());
    assert!(result.retrieved_documents.is_empty());
    assert!(result.reranked_documents.is_empty());
    assert!(!result.confidence.has_sufficient_data);
    assert_eq!(env.embedder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(env.completer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reingesting_unchanged_corpus_keeps_count() {
    let env = TestEnv::new();
    let corpus = env.corpus_dir();
    write_pdf(&corpus.join("report.pdf"), &["Industrial output grew 5%."]);
    let services = env.services();

    let first = ingest(&services, &corpus, "test", false, &NoProgress)
        .await
        .unwrap();
    let second = ingest(&services, &corpus, "test", false, &NoProgress)
        .await
        .unwrap();

    assert!(first.collection_count > 0);
    assert_eq!(first.collection_count, second.collection_count);
    assert_eq!(first.chunks_indexed, second.chunks_indexed);
}

#[tokio::test]
async fn rebuild_drops_previous_records() {
    let env = TestEnv::new();
    let corpus = env.corpus_dir();
    write_pdf(&corpus.join("a.pdf"), &["First report.", "Second page."]);
    let services = env.services();

    let first = ingest(&services, &corpus, "test", false, &NoProgress)
        .await
        .unwrap();
    assert_eq!(first.collection_count, 2);

    std::fs::remove_file(corpus.join("a.pdf")).unwrap();
    write_pdf(&corpus.join("b.pdf"), &["Only page."]);

    let rebuilt = ingest(&services, &corpus, "test", true, &NoProgress)
        .await
        .unwrap();
    assert!(rebuilt.rebuilt);
    assert_eq!(rebuilt.collection_count, 1);
}

#[tokio::test]
async fn unreadable_pdf_is_skipped() {
    let env = TestEnv::new();
    let corpus = env.corpus_dir();
    write_pdf(&corpus.join("good.pdf"), &["Industrial output grew 5%."]);
    std::fs::write(corpus.join("broken.pdf"), b"this is not a pdf at all").unwrap();

    let report = ingest(&env.services(), &corpus, "test", false, &NoProgress)
        .await
        .unwrap();
    assert_eq!(report.files_seen, 2);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.collection_count, 1);
    assert!(!report.is_complete());
}

#[tokio::test]
async fn failing_self_test_aborts_ingestion() {
    let env = TestEnv::new();
    let corpus = env.corpus_dir();
    write_pdf(&corpus.join("report.pdf"), &["Industrial output grew 5%."]);

    let mut services = env.services();
    services.embedder = Arc::new(rag_harness::embedding::DisabledProvider);

    let err = ingest(&services, &corpus, "test", false, &NoProgress)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("self-test"));
    assert!(services.store.list_collections().await.unwrap().is_empty());
}

async fn indexed_services(env: &TestEnv) -> rag_harness::pipeline::Services {
    let services = env.services();
    let handle = open_collection(&services, "test", false).await.unwrap();
    let chunks = Chunker::new(4000, 500).chunk_pages(&economy_pages());
    let outcome = index_chunks(&services, &handle, &chunks, &NoProgress).await;
    assert_eq!(outcome.stored, 3);
    services
}

#[tokio::test]
async fn retrieve_clamps_k_and_sorts_by_distance() {
    let env = TestEnv::new();
    let services = indexed_services(&env).await;
    let handle = open_collection(&services, "test", false).await.unwrap();

    let docs = retrieve(
        services.store.as_ref(),
        services.embedder.as_ref(),
        &handle,
        "industrial output",
        10,
    )
    .await
    .unwrap();

    assert_eq!(docs.len(), 3);
    for pair in docs.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
    assert_eq!(docs[0].metadata.page_number, 1);
    assert_eq!(docs[0].metadata.source_file, "report.pdf");
}

#[tokio::test]
async fn throwing_reranker_falls_back_to_synthetic_scores() {
    let env = TestEnv::new();
    let mut services = indexed_services(&env).await;
    services.reranker = Some(Arc::new(ThrowingReranker));
    let handle = open_collection(&services, "test", false).await.unwrap();
    let docs = retrieve(
        services.store.as_ref(),
        services.embedder.as_ref(),
        &handle,
        "exports",
        10,
    )
    .await
    .unwrap();

    let outcome = rerank(Some(&ThrowingReranker), "exports", &docs, 2).await;
    let scores: Vec<f32> = outcome.documents.iter().map(|d| d.rerank_score).collect();
    assert_eq!(scores.len(), 2);
    assert!((scores[0] - 0.8).abs() < 1e-6);
    assert!((scores[1] - 0.7).abs() < 1e-6);
    assert_eq!(outcome.documents[0].document.id, docs[0].id);

    let pipeline = RagPipeline::new(services);
    let result = pipeline.query("exports", 10, 2).await;
    assert!(result.error.is_none());
    assert!(result.reranking_enabled);
    assert_eq!(result.reranked_documents.len(), 2);
    assert!(result.reranked_documents[0].rerank_score > result.reranked_documents[1].rerank_score);
}

#[tokio::test]
async fn reranker_orders_by_relevance() {
    let env = TestEnv::new();
    let mut services = indexed_services(&env).await;
    services.reranker = Some(Arc::new(OverlapReranker));
    let pipeline = RagPipeline::new(services);

    let result = pipeline.query("unemployment state", 10, 3).await;
    assert_eq!(result.reranked_documents.len(), 3);
    assert_eq!(
        result.reranked_documents[0].document.metadata.source_file,
        "labour.pdf"
    );
    for pair in result.reranked_documents.windows(2) {
        assert!(pair[0].rerank_score >= pair[1].rerank_score);
    }
}

#[tokio::test]
async fn disabled_reranking_skips_the_model() {
    let env = TestEnv::new();
    let mut services = indexed_services(&env).await;
    services.reranker = Some(Arc::new(ThrowingReranker));
    services.settings.reranking_enabled = false;
    let pipeline = RagPipeline::new(services);

    let result = pipeline.query("industrial output", 10, 5).await;
    assert!(!result.reranking_enabled);
    assert_eq!(result.reranked_documents.len(), 3);
    let ids: Vec<_> = result.retrieved_documents.iter().map(|d| &d.id).collect();
    let reranked: Vec<_> = result
        .reranked_documents
        .iter()
        .map(|d| &d.document.id)
        .collect();
    assert_eq!(ids, reranked);
}

#[tokio::test]
async fn confidence_scores_are_bounded() {
    let env = TestEnv::new();
    let pipeline = RagPipeline::new(indexed_services(&env).await);

    for question in ["industrial output", "tariffs", "something unrelated entirely"] {
        let result = pipeline.query(question, 10, 3).await;
        assert_eq!(result.confidence_scores.len(), result.reranked_documents.len());
        assert_eq!(
            result.retrieval_confidence.len(),
            result.retrieved_documents.len()
        );
        for s in result
            .confidence_scores
            .iter()
            .chain(result.retrieval_confidence.iter())
        {
            assert!((0.0..=1.0).contains(s), "score {} out of range", s);
        }
        assert!((0.0..=1.0).contains(&result.confidence.mean));
    }
}

#[tokio::test]
async fn completion_outage_returns_apology_after_retries() {
    let env = TestEnv::new();
    let mut services = indexed_services(&env).await;
    let down = Arc::new(DownCompleter::default());
    services.completer = down.clone();
    let pipeline = RagPipeline::new(services);

    let result = pipeline.query("industrial output", 10, 5).await;

    assert_eq!(result.response, SYNTHESIS_FAILED_RESPONSE);
    assert!(result.error.as_deref().unwrap_or("").contains("503"));
    assert_eq!(result.reranked_documents.len(), 3);
    assert_eq!(down.calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        *env.sleeper.slept.lock().unwrap(),
        vec![Duration::from_millis(2000), Duration::from_millis(4000)]
    );
}

#[tokio::test]
async fn blank_completion_becomes_synthesis_failure() {
    let env = TestEnv::new();
    let mut services = indexed_services(&env).await;
    services.completer = Arc::new(BlankCompleter);
    let pipeline = RagPipeline::new(services);

    let result = pipeline.query("industrial output", 10, 5).await;

    assert_eq!(result.response, SYNTHESIS_FAILED_RESPONSE);
    assert!(result.error.as_deref().unwrap_or("").contains("empty answer"));
    assert_eq!(result.reranked_documents.len(), 3);
}

#[tokio::test]
async fn failed_batch_is_skipped_and_later_batches_stored() {
    let env = TestEnv::new();
    let mut services = env.services();
    let embedder = Arc::new(FlakyEmbedder::new(1));
    services.embedder = embedder.clone();
    services.settings.index_batch_size = 2;

    let mut pages = economy_pages();
    pages.push(page("labour.pdf", 2, "Average wages rose 4% in manufacturing."));
    pages.push(page("trade.pdf", 1, "Soy exports doubled through the port."));
    pages.push(page("trade.pdf", 2, "Imports of machinery slowed in the fourth quarter."));
    let chunks = Chunker::new(4000, 500).chunk_pages(&pages);
    assert_eq!(chunks.len(), 6);

    let handle = open_collection(&services, "test", false).await.unwrap();
    let outcome = index_chunks(&services, &handle, &chunks, &NoProgress).await;

    assert_eq!(
        outcome,
        IndexOutcome {
            stored: 4,
            failed_batches: 1,
            failed_chunks: 2,
        }
    );
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    assert_eq!(services.store.count(&handle).await.unwrap(), 4);

    let query_vector = common::hash_embed(&chunks[0].text);
    let stored: Vec<String> = services
        .store
        .query(&handle, &query_vector, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert!(!stored.contains(&chunks[2].id));
    assert!(!stored.contains(&chunks[3].id));
    assert!(stored.contains(&chunks[4].id));
    assert!(stored.contains(&chunks[5].id));
}

#[tokio::test]
async fn prompt_labels_documents() {
    let env = TestEnv::new();
    let pipeline = RagPipeline::new(indexed_services(&env).await);
    pipeline.query("vehicle exports", 10, 1).await;

    let system = env.completer.last_system.lock().unwrap().clone().unwrap();
    assert!(system.contains("Source: report.pdf | Page 2"));
    assert!(system.contains("Confidence 0.8000"));
    assert!(system.contains("regional economic data"));
}

#[tokio::test]
async fn mismatched_embedding_model_is_reported() {
    let env = TestEnv::new();
    let services = env.services();
    services
        .store
        .create_or_get_collection("test", "some-other-model", 1536)
        .await
        .unwrap();
    let pipeline = RagPipeline::new(services);

    let result = pipeline.query("industrial output", 10, 5).await;
    assert_eq!(result.response, RETRIEVAL_FAILED_RESPONSE);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn blank_question_is_not_sent_anywhere() {
    let env = TestEnv::new();
    let pipeline = RagPipeline::new(indexed_services(&env).await);
    let calls_before = env.embedder.calls.load(Ordering::SeqCst);

    let result = pipeline.query("   \n", 10, 5).await;
    assert!(!result.response.is_empty());
    assert!(result.error.is_some());
    assert_eq!(env.embedder.calls.load(Ordering::SeqCst), calls_before);
}

#[tokio::test]
async fn every_query_is_logged() {
    let env = TestEnv::new();
    let mut services = indexed_services(&env).await;
    let log_path = env.path().join("logs/queries.csv");
    services.query_log = Some(QueryLogger::new(&log_path));
    let pipeline = RagPipeline::new(services);

    pipeline.query("industrial output", 10, 5).await;
    pipeline.query("nothing\nrelevant", 10, 5).await;

    let content = std::fs::read_to_string(&log_path).unwrap();
    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][1], "industrial output");
    assert_eq!(&rows[0][3], "3");
    assert_eq!(&rows[1][1], "nothing relevant");
}

#[tokio::test]
async fn diagnostics_pass_on_a_populated_collection() {
    let env = TestEnv::new();
    let pipeline = RagPipeline::new(indexed_services(&env).await);

    let report = diagnose(&pipeline).await;

    assert_eq!(report.checks.len(), 4);
    assert!(report
        .checks
        .iter()
        .all(|c| c.status == CheckStatus::Passed), "{:?}", report.checks);
    assert_eq!(report.overall, OverallStatus::Excellent);
    assert!(report.recommendations.is_empty());
    assert!(report.check("collection").unwrap().details.contains("3 chunks"));
}

#[tokio::test]
async fn diagnostics_flag_empty_collection_and_dead_completion() {
    let env = TestEnv::new();
    let mut services = env.services();
    services.completer = Arc::new(DownCompleter::default());
    let pipeline = RagPipeline::new(services);

    let report = diagnose(&pipeline).await;

    let status = |name: &str| report.check(name).unwrap().status;
    assert_eq!(status("vector_store"), CheckStatus::Passed);
    assert_eq!(status("collection"), CheckStatus::Passed);
    assert_eq!(status("completion"), CheckStatus::Failed);
    assert_eq!(status("full_query"), CheckStatus::Failed);
    assert_eq!(report.overall, OverallStatus::NeedsAttention);
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.contains("rag ingest")));
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.contains("completion provider")));
}
