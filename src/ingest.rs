//! Ingestion entry point.
//!
//! `corpus dir → PDFs → pages (text + visual description) → chunks →
//! embeddings → collection`, one file at a time.
//!
//! Only two things fail the whole run: the vector store self-test, and a
//! corpus directory that can't be scanned. Everything below that (an
//! unreadable file, a bad page, a failed batch) is logged, counted in the
//! [`IngestReport`], and skipped.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::chunk::Chunker;
use crate::config::Config;
use crate::corpus::scan_corpus;
use crate::extract::extract_pdf;
use crate::index::{index_chunks, open_collection, self_test};
use crate::pipeline::Services;
use crate::progress::{IngestProgressEvent, IngestProgressReporter, ProgressMode};

/// Aggregate counts for one ingestion run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestReport {
    pub collection: String,
    pub rebuilt: bool,
    pub files_seen: usize,
    pub files_skipped: usize,
    pub pages_processed: usize,
    pub pages_failed: usize,
    pub descriptions_cached: usize,
    pub descriptions_failed: usize,
    pub chunks_produced: usize,
    pub chunks_indexed: usize,
    pub chunks_failed: usize,
    pub failed_batches: usize,
    /// Records in the collection after the run.
    pub collection_count: usize,
    pub elapsed_ms: u128,
}

impl IngestReport {
    /// True when nothing was skipped along the way.
    pub fn is_complete(&self) -> bool {
        self.files_skipped == 0 && self.pages_failed == 0 && self.failed_batches == 0
    }
}

/// Ingest every PDF under `corpus_dir` into `collection`.
///
/// With `rebuild`, the collection is deleted and recreated first;
/// otherwise records are upserted by their deterministic ids.
pub async fn ingest(
    services: &Services,
    corpus_dir: &Path,
    collection: &str,
    rebuild: bool,
    progress: &dyn IngestProgressReporter,
) -> Result<IngestReport> {
    let started = Instant::now();

    self_test(services)
        .await
        .context("Vector store self-test failed; nothing was ingested")?;

    progress.report(IngestProgressEvent::Discovering {
        root: corpus_dir.display().to_string(),
    });
    let files = scan_corpus(corpus_dir, &services.settings.corpus)?;
    if files.is_empty() {
        warn!(dir = %corpus_dir.display(), "no PDF files found");
    }

    let handle = open_collection(services, collection, rebuild).await?;
    let chunker = Chunker::from_config(&services.settings.chunking);

    let mut report = IngestReport {
        collection: collection.to_string(),
        rebuilt: rebuild,
        files_seen: files.len(),
        ..IngestReport::default()
    };

    let total = files.len() as u64;
    for (i, file) in files.iter().enumerate() {
        progress.report(IngestProgressEvent::Extracting {
            file: file.relative.clone(),
            n: (i + 1) as u64,
            total,
        });
        info!(file = %file.relative, size_bytes = file.size_bytes, "processing PDF");

        let extraction = match extract_pdf(services, &file.path, &file.relative).await {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!(file = %file.relative, error = %e, "skipping file");
                report.files_skipped += 1;
                continue;
            }
        };

        report.pages_processed += extraction.pages.len();
        report.pages_failed += extraction.failed_pages;
        report.descriptions_cached += extraction.cached_descriptions;
        report.descriptions_failed += extraction.failed_descriptions;

        let chunks = chunker.chunk_pages(&extraction.pages);
        report.chunks_produced += chunks.len();

        let outcome = index_chunks(services, &handle, &chunks, progress).await;
        report.chunks_indexed += outcome.stored;
        report.chunks_failed += outcome.failed_chunks;
        report.failed_batches += outcome.failed_batches;

        info!(
            file = %file.relative,
            pages = extraction.pages.len(),
            chunks = chunks.len(),
            indexed = outcome.stored,
            "file done"
        );
    }

    report.collection_count = services.store.count(&handle).await?;
    report.elapsed_ms = started.elapsed().as_millis();
    Ok(report)
}

/// `rag ingest`: build services from config, ingest, print the report.
pub async fn run_ingest(
    config: &Config,
    corpus_dir: Option<&Path>,
    collection: Option<&str>,
    rebuild: bool,
    mode: ProgressMode,
) -> Result<()> {
    let services = Services::from_config(config).await?;
    let corpus_dir = corpus_dir.unwrap_or(config.corpus.root.as_path());
    let collection = collection.unwrap_or(config.collection.name.as_str());
    let progress = mode.reporter();

    let report = ingest(&services, corpus_dir, collection, rebuild, progress.as_ref()).await;
    services.close().await;
    let report = report?;

    println!("ingest {}", report.collection);
    if report.rebuilt {
        println!("  rebuilt: yes");
    }
    println!(
        "  files: {} seen, {} skipped",
        report.files_seen, report.files_skipped
    );
    println!(
        "  pages: {} processed, {} failed",
        report.pages_processed, report.pages_failed
    );
    println!(
        "  descriptions: {} from cache, {} failed",
        report.descriptions_cached, report.descriptions_failed
    );
    println!(
        "  chunks: {} produced, {} indexed, {} failed ({} batches)",
        report.chunks_produced, report.chunks_indexed, report.chunks_failed, report.failed_batches
    );
    println!("  collection size: {}", report.collection_count);
    println!("  time: {:.1}s", report.elapsed_ms as f64 / 1000.0);
    println!("{}", if report.is_complete() { "ok" } else { "done with errors" });
    Ok(())
}
