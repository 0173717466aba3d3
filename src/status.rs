//! System status and health checks.
//!
//! `rag status` gives a quick overview of what is indexed and which
//! collaborators are configured, without loading any model.
//!
//! `rag selftest` runs [`diagnose`], which makes four checks:
//!
//! | Check | Passes when |
//! |-------|-------------|
//! | `vector_store` | A probe record can be written, read back and deleted |
//! | `collection` | The default collection is absent or matches the embedder |
//! | `completion` | The completion model answers a one-line ping |
//! | `full_query` | A question runs through the whole pipeline without error |
//!
//! The share of passed checks gives the overall status: all of them is
//! `excellent`, at least 3/4 `good`, at least half `needs_attention`, and
//! anything less `critical`.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::index::self_test;
use crate::pipeline::{RagPipeline, Services};
use crate::store::sqlite::SqliteStore;
use crate::store::VectorStore;

/// Question sent through the pipeline by the `full_query` check.
pub const DIAGNOSTIC_QUERY: &str = "system test";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Excellent,
    Good,
    NeedsAttention,
    Critical,
}

impl OverallStatus {
    pub fn from_counts(passed: usize, total: usize) -> Self {
        if passed == total {
            OverallStatus::Excellent
        } else if passed * 4 >= total * 3 {
            OverallStatus::Good
        } else if passed * 2 >= total {
            OverallStatus::NeedsAttention
        } else {
            OverallStatus::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Excellent => "excellent",
            OverallStatus::Good => "good",
            OverallStatus::NeedsAttention => "needs_attention",
            OverallStatus::Critical => "critical",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, OverallStatus::Excellent | OverallStatus::Good)
    }
}

/// Outcome of [`diagnose`].
#[derive(Debug, Clone, Serialize)]
pub struct SystemReport {
    pub timestamp: String,
    pub checks: Vec<CheckResult>,
    pub overall: OverallStatus,
    pub recommendations: Vec<String>,
}

impl SystemReport {
    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

fn passed(name: &'static str, details: impl Into<String>) -> CheckResult {
    CheckResult {
        name,
        status: CheckStatus::Passed,
        details: details.into(),
    }
}

fn failed(name: &'static str, details: impl Into<String>) -> CheckResult {
    CheckResult {
        name,
        status: CheckStatus::Failed,
        details: details.into(),
    }
}

/// Check every collaborator the pipeline depends on. The `full_query`
/// check goes through [`RagPipeline::query`], so it is written to the
/// query log when one is configured.
pub async fn diagnose(pipeline: &RagPipeline) -> SystemReport {
    let services = pipeline.services();
    let mut checks = Vec::new();
    let mut recommendations = Vec::new();

    match self_test(services).await {
        Ok(()) => checks.push(passed(
            "vector_store",
            format!(
                "round trip ok ({} / {} dims)",
                services.embedder.model_name(),
                services.embedder.dims()
            ),
        )),
        Err(e) => {
            checks.push(failed("vector_store", e.to_string()));
            recommendations
                .push("Check the database path and the embedding provider settings.".to_string());
        }
    }

    let name = &services.settings.collection;
    match services.store.list_collections().await {
        Ok(collections) => match collections.iter().find(|c| &c.name == name) {
            None => {
                checks.push(passed(
                    "collection",
                    format!("'{}' does not exist yet", name),
                ));
                recommendations.push("Populate the collection: run `rag ingest`.".to_string());
            }
            Some(info)
                if info.model != services.embedder.model_name()
                    || info.dims != services.embedder.dims() =>
            {
                checks.push(failed(
                    "collection",
                    format!(
                        "'{}' was built with '{}' ({} dims), configured '{}' ({} dims)",
                        name,
                        info.model,
                        info.dims,
                        services.embedder.model_name(),
                        services.embedder.dims()
                    ),
                ));
                recommendations
                    .push("Re-ingest with `rag ingest --rebuild` after changing models.".to_string());
            }
            Some(info) => {
                checks.push(passed(
                    "collection",
                    format!("'{}' holds {} chunks", name, info.count),
                ));
                if info.count == 0 {
                    recommendations.push("Populate the collection: run `rag ingest`.".to_string());
                }
            }
        },
        Err(e) => {
            checks.push(failed("collection", e.to_string()));
            recommendations.push("Check that the database file is readable.".to_string());
        }
    }

    let completer = services.completer.as_ref();
    match completer
        .complete("Reply with the single word OK.", "test")
        .await
    {
        Ok(reply) if !reply.trim().is_empty() => checks.push(passed(
            "completion",
            format!("{} responding", completer.model_name()),
        )),
        Ok(_) => {
            checks.push(failed("completion", "empty reply"));
            recommendations.push("Check the completion model settings.".to_string());
        }
        Err(e) => {
            checks.push(failed("completion", e.to_string()));
            recommendations.push(
                "Check the completion provider settings and OPENAI_API_KEY.".to_string(),
            );
        }
    }

    let result = pipeline.ask(DIAGNOSTIC_QUERY).await;
    match &result.error {
        None => checks.push(passed(
            "full_query",
            format!("processed in {:.1} ms", result.processing_time_ms),
        )),
        Some(e) => checks.push(failed("full_query", e.clone())),
    }

    let passed_count = checks
        .iter()
        .filter(|c| c.status == CheckStatus::Passed)
        .count();
    let overall = OverallStatus::from_counts(passed_count, checks.len());
    recommendations.dedup();

    SystemReport {
        timestamp: chrono::Local::now().to_rfc3339(),
        checks,
        overall,
        recommendations,
    }
}

/// Print database, collections and collaborator settings.
pub async fn run_status(config: &Config) -> Result<()> {
    let store = SqliteStore::open(&config.db.path).await?;
    let collections = store.list_collections().await;
    store.close().await;
    let collections = collections?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("RAG Harness — System Status");
    println!("===========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Default:     {}", config.collection.name);
    println!();

    if collections.is_empty() {
        println!("  No collections. Run `rag ingest` first.");
    } else {
        println!(
            "  {:<24} {:>8} {:>6}   {}",
            "COLLECTION", "CHUNKS", "DIMS", "MODEL"
        );
        println!("  {}", "-".repeat(64));
        for c in &collections {
            println!(
                "  {:<24} {:>8} {:>6}   {}",
                c.name, c.count, c.dims, c.model
            );
        }
    }

    println!();
    println!(
        "  Embedding:   {}{}",
        config.embedding.provider,
        config
            .embedding
            .model
            .as_deref()
            .map(|m| format!(" ({})", m))
            .unwrap_or_default()
    );
    println!(
        "  Reranking:   {}",
        if !config.reranking.enabled {
            "disabled".to_string()
        } else if cfg!(feature = "local-models") {
            format!("enabled ({})", config.reranking.model)
        } else {
            format!(
                "enabled ({}), unavailable in this build",
                config.reranking.model
            )
        }
    );
    println!(
        "  Vision:      {} (renderer: {})",
        describe_provider(&config.vision.provider, &config.vision.model),
        config.extraction.renderer
    );
    println!(
        "  Completion:  {}",
        describe_provider(&config.completion.provider, &config.completion.model)
    );
    println!(
        "  Query log:   {}",
        if config.query_log.enabled {
            config.query_log.dir.display().to_string()
        } else {
            "disabled".to_string()
        }
    );
    println!();

    Ok(())
}

/// Build services, run [`diagnose`] and print the report. Fails unless
/// the overall status is `excellent` or `good`.
pub async fn run_selftest(config: &Config, json: bool) -> Result<()> {
    let mut services = Services::from_config(config).await?;
    services.query_log = None;
    let pipeline = RagPipeline::new(services);
    let report = diagnose(&pipeline).await;
    pipeline.services().close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.overall.is_healthy() {
        anyhow::bail!("selftest failed: overall status {}", report.overall.as_str());
    }
    Ok(())
}

fn print_report(report: &SystemReport) {
    println!("RAG Harness — Self-test");
    println!("=======================");
    println!();
    for check in &report.checks {
        let mark = match check.status {
            CheckStatus::Passed => "ok  ",
            CheckStatus::Failed => "FAIL",
        };
        println!("  [{}] {:<13} {}", mark, check.name, check.details);
    }
    println!();
    println!("  Overall: {}", report.overall.as_str());
    if !report.recommendations.is_empty() {
        println!();
        println!("  Recommendations:");
        for r in &report.recommendations {
            println!("    - {}", r);
        }
    }
    println!();
}

fn describe_provider(provider: &str, model: &str) -> String {
    if provider == "disabled" {
        "disabled".to_string()
    } else {
        format!("{} ({})", provider, model)
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
