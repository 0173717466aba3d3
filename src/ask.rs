//! `rag ask`: answer one question from the command line.

use anyhow::Result;

use crate::config::Config;
use crate::models::QueryResult;
use crate::pipeline::{RagPipeline, Services};

/// Run one query and print the answer with its sources, or the whole
/// [`QueryResult`] as JSON.
pub async fn run_ask(
    config: &Config,
    question: &str,
    collection: Option<&str>,
    top_k: Option<usize>,
    final_k: Option<usize>,
    json: bool,
) -> Result<()> {
    let mut services = Services::from_config(config).await?;
    if let Some(name) = collection {
        services.settings.collection = name.to_string();
    }
    let top_k = top_k.unwrap_or(config.retrieval.top_k_retrieve);
    let final_k = final_k.unwrap_or(config.retrieval.top_k_final);

    let pipeline = RagPipeline::new(services);
    let result = pipeline.query(question, top_k, final_k).await;
    pipeline.services().close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn print_result(result: &QueryResult) {
    println!("{}", result.response);
    println!();

    if !result.reranked_documents.is_empty() {
        println!("Sources:");
        for (i, doc) in result.reranked_documents.iter().enumerate() {
            let score = result.confidence_scores.get(i).copied().unwrap_or(0.0);
            println!(
                "  {}. {} (page {})  confidence {:.3}",
                i + 1,
                doc.document.metadata.source_file,
                doc.document.metadata.page_number,
                score
            );
        }
        println!();
    }

    println!(
        "confidence: {:.3} ({}){}",
        result.confidence.mean,
        result.confidence.quality.as_str(),
        if result.confidence.has_sufficient_data {
            ""
        } else {
            ", insufficient data"
        }
    );
    println!(
        "retrieved {}, reranked {}{}, {:.0} ms",
        result.retrieved_documents.len(),
        result.reranked_documents.len(),
        if result.reranking_enabled {
            ""
        } else {
            " (reranker off)"
        },
        result.processing_time_ms
    );
    if let Some(error) = &result.error {
        println!("error: {}", error);
    }
}
