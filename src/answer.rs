//! Grounded answer synthesis.
//!
//! The completion model gets a system instruction that confines it to the
//! supplied documents, followed by the documents themselves, each labeled
//! with source file, page and confidence. The user message is the question.

use std::path::Path;

use tracing::{info, warn};

use crate::completion::Completer;
use crate::error::{RagError, Result};
use crate::models::RerankedDocument;
use crate::retry::{with_retry, RetryPolicy, Sleeper};

/// Context block used in place of documents when there are none.
pub const NO_DOCUMENTS_MARKER: &str =
    "[NO RELEVANT DOCUMENTS FOUND: no document in the collection matched this question.]";

/// Response when retrieval finds nothing.
pub const NO_DOCUMENTS_RESPONSE: &str = "No relevant documents were found for this question.";

/// Response when the completion call fails.
pub const SYNTHESIS_FAILED_RESPONSE: &str =
    "An error occurred while generating the answer. Please try again.";

/// What the model is told to say when the documents don't answer the question.
pub const INSUFFICIENT_DATA_REPLY: &str = "I don't have enough information to answer this \
question from the available data. Could you rephrase it or make it more specific?";

/// The system instruction for `domain`, with `context` as the document block.
pub fn system_prompt(domain: &str, context: &str) -> String {
    format!(
        "You are an assistant specialized in {domain}.\n\
         \n\
         Use ONLY the documents provided below to answer the user's question. \
         Never invent information. If the documents do not contain enough data, say so clearly.\n\
         \n\
         Each document may contain:\n\
         1. PAGE TEXT: the text extracted from a PDF page.\n\
         2. VISUAL DESCRIPTION: a detailed description of the charts, tables and images on that page. \
         Use it to answer questions about visual content.\n\
         \n\
         Your answer must:\n\
         1. Be formal, technical, clear and direct.\n\
         2. Be structured with numbered points or sections when appropriate.\n\
         3. Include facts and figures, citing the source file and page inline, e.g. (report.pdf, p. 3).\n\
         4. Avoid repetition.\n\
         5. State explicitly when the available information is limited.\n\
         \n\
         If the documents are insufficient or irrelevant to the question, answer exactly:\n\
         \"{insufficient}\"\n\
         \n\
         Relevant documents:\n\
         {context}\n",
        domain = domain,
        insufficient = INSUFFICIENT_DATA_REPLY,
        context = context,
    )
}

/// Label and join documents for the prompt. `scores` is parallel to
/// `documents`. An empty list gives [`NO_DOCUMENTS_MARKER`].
pub fn format_context(documents: &[RerankedDocument], scores: &[f32]) -> String {
    if documents.is_empty() {
        return NO_DOCUMENTS_MARKER.to_string();
    }
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            let meta = &doc.document.metadata;
            let normalized = meta.source_file.replace('\\', "/");
            let source = Path::new(&normalized)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| meta.source_file.clone());
            let score = scores.get(i).copied().unwrap_or(0.0);
            format!(
                "--- Document {} | Source: {} | Page {} | Confidence {:.4} ---\n{}",
                i + 1,
                source,
                meta.page_number,
                score,
                doc.document.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Drives the completion call for one question.
pub struct AnswerSynthesizer<'a> {
    pub completer: &'a dyn Completer,
    pub sleeper: &'a dyn Sleeper,
    pub retry: &'a RetryPolicy,
    pub domain: &'a str,
}

impl AnswerSynthesizer<'_> {
    /// One completion (retried on transient errors) over the labeled
    /// documents. Errors are returned to the caller; a blank answer is an
    /// error too.
    pub async fn generate(
        &self,
        query: &str,
        documents: &[RerankedDocument],
        scores: &[f32],
    ) -> Result<String> {
        let system = system_prompt(self.domain, &format_context(documents, scores));
        let completer = self.completer;
        let answer = with_retry(self.retry, self.sleeper, "completion", || {
            completer.complete(&system, query)
        })
        .await?;
        if answer.trim().is_empty() {
            return Err(RagError::Completion {
                message: format!("{} returned an empty answer", completer.model_name()),
                transient: false,
            });
        }
        info!(
            model = completer.model_name(),
            documents = documents.len(),
            answer_chars = answer.chars().count(),
            "answer generated"
        );
        Ok(answer)
    }

    /// [`generate`](Self::generate), with failures replaced by
    /// [`SYNTHESIS_FAILED_RESPONSE`]. Never empty.
    pub async fn synthesize(
        &self,
        query: &str,
        documents: &[RerankedDocument],
        scores: &[f32],
    ) -> String {
        match self.generate(query, documents, scores).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "answer synthesis failed");
                SYNTHESIS_FAILED_RESPONSE.to_string()
            }
        }
    }
}
