//! CSV audit log of answered queries.
//!
//! One row per query, appended to `<dir>/rag_log_<YYYYMMDD_HHMMSS>.csv`
//! (per process run) or to a fixed file name. The header row is written when
//! the file is new or empty. Each row is serialized in memory and written
//! with a single `write_all` on a file opened in append mode, so rows from
//! concurrent writers don't interleave.
//!
//! Logging never fails a query: [`QueryLogger::log`] swallows every error
//! after a `warn!`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::QueryLogConfig;
use crate::error::Result;
use crate::models::QueryResult;

const QUERY_MAX_CHARS: usize = 200;

const HEADER: [&str; 10] = [
    "timestamp",
    "query",
    "response_length",
    "retrieved_count",
    "reranked_count",
    "reranking_enabled",
    "confidence_avg",
    "confidence_scores",
    "processing_time_ms",
    "error",
];

#[derive(Debug, Clone)]
pub struct QueryLogger {
    path: PathBuf,
}

impl QueryLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `None` when logging is disabled.
    pub fn from_config(config: &QueryLogConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let file_name = config.file_name.clone().unwrap_or_else(|| {
            format!(
                "rag_log_{}.csv",
                chrono::Local::now().format("%Y%m%d_%H%M%S")
            )
        });
        Some(Self::new(config.dir.join(file_name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row for `result`. Errors are logged and dropped.
    pub fn log(&self, result: &QueryResult) {
        match self.try_log(result) {
            Ok(()) => debug!(path = %self.path.display(), "query logged"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "query log write failed"),
        }
    }

    fn try_log(&self, result: &QueryResult) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let needs_header = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        if needs_header {
            writer.write_record(HEADER).map_err(csv_err)?;
        }
        writer.write_record(row(result)).map_err(csv_err)?;
        let bytes = writer.into_inner().map_err(|e| csv_err(e.into_error()))?;

        file.write_all(&bytes)?;
        Ok(())
    }
}

fn csv_err(e: impl std::fmt::Display) -> crate::error::RagError {
    crate::error::RagError::Io(std::io::Error::other(e.to_string()))
}

/// Newlines become spaces; at most 200 characters.
pub fn sanitize_query(query: &str) -> String {
    query
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .take(QUERY_MAX_CHARS)
        .collect()
}

fn row(result: &QueryResult) -> Vec<String> {
    let scores = result
        .confidence_scores
        .iter()
        .map(|s| format!("{:.4}", s))
        .collect::<Vec<_>>()
        .join(";");
    vec![
        chrono::Local::now().to_rfc3339(),
        sanitize_query(&result.query),
        result.response.chars().count().to_string(),
        result.retrieved_documents.len().to_string(),
        result.reranked_documents.len().to_string(),
        result.reranking_enabled.to_string(),
        format!("{:.4}", result.confidence.mean),
        scores,
        format!("{:.1}", result.processing_time_ms),
        result.error.clone().unwrap_or_default(),
    ]
}
