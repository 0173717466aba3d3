//! Content-addressed cache of page visual descriptions.
//!
//! One JSON file per page hash: `<cache_dir>/<content_hash>.json` holding
//! `{"description": "..."}`. Entries are never invalidated; wiping the
//! directory is the only way to force new vision calls. Writes go to a
//! temporary file first and are renamed into place, so a concurrent reader
//! never sees a half-written entry.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RagError, Result};

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    description: String,
}

#[derive(Debug, Clone)]
pub struct DescriptionCache {
    dir: PathBuf,
}

impl DescriptionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, content_hash: &str) -> PathBuf {
        self.dir.join(format!("{}.json", content_hash))
    }

    pub fn contains(&self, content_hash: &str) -> bool {
        self.entry_path(content_hash).is_file()
    }

    /// The cached description, or `None` on a miss.
    pub fn get(&self, content_hash: &str) -> Result<Option<String>> {
        let path = self.entry_path(content_hash);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RagError::Cache(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let entry: CacheEntry = serde_json::from_str(&raw).map_err(|e| {
            RagError::Cache(format!("corrupt cache entry {}: {}", path.display(), e))
        })?;
        debug!(hash = content_hash, "description cache hit");
        Ok(Some(entry.description))
    }

    pub fn put(&self, content_hash: &str, description: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            RagError::Cache(format!("failed to create {}: {}", self.dir.display(), e))
        })?;
        let entry = CacheEntry {
            description: description.to_string(),
        };
        let json = serde_json::to_string_pretty(&entry)
            .map_err(|e| RagError::Cache(e.to_string()))?;

        let final_path = self.entry_path(content_hash);
        let tmp_path = self
            .dir
            .join(format!(".{}.{}.tmp", content_hash, uuid::Uuid::new_v4()));
        std::fs::write(&tmp_path, json)
            .and_then(|_| std::fs::rename(&tmp_path, &final_path))
            .map_err(|e| {
                let _ = std::fs::remove_file(&tmp_path);
                RagError::Cache(format!("failed to write {}: {}", final_path.display(), e))
            })
    }
}
