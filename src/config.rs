use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub reranking: RerankingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub query_log: QueryLogConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            root: default_corpus_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_corpus_root() -> PathBuf {
    PathBuf::from("./data")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string(), "**/*.PDF".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectionConfig {
    #[serde(default = "default_collection_name")]
    pub name: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            name: default_collection_name(),
        }
    }
}

fn default_collection_name() -> String {
    "documents".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    4000
}
fn default_overlap_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_index_batch_size")]
    pub batch_size: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_index_batch_size(),
        }
    }
}

fn default_index_batch_size() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for Ollama (default `http://localhost:11434`) or an
    /// OpenAI-compatible endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embed_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// `pdftoppm` (default), `embedded`, or `none`.
    #[serde(default = "default_renderer")]
    pub renderer: String,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    #[serde(default = "default_max_image_dim")]
    pub max_image_dim: u32,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            renderer: default_renderer(),
            dpi: default_dpi(),
            max_image_dim: default_max_image_dim(),
            cache_dir: default_cache_dir(),
        }
    }
}

fn default_renderer() -> String {
    "pdftoppm".to_string()
}
fn default_dpi() -> u32 {
    150
}
fn default_max_image_dim() -> u32 {
    1024
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

#[derive(Debug, Deserialize, Clone)]
pub struct VisionConfig {
    /// `openai` or `disabled`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_chat_model(),
            url: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_request_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    /// `openai` or `disabled`.
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            model: default_chat_model(),
            url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_request_timeout_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

fn default_completion_provider() -> String {
    "openai".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_request_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reranker_model")]
    pub model: String,
}

impl Default for RerankingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_reranker_model(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_reranker_model() -> String {
    "bge-reranker-base".to_string()
}

/// How distances are turned into confidence when no rerank score exists.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DistanceScale {
    /// Divide by the largest distance in the same result batch.
    Batch,
    /// Divide by `retrieval.max_distance`, independent of the batch.
    Fixed,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k_retrieve")]
    pub top_k_retrieve: usize,
    #[serde(default = "default_top_k_final")]
    pub top_k_final: usize,
    #[serde(default = "default_distance_scale")]
    pub distance_scale: DistanceScale,
    #[serde(default = "default_max_distance")]
    pub max_distance: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k_retrieve: default_top_k_retrieve(),
            top_k_final: default_top_k_final(),
            distance_scale: default_distance_scale(),
            max_distance: default_max_distance(),
        }
    }
}

fn default_top_k_retrieve() -> usize {
    10
}
fn default_top_k_final() -> usize {
    5
}
fn default_distance_scale() -> DistanceScale {
    DistanceScale::Fixed
}
fn default_max_distance() -> f32 {
    2.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryLogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
    /// Fixed file name inside `dir`. When unset, each run writes
    /// `rag_log_<YYYYMMDD_HHMMSS>.csv`.
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for QueryLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_log_dir(),
            file_name: None,
        }
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    /// Subject area the assistant is framed as an expert in.
    #[serde(default = "default_domain")]
    pub domain: String,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
        }
    }
}

fn default_domain() -> String {
    "regional economic data".to_string()
}

impl Config {
    /// Every section at its default, with the database at `./data/rag.sqlite`.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/rag.sqlite"),
            },
            corpus: CorpusConfig::default(),
            collection: CollectionConfig::default(),
            chunking: ChunkingConfig::default(),
            indexing: IndexingConfig::default(),
            embedding: EmbeddingConfig::default(),
            extraction: ExtractionConfig::default(),
            vision: VisionConfig::default(),
            completion: CompletionConfig::default(),
            reranking: RerankingConfig::default(),
            retrieval: RetrievalConfig::default(),
            query_log: QueryLogConfig::default(),
            answer: AnswerConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be smaller than chunking.max_chars");
    }

    if config.indexing.batch_size == 0 {
        anyhow::bail!("indexing.batch_size must be > 0");
    }

    // Validate retrieval
    if config.retrieval.top_k_retrieve == 0 || config.retrieval.top_k_final == 0 {
        anyhow::bail!("retrieval.top_k_retrieve and retrieval.top_k_final must be >= 1");
    }
    if config.retrieval.top_k_final > config.retrieval.top_k_retrieve {
        anyhow::bail!("retrieval.top_k_final must not exceed retrieval.top_k_retrieve");
    }
    if config.retrieval.max_distance <= 0.0 {
        anyhow::bail!("retrieval.max_distance must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Validate extraction
    match config.extraction.renderer.as_str() {
        "embedded" | "pdftoppm" | "none" => {}
        other => anyhow::bail!(
            "Unknown extraction.renderer: '{}'. Must be embedded, pdftoppm, or none.",
            other
        ),
    }
    if config.extraction.dpi < 150 {
        anyhow::bail!("extraction.dpi must be >= 150");
    }
    if config.extraction.max_image_dim == 0 {
        anyhow::bail!("extraction.max_image_dim must be > 0");
    }

    match config.vision.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown vision provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    match config.completion.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.completion.temperature) {
        anyhow::bail!("completion.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}
