#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tempfile::TempDir;

use rag_harness::cache::DescriptionCache;
use rag_harness::completion::Completer;
use rag_harness::embedding::Embedder;
use rag_harness::error::{RagError, Result};
use rag_harness::page_image::{NoRenderer, PageRenderer};
use rag_harness::pipeline::{PipelineSettings, Services};
use rag_harness::rerank::Reranker;
use rag_harness::retry::Sleeper;
use rag_harness::store::memory::InMemoryStore;
use rag_harness::vision::{DisabledVision, VisionDescriber};

pub const DIMS: usize = 64;

/// Bag-of-words embedder: each lowercase word is hashed into one of
/// [`DIMS`] buckets, then the vector is L2-normalized. Texts sharing words
/// end up close.
pub struct HashingEmbedder {
    pub calls: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

fn bucket(word: &str) -> usize {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in word.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    (h % DIMS as u64) as usize
}

pub fn hash_embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        v[bucket(&word.to_lowercase())] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    } else {
        v[0] = 1.0;
    }
    v
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing-test"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }
}

/// Same vectors as [`HashingEmbedder`], but call number `fail_on`
/// (0-based) fails with a permanent error.
pub struct FlakyEmbedder {
    pub calls: AtomicUsize,
    pub fail_on: usize,
}

impl FlakyEmbedder {
    pub fn new(fail_on: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on,
        }
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "hashing-test"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == self.fail_on {
            return Err(RagError::Embedding {
                provider: "flaky".into(),
                message: "HTTP 400: input rejected".into(),
                transient: false,
            });
        }
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }
}

/// Answers with the document block of the system prompt, so whatever the
/// documents say shows up in the response.
#[derive(Default)]
pub struct EchoCompleter {
    pub calls: AtomicUsize,
    pub last_system: Mutex<Option<String>>,
}

#[async_trait]
impl Completer for EchoCompleter {
    fn model_name(&self) -> &str {
        "echo"
    }
    async fn complete(&self, system: &str, _user: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_system.lock().unwrap() = Some(system.to_string());
        let context = system
            .split("Relevant documents:\n")
            .nth(1)
            .unwrap_or(system);
        Ok(format!("Based on the documents: {}", context.trim()))
    }
}

/// Always fails, transiently, so the retry loop runs to exhaustion.
#[derive(Default)]
pub struct DownCompleter {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Completer for DownCompleter {
    fn model_name(&self) -> &str {
        "down"
    }
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RagError::Completion {
            message: "HTTP 503".into(),
            transient: true,
        })
    }
}

/// Replies with whitespace only.
pub struct BlankCompleter;

#[async_trait]
impl Completer for BlankCompleter {
    fn model_name(&self) -> &str {
        "blank"
    }
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        Ok("  \n ".into())
    }
}

/// Throws on every scoring call.
pub struct ThrowingReranker;

#[async_trait]
impl Reranker for ThrowingReranker {
    fn name(&self) -> &str {
        "throwing"
    }
    async fn score(&self, _query: &str, _texts: &[String]) -> Result<Vec<f32>> {
        Err(RagError::Rerank {
            reranker: "throwing".into(),
            message: "predict failed".into(),
        })
    }
}

/// Scores by word overlap with the query, in `[0, 1]`.
pub struct OverlapReranker;

#[async_trait]
impl Reranker for OverlapReranker {
    fn name(&self) -> &str {
        "overlap"
    }
    async fn score(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                let hits = words.iter().filter(|w| t.contains(w.as_str())).count();
                hits as f32 / words.len().max(1) as f32
            })
            .collect())
    }
}

/// Records requested sleeps without waiting.
#[derive(Default)]
pub struct RecordingSleeper {
    pub slept: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

/// Returns a solid image for every page.
pub struct SolidRenderer;

impl PageRenderer for SolidRenderer {
    fn name(&self) -> &str {
        "solid"
    }
    fn render(&self, _: &Path, _: &Document, _: u32) -> Result<Option<DynamicImage>> {
        Ok(Some(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            40,
            30,
            image::Rgb([200, 30, 30]),
        ))))
    }
}

/// Describes every page the same way, failing the first `fail_first` calls
/// with a transient error.
pub struct FakeVision {
    pub calls: AtomicUsize,
    pub fail_first: usize,
}

impl FakeVision {
    pub fn new(fail_first: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_first,
        }
    }
}

#[async_trait]
impl VisionDescriber for FakeVision {
    async fn describe(&self, png: &[u8]) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(RagError::Vision {
                message: "HTTP 429".into(),
                transient: true,
            });
        }
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
        Ok("A red bar chart of industrial output by quarter.".into())
    }
}

pub struct TestEnv {
    pub tmp: TempDir,
    pub embedder: Arc<HashingEmbedder>,
    pub completer: Arc<EchoCompleter>,
    pub sleeper: Arc<RecordingSleeper>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            tmp: TempDir::new().unwrap(),
            embedder: Arc::new(HashingEmbedder::new()),
            completer: Arc::new(EchoCompleter::default()),
            sleeper: Arc::new(RecordingSleeper::default()),
        }
    }

    pub fn path(&self) -> &Path {
        self.tmp.path()
    }

    pub fn corpus_dir(&self) -> PathBuf {
        let dir = self.tmp.path().join("corpus");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    /// In-memory services with text-only extraction, no reranker and no
    /// query log.
    pub fn services(&self) -> Services {
        Services {
            store: Arc::new(InMemoryStore::new()),
            embedder: self.embedder.clone(),
            renderer: Arc::new(NoRenderer),
            vision: Arc::new(DisabledVision),
            completer: self.completer.clone(),
            reranker: None,
            cache: DescriptionCache::new(self.tmp.path().join("cache")),
            query_log: None,
            sleeper: self.sleeper.clone(),
            settings: PipelineSettings {
                collection: "test".to_string(),
                ..PipelineSettings::default()
            },
        }
    }
}

/// Write a PDF with one page per entry of `pages`, each showing its text in
/// Helvetica.
pub fn write_pdf(path: &Path, pages: &[&str]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 14.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}
