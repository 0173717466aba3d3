//! PDF → page records.
//!
//! For every page: extract the text, hash `(file, page, text prefix)`, and
//! attach a description of the page's visuals (from the cache, or from the
//! vision describer on a miss).
//!
//! Text comes from `pdf-extract`, which handles font encodings well but can
//! fail or even panic on unusual files. It runs under `catch_unwind`; when it
//! fails, or leaves a page blank, `lopdf`'s own text extraction is tried for
//! that page.
//!
//! Loading, text extraction and page rendering are blocking work and run on
//! tokio's blocking pool.
//!
//! Failure policy:
//! - the file can't be opened or parsed → `Err`, the caller skips the file
//! - a page's text can't be extracted → that page is skipped and counted
//! - the page image or its description fails → the page keeps its text with
//!   an empty description, and the failure is counted

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lopdf::Document;
use tracing::{debug, warn};

use crate::error::{RagError, Result};
use crate::models::{page_content_hash, PageRecord};
use crate::page_image::encode_for_vision;
use crate::pipeline::Services;
use crate::retry::with_retry;

/// Pages extracted from one PDF plus per-page failure counts.
#[derive(Debug, Default)]
pub struct FileExtraction {
    pub pages: Vec<PageRecord>,
    pub failed_pages: usize,
    pub failed_descriptions: usize,
    pub cached_descriptions: usize,
}

/// A parsed PDF and the text of each page, keyed by 1-based page number.
/// A page whose text could not be extracted maps to `Err(reason)`.
pub struct LoadedPdf {
    pub document: Arc<Document>,
    pub page_texts: BTreeMap<u32, std::result::Result<String, String>>,
}

/// Extract every page of `pdf_path`, in page order. `source_file` is the
/// name recorded in page metadata (the path relative to the corpus root).
pub async fn extract_pdf(
    services: &Services,
    pdf_path: &Path,
    source_file: &str,
) -> Result<FileExtraction> {
    let loaded = load_pdf(pdf_path, source_file).await?;
    Ok(describe_pages(services, pdf_path, source_file, loaded).await)
}

/// Parse the file and pull the text of every page.
pub async fn load_pdf(pdf_path: &Path, source_file: &str) -> Result<LoadedPdf> {
    let path = pdf_path.to_path_buf();
    let source = source_file.to_string();
    tokio::task::spawn_blocking(move || {
        let document = Document::load(&path).map_err(|e| RagError::Extraction {
            source_file: source.clone(),
            message: format!("failed to open PDF: {}", e),
        })?;
        let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        debug!(file = %source, pages = page_numbers.len(), "PDF opened");
        let page_texts = page_texts(&path, &document, &page_numbers);
        Ok(LoadedPdf {
            document: Arc::new(document),
            page_texts,
        })
    })
    .await
    .map_err(|e| RagError::Extraction {
        source_file: source_file.to_string(),
        message: format!("extraction task failed: {}", e),
    })?
}

/// Turn loaded page texts into page records, attaching visual
/// descriptions. Pages without text are skipped and counted.
pub async fn describe_pages(
    services: &Services,
    pdf_path: &Path,
    source_file: &str,
    loaded: LoadedPdf,
) -> FileExtraction {
    let LoadedPdf {
        document,
        page_texts,
    } = loaded;
    let mut out = FileExtraction::default();

    for (page_number, text) in page_texts {
        let raw_text = match text {
            Ok(text) => text,
            Err(message) => {
                warn!(
                    file = source_file,
                    page = page_number,
                    error = %message,
                    "skipping page: text extraction failed"
                );
                out.failed_pages += 1;
                continue;
            }
        };

        let content_hash = page_content_hash(source_file, page_number, &raw_text);

        let visual_description = match services.cache.get(&content_hash) {
            Ok(Some(description)) => {
                out.cached_descriptions += 1;
                description
            }
            other => {
                if let Err(e) = other {
                    warn!(
                        file = source_file,
                        page = page_number,
                        error = %e,
                        "ignoring unreadable cache entry"
                    );
                }
                let described =
                    describe_page(services, pdf_path, &document, page_number, &content_hash).await;
                match described {
                    Ok(description) => description,
                    Err(e) => {
                        warn!(
                            file = source_file,
                            page = page_number,
                            error = %e,
                            "visual description failed; keeping page text only"
                        );
                        out.failed_descriptions += 1;
                        String::new()
                    }
                }
            }
        };

        debug!(
            file = source_file,
            page = page_number,
            text_chars = raw_text.chars().count(),
            description_chars = visual_description.chars().count(),
            "page extracted"
        );

        out.pages.push(PageRecord {
            source_file: source_file.to_string(),
            page_number,
            raw_text,
            visual_description,
            content_hash,
        });
    }

    out
}

/// Render the page, ask the vision describer (with retry), and cache the
/// result. Pages without an image get an empty description and no call.
async fn describe_page(
    services: &Services,
    pdf_path: &Path,
    document: &Arc<Document>,
    page_number: u32,
    content_hash: &str,
) -> Result<String> {
    if !services.vision.is_enabled() {
        return Ok(String::new());
    }

    let Some(png) = render_png(services, pdf_path, document, page_number).await? else {
        return Ok(String::new());
    };

    let vision = services.vision.as_ref();
    let png = png.as_slice();
    let description = with_retry(
        &services.settings.vision_retry,
        services.sleeper.as_ref(),
        "vision describe",
        move || vision.describe(png),
    )
    .await?;

    if let Err(e) = services.cache.put(content_hash, &description) {
        warn!(page = page_number, error = %e, "failed to cache description");
    }
    Ok(description)
}

/// Render and PNG-encode one page on the blocking pool.
async fn render_png(
    services: &Services,
    pdf_path: &Path,
    document: &Arc<Document>,
    page_number: u32,
) -> Result<Option<Vec<u8>>> {
    let renderer = Arc::clone(&services.renderer);
    let document = Arc::clone(document);
    let path: PathBuf = pdf_path.to_path_buf();
    let max_dim = services.settings.max_image_dim;

    tokio::task::spawn_blocking(move || {
        renderer
            .render(&path, &document, page_number)?
            .map(|image| encode_for_vision(image, max_dim))
            .transpose()
    })
    .await
    .map_err(|e| RagError::Extraction {
        source_file: pdf_path.display().to_string(),
        message: format!("render task for page {} failed: {}", page_number, e),
    })?
}

/// Text for every page, keyed by 1-based page number.
fn page_texts(
    pdf_path: &Path,
    document: &Document,
    page_numbers: &[u32],
) -> BTreeMap<u32, std::result::Result<String, String>> {
    let by_pages = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_by_pages(pdf_path)
    }));

    let primary: Vec<String> = match by_pages {
        Ok(Ok(pages)) if pages.len() == page_numbers.len() => pages,
        Ok(Ok(pages)) => {
            debug!(
                expected = page_numbers.len(),
                got = pages.len(),
                "pdf-extract page count mismatch, using lopdf"
            );
            Vec::new()
        }
        Ok(Err(e)) => {
            debug!(error = %e, "pdf-extract failed, using lopdf");
            Vec::new()
        }
        Err(_) => {
            debug!("pdf-extract panicked, using lopdf");
            Vec::new()
        }
    };

    page_numbers
        .iter()
        .enumerate()
        .map(|(i, &page_number)| {
            let text = match primary.get(i) {
                Some(text) if !text.trim().is_empty() => Ok(text.clone()),
                // Blank is a valid result for image-only pages.
                Some(blank) => Ok(document
                    .extract_text(&[page_number])
                    .unwrap_or_else(|_| blank.clone())),
                None => document
                    .extract_text(&[page_number])
                    .map_err(|e| e.to_string()),
            };
            (page_number, text)
        })
        .collect()
}
