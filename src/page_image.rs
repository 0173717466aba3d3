//! Page images for the vision describer.
//!
//! | Renderer | Behavior |
//! |----------|----------|
//! | `pdftoppm` | Full page rasterized by poppler's `pdftoppm` at the configured DPI (default) |
//! | `embedded` | Largest image XObject placed on the page, decoded in-process |
//! | `none` | No image; pages are ingested text-only |
//!
//! Only `pdftoppm` sees vector-drawn charts and tables. When it is not on
//! `PATH`, [`create_renderer`] warns and uses `embedded` instead.
//!
//! Whatever the source, [`encode_for_vision`] downscales images larger than
//! the configured maximum (Lanczos3, aspect ratio preserved) and encodes
//! them as PNG.

use std::io::Cursor;
use std::path::Path;
use std::process::Command;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::Document;
use tracing::{debug, warn};

use crate::config::ExtractionConfig;
use crate::error::{RagError, Result};

/// Images with a side shorter than this are bullets, logos, or rules.
const MIN_EMBEDDED_SIDE: i64 = 32;

pub trait PageRenderer: Send + Sync {
    fn name(&self) -> &str;

    /// An image of page `page_number` (1-based), or `None` when the page
    /// has nothing to show.
    fn render(
        &self,
        pdf_path: &Path,
        document: &Document,
        page_number: u32,
    ) -> Result<Option<DynamicImage>>;
}

pub struct NoRenderer;

impl PageRenderer for NoRenderer {
    fn name(&self) -> &str {
        "none"
    }

    fn render(&self, _: &Path, _: &Document, _: u32) -> Result<Option<DynamicImage>> {
        Ok(None)
    }
}

/// Picks the largest decodable image placed on the page.
pub struct EmbeddedImageRenderer;

fn extraction_error(pdf_path: &Path, message: impl Into<String>) -> RagError {
    RagError::Extraction {
        source_file: pdf_path.display().to_string(),
        message: message.into(),
    }
}

impl PageRenderer for EmbeddedImageRenderer {
    fn name(&self) -> &str {
        "embedded"
    }

    fn render(
        &self,
        pdf_path: &Path,
        document: &Document,
        page_number: u32,
    ) -> Result<Option<DynamicImage>> {
        let pages = document.get_pages();
        let page_id = *pages.get(&page_number).ok_or_else(|| {
            extraction_error(pdf_path, format!("page {} not found", page_number))
        })?;

        let mut images = document
            .get_page_images(page_id)
            .map_err(|e| extraction_error(pdf_path, format!("page {}: {}", page_number, e)))?;
        images.retain(|img| img.width >= MIN_EMBEDDED_SIDE && img.height >= MIN_EMBEDDED_SIDE);
        images.sort_by_key(|img| std::cmp::Reverse(img.width * img.height));

        for img in &images {
            let filters = img.filters.clone().unwrap_or_default();
            let decoded = if filters.iter().any(|f| f == "DCTDecode") {
                image::load_from_memory(img.content).ok()
            } else {
                let raw = if filters.is_empty() {
                    Some(img.content.to_vec())
                } else if filters.iter().all(|f| f == "FlateDecode") {
                    document
                        .get_object(img.id)
                        .and_then(|o| o.as_stream())
                        .and_then(|s| s.decompressed_content())
                        .ok()
                } else {
                    None
                };
                raw.and_then(|bytes| {
                    decode_raw(
                        bytes,
                        img.width as u32,
                        img.height as u32,
                        img.color_space.as_deref(),
                        img.bits_per_component,
                    )
                })
            };

            if let Some(decoded) = decoded {
                debug!(
                    page = page_number,
                    width = decoded.width(),
                    height = decoded.height(),
                    "using embedded page image"
                );
                return Ok(Some(decoded));
            }
            debug!(page = page_number, ?filters, "skipping undecodable image");
        }
        Ok(None)
    }
}

/// Decode an unfiltered 8-bit RGB or grayscale sample buffer.
fn decode_raw(
    mut bytes: Vec<u8>,
    width: u32,
    height: u32,
    color_space: Option<&str>,
    bits_per_component: Option<i64>,
) -> Option<DynamicImage> {
    if bits_per_component.unwrap_or(8) != 8 {
        return None;
    }
    let pixels = width as usize * height as usize;
    match color_space {
        Some("DeviceRGB") => {
            bytes.truncate(pixels * 3);
            RgbImage::from_raw(width, height, bytes).map(DynamicImage::ImageRgb8)
        }
        Some("DeviceGray") => {
            bytes.truncate(pixels);
            GrayImage::from_raw(width, height, bytes).map(DynamicImage::ImageLuma8)
        }
        _ => None,
    }
}

const PDFTOPPM: &str = "pdftoppm";

/// Whether `program` resolves to a file in one of the `PATH` directories.
fn program_on_path(program: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| {
                dir.join(program).is_file() || dir.join(format!("{}.exe", program)).is_file()
            })
        })
        .unwrap_or(false)
}

fn rasterizer_or_fallback(dpi: u32, available: bool) -> Box<dyn PageRenderer> {
    if available {
        Box::new(PdftoppmRenderer::new(dpi))
    } else {
        warn!(
            "pdftoppm not found on PATH; falling back to embedded page images, \
             vector-drawn charts will not be described"
        );
        Box::new(EmbeddedImageRenderer)
    }
}

/// Rasterizes the whole page with poppler's `pdftoppm`.
pub struct PdftoppmRenderer {
    dpi: u32,
}

impl PdftoppmRenderer {
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }
}

impl PageRenderer for PdftoppmRenderer {
    fn name(&self) -> &str {
        "pdftoppm"
    }

    fn render(
        &self,
        pdf_path: &Path,
        _document: &Document,
        page_number: u32,
    ) -> Result<Option<DynamicImage>> {
        let page = page_number.to_string();
        let output = Command::new(PDFTOPPM)
            .args(["-r", &self.dpi.to_string(), "-f", &page, "-l", &page, "-png"])
            .arg(pdf_path)
            .output()
            .map_err(|e| extraction_error(pdf_path, format!("failed to run pdftoppm: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(extraction_error(
                pdf_path,
                format!("pdftoppm failed on page {}: {}", page_number, stderr.trim()),
            ));
        }

        let img = image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)
            .map_err(|e| extraction_error(pdf_path, format!("bad pdftoppm output: {}", e)))?;
        Ok(Some(img))
    }
}

pub fn create_renderer(config: &ExtractionConfig) -> Result<Box<dyn PageRenderer>> {
    match config.renderer.as_str() {
        "embedded" => Ok(Box::new(EmbeddedImageRenderer)),
        "pdftoppm" => Ok(rasterizer_or_fallback(
            config.dpi,
            program_on_path(PDFTOPPM),
        )),
        "none" => Ok(Box::new(NoRenderer)),
        other => Err(RagError::Config(format!(
            "Unknown extraction.renderer: {}",
            other
        ))),
    }
}

/// Downscale to fit `max_dim` on both sides if needed, then encode as PNG.
pub fn encode_for_vision(img: DynamicImage, max_dim: u32) -> Result<Vec<u8>> {
    let img = if img.width() > max_dim || img.height() > max_dim {
        img.resize(max_dim, max_dim, FilterType::Lanczos3)
    } else {
        img
    };
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| RagError::Extraction {
            source_file: String::new(),
            message: format!("PNG encoding failed: {}", e),
        })?;
    Ok(buf)
}
