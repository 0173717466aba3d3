//! Recursive character chunker.
//!
//! Each [`PageRecord`] becomes one labeled block (page text followed by the
//! visual description), and each block is split on its own, so a chunk can
//! mix text and description of one page but never spans two pages.
//!
//! Splitting tries separators from coarsest to finest (`"\n\n"`, `"\n"`,
//! `" "`, then single characters). Pieces shorter than `max_chars` are
//! merged greedily into windows that carry up to `overlap_chars` of trailing
//! context into the next chunk; pieces that are still too long are split
//! again with the next separator. All lengths are in `char`s.
//!
//! Chunk ids are SHA-256 digests of `(file, page, index)`, so re-chunking
//! the same pages yields the same ids and re-indexing upserts in place.

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ChunkMetadata, PageRecord};

const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Deterministic id for chunk `chunk_index` of a page.
pub fn chunk_id(source_file: &str, page_number: u32, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}-page{}-chunk{}", source_file, page_number, chunk_index).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The text that gets split for one page.
pub fn page_block(page: &PageRecord) -> String {
    format!(
        "--- Page {} of '{}' ---\n\nPAGE TEXT:\n{}\n\nVISUAL DESCRIPTION (charts, images, etc.):\n{}\n",
        page.page_number, page.source_file, page.raw_text, page.visual_description
    )
}

#[derive(Debug, Clone)]
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
    separators: Vec<String>,
}

impl Chunker {
    /// `overlap_chars` is clamped below `max_chars`.
    pub fn new(max_chars: usize, overlap_chars: usize) -> Self {
        let max_chars = max_chars.max(1);
        Self {
            max_chars,
            overlap_chars: overlap_chars.min(max_chars - 1),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.max_chars, config.overlap_chars)
    }

    /// Chunk every page, in page order. Pages with neither text nor a
    /// visual description produce nothing.
    pub fn chunk_pages(&self, pages: &[PageRecord]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for page in pages {
            if page.raw_text.trim().is_empty() && page.visual_description.trim().is_empty() {
                continue;
            }
            let pieces = self.split_text(&page_block(page));
            let total_chunks = pieces.len();
            let text_length = page.raw_text.chars().count();
            let description_length = page.visual_description.chars().count();

            for (chunk_index, text) in pieces.into_iter().enumerate() {
                chunks.push(Chunk {
                    id: chunk_id(&page.source_file, page.page_number, chunk_index),
                    text,
                    metadata: ChunkMetadata {
                        source_file: page.source_file.clone(),
                        page_number: page.page_number,
                        chunk_index,
                        total_chunks,
                        text_length,
                        description_length,
                    },
                });
            }
        }
        chunks
    }

    /// Split `text` into trimmed, non-empty pieces of at most `max_chars`.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let separators: Vec<&str> = self.separators.iter().map(String::as_str).collect();
        self.split_recursive(text, &separators)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&str] = &[];
        for (i, &sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = sep;
                break;
            }
            if text.contains(sep) {
                separator = sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let splits: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut out = Vec::new();
        let mut short: Vec<&str> = Vec::new();
        for piece in splits {
            if char_len(piece) < self.max_chars {
                short.push(piece);
                continue;
            }
            if !short.is_empty() {
                out.extend(self.merge_splits(&short, separator));
                short.clear();
            }
            if finer.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
            } else {
                out.extend(self.split_recursive(piece, finer));
            }
        }
        if !short.is_empty() {
            out.extend(self.merge_splits(&short, separator));
        }
        out
    }

    /// Greedily join pieces into windows of at most `max_chars`, keeping up
    /// to `overlap_chars` of the previous window at the start of the next.
    fn merge_splits(&self, splits: &[&str], separator: &str) -> Vec<String> {
        let sep_len = char_len(separator);
        let mut docs = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in splits {
            let len = char_len(piece);
            let joined_len = |current: &VecDeque<&str>, total: usize| {
                total + len + if current.is_empty() { 0 } else { sep_len }
            };

            if joined_len(&current, total) > self.max_chars && !current.is_empty() {
                push_joined(&mut docs, &current, separator);
                while total > self.overlap_chars
                    || (joined_len(&current, total) > self.max_chars && total > 0)
                {
                    let Some(front) = current.pop_front() else {
                        break;
                    };
                    let dropped = char_len(front) + if current.is_empty() { 0 } else { sep_len };
                    total = total.saturating_sub(dropped);
                }
            }

            current.push_back(piece);
            total += len + if current.len() > 1 { sep_len } else { 0 };
        }

        push_joined(&mut docs, &current, separator);
        docs
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn push_joined(docs: &mut Vec<String>, current: &VecDeque<&str>, separator: &str) {
    let joined = current.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::page_content_hash;

    fn page(file: &str, n: u32, text: &str, desc: &str) -> PageRecord {
        PageRecord {
            source_file: file.to_string(),
            page_number: n,
            raw_text: text.to_string(),
            visual_description: desc.to_string(),
            content_hash: page_content_hash(file, n, text),
        }
    }

    #[test]
    fn short_text_is_one_chunk() {
        let c = Chunker::new(100, 10);
        assert_eq!(c.split_text("Hello, world!"), vec!["Hello, world!"]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        let c = Chunker::new(100, 10);
        assert!(c.split_text("").is_empty());
        assert!(c.split_text("\n\n  \n").is_empty());
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let c = Chunker::new(30, 0);
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird one.";
        let out = c.split_text(text);
        assert_eq!(
            out,
            vec!["First paragraph here.", "Second paragraph here.", "Third one."]
        );
    }

    #[test]
    fn respects_max_chars() {
        let c = Chunker::new(50, 10);
        let text = (0..200)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let out = c.split_text(&text);
        assert!(out.len() > 1);
        for piece in &out {
            assert!(piece.chars().count() <= 50, "too long: {}", piece);
        }
    }

    #[test]
    fn windows_overlap() {
        let c = Chunker::new(20, 8);
        let out = c.split_text("aaa bbb ccc ddd eee fff ggg hhh");
        assert!(out.len() >= 2);
        assert_eq!(out[0], "aaa bbb ccc ddd eee");
        assert_eq!(out[1], "ddd eee fff ggg hhh");
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() {
        let c = Chunker::new(10, 0);
        let out = c.split_text(&"x".repeat(35));
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|p| p.chars().count() <= 10));
    }

    #[test]
    fn multibyte_text_is_counted_in_chars() {
        let c = Chunker::new(10, 0);
        let out = c.split_text(&"é".repeat(25));
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].chars().count(), 10);
    }

    #[test]
    fn chunk_ids_are_deterministic() {
        let c = Chunker::new(4000, 500);
        let pages = vec![page("report.pdf", 1, "Industrial output grew 5%.", "")];
        let a = c.chunk_pages(&pages);
        let b = c.chunk_pages(&pages);
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].id, b[0].id);
        assert_eq!(a[0].id, chunk_id("report.pdf", 1, 0));
    }

    #[test]
    fn chunks_never_span_pages() {
        let c = Chunker::new(4000, 500);
        let pages = vec![
            page("r.pdf", 1, "alpha", "a bar chart"),
            page("r.pdf", 2, "beta", ""),
        ];
        let chunks = c.chunk_pages(&pages);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.contains("alpha") && chunks[0].text.contains("bar chart"));
        assert!(!chunks[0].text.contains("beta"));
        assert_eq!(chunks[1].metadata.page_number, 2);
        assert_eq!(chunks[0].metadata.description_length, 11);
    }

    #[test]
    fn metadata_counts_chunks_per_page() {
        let c = Chunker::new(200, 20);
        let long = (0..100)
            .map(|i| format!("Sentence number {}.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = c.chunk_pages(&[page("r.pdf", 3, &long, "")]);
        let total = chunks.len();
        assert!(total > 1);
        for (i, ch) in chunks.iter().enumerate() {
            assert_eq!(ch.metadata.chunk_index, i);
            assert_eq!(ch.metadata.total_chunks, total);
        }
    }

    #[test]
    fn blank_pages_are_skipped() {
        let c = Chunker::new(4000, 500);
        assert!(c.chunk_pages(&[page("r.pdf", 1, "  \n", "")]).is_empty());
    }
}
