//! # RAG Harness
//!
//! Retrieval-augmented question answering over a private PDF corpus.
//!
//! Ingestion turns every page of every PDF into text plus a description of
//! its visuals (charts, tables, images), chunks it, embeds the chunks and
//! stores them in a named collection. A query retrieves the nearest chunks,
//! reranks them, scores confidence, and asks a completion model for an
//! answer grounded only in those chunks.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌───────────────┐   ┌──────────┐
//! │   PDFs   │──▶│  Extract    │──▶│ Chunk + Embed │──▶│  SQLite  │
//! │  corpus  │   │ text+vision │   │    (index)    │   │ vectors  │
//! └──────────┘   └─────────────┘   └───────────────┘   └────┬─────┘
//!                                                           │
//!        ┌──────────────────────────────────────────────────┘
//!        ▼
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌────────────┐
//! │ Retrieve │──▶│  Rerank  │──▶│ Confidence │──▶│ Synthesize │──▶ QueryResult
//! └──────────┘   └──────────┘   └────────────┘   └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag init                          # create database
//! rag ingest ./data/pdfs            # extract, chunk, embed, store
//! rag ask "What was industrial output growth in 2023?"
//! rag status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Stage error type |
//! | [`models`] | Core data types |
//! | [`retry`] | Backoff for external calls |
//! | [`corpus`] | Finding PDFs |
//! | [`extract`] | PDF pages to text and visual descriptions |
//! | [`page_image`] | Page images for the vision model |
//! | [`vision`] | Vision-description collaborator |
//! | [`cache`] | Visual description cache |
//! | [`chunk`] | Recursive text splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store backends |
//! | [`index`] | Batched indexing and the store self-test |
//! | [`ingest`] | Ingestion entry point |
//! | [`retrieve`] | Nearest-neighbour retrieval |
//! | [`rerank`] | Cross-encoder reranking with fallback |
//! | [`confidence`] | Confidence scores and quality |
//! | [`answer`] | Grounded answer synthesis |
//! | [`ask`] | `rag ask` |
//! | [`completion`] | Completion collaborator |
//! | [`query_log`] | CSV audit log |
//! | [`pipeline`] | Service wiring and the query entry point |
//! | [`status`] | `rag status` and `rag selftest` |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod ask;
pub mod cache;
pub mod chunk;
pub mod completion;
pub mod confidence;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
mod openai;
pub mod page_image;
pub mod pipeline;
pub mod progress;
pub mod query_log;
pub mod rerank;
pub mod retrieve;
pub mod retry;
pub mod status;
pub mod store;
pub mod vision;
