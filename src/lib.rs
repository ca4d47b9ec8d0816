//! # archivist
//!
//! A retrieval-augmented-generation data plane over PostgreSQL, using the
//! `vectorscale` extension for DiskANN vector search and `pg_textsearch`
//! for BM25 full-text ranking. Documents are chunked, deduplicated by
//! content hash, embedded through a caller-supplied provider, and served
//! back through hybrid retrieval expanded along a document relation graph.
//!
//! ## Module Overview
//!
//! - [`config`] - Store configuration (connection string, dimension, BM25 text config)
//! - [`error`] - Error types and the crate-wide `Result`
//! - [`hash`] - SHA-256 identity hashing for documents and chunk texts
//! - [`chunk`] - Markdown-aware hierarchical chunker with offset recovery
//! - [`embed`] - The `Embedder` trait and ordered batch embedding
//! - [`rerank`] - The `Reranker` trait for optional cross-encoder reranking
//! - [`models`] - Shared types: documents, search results, relations, stats
//! - [`ingest`] - Deduplicating ingest pipeline with relation resolution
//! - [`search`] - Vector / BM25 / hybrid RRF search, graph expansion, community boost
//! - [`community`] - Union-find community detection, summaries, global query
//! - [`backup`] - Line-delimited JSON export / validate / import
//! - [`context`] - Deterministic prompt-context builders
//! - [`store`] - The [`Archive`] facade tying it all together
//!
//! ## Quick start
//!
//! ```no_run
//! use archivist::{Archive, StoreConfig};
//! use archivist::ingest::IngestOptions;
//! use archivist::models::DocumentInput;
//! use archivist::search::SearchOptions;
//! # async fn run(embedder: &dyn archivist::embed::Embedder) -> archivist::Result<()> {
//! let archive = Archive::connect(StoreConfig {
//!     connection_string: "postgres://localhost/rag".into(),
//!     dimension: 1024,
//!     ..StoreConfig::default()
//! })?;
//! archive.init().await?;
//!
//! let docs = vec![DocumentInput::new("Title", "Body text of the document...")];
//! archive.ingest(&docs, &IngestOptions::new(embedder)).await?;
//!
//! let results = archive
//!     .retrieve(embedder, &SearchOptions::new("body text"))
//!     .await?;
//! # let _ = results;
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod chunk;
pub mod community;
pub mod config;
pub mod context;
pub mod embed;
pub mod error;
pub mod hash;
pub mod ingest;
pub mod models;
pub mod rerank;
pub mod search;
pub mod store;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use store::Archive;
