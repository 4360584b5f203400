//! Guideline retrieval for RxGuard.
//!
//! Text guideline documents are split into overlapping character windows,
//! embedded with a feature-hashing model and persisted as a JSON index. The
//! [`GuidelineStore`] loads or builds that index once per process and serves
//! top-k similarity search through [`rxguard_core::RetrievalService`].

pub mod chunker;
pub mod embedder;
pub mod error;
pub mod index;
pub mod loader;
pub mod store;
pub mod types;

pub use chunker::{FixedSizeChunker, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
pub use embedder::{embedder_for, HashingEmbedder, DEFAULT_EMBEDDING_MODEL};
pub use error::IndexError;
pub use index::{GuidelineIndex, IndexedChunk, INDEX_FILE};
pub use loader::{load_corpus, GuidelineDocument};
pub use store::{GuidelineStore, GuidelineStoreConfig};
pub use types::{Chunker, EmbeddingModel, TextChunk};
