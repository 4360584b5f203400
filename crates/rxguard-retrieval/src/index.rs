use std::path::{Path, PathBuf};

use rxguard_core::GuidelinePassage;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::embedder::cosine;
use crate::error::IndexError;
use crate::loader::GuidelineDocument;
use crate::types::{Chunker, EmbeddingModel};

pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub source: String,
    pub page: u32,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// Embedded guideline chunks in corpus order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidelineIndex {
    pub embedding_model: String,
    pub dimension: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub chunks: Vec<IndexedChunk>,
}

impl GuidelineIndex {
    pub fn build(
        documents: &[GuidelineDocument],
        chunker: &dyn Chunker,
        embedder: &dyn EmbeddingModel,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Result<Self, IndexError> {
        let mut chunks = Vec::new();
        for doc in documents {
            for (page, text) in doc.pages.iter().enumerate() {
                let pieces = chunker.chunk(text);
                let texts: Vec<&str> = pieces.iter().map(|c| c.content.as_str()).collect();
                let embeddings = embedder.embed_batch(&texts)?;
                for (piece, embedding) in pieces.into_iter().zip(embeddings) {
                    chunks.push(IndexedChunk {
                        source: doc.source.clone(),
                        page: page as u32,
                        content: piece.content,
                        embedding,
                    });
                }
            }
        }

        info!(
            documents = documents.len(),
            chunks = chunks.len(),
            model = embedder.id(),
            "Built guideline index"
        );

        Ok(Self {
            embedding_model: embedder.id().to_string(),
            dimension: embedder.dimension(),
            chunk_size,
            chunk_overlap,
            chunks,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Top `k` chunks by cosine similarity; equal scores keep corpus order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<GuidelinePassage> {
        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine(query, &c.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        scored
            .into_iter()
            .take(k)
            .map(|(i, _)| {
                let c = &self.chunks[i];
                GuidelinePassage {
                    source: c.source.clone(),
                    page: c.page,
                    content: c.content.clone(),
                }
            })
            .collect()
    }

    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(INDEX_FILE)
    }

    pub fn exists(dir: &Path) -> bool {
        Self::path_in(dir).is_file()
    }

    /// Persist to `<dir>/index.json` through a temporary file and rename.
    pub fn save(&self, dir: &Path) -> Result<(), IndexError> {
        std::fs::create_dir_all(dir)?;
        let target = Self::path_in(dir);
        let tmp = dir.join(format!("{INDEX_FILE}.tmp"));
        std::fs::write(&tmp, serde_json::to_vec(self)?)?;
        std::fs::rename(&tmp, &target)?;
        info!(path = %target.display(), chunks = self.len(), "Persisted guideline index");
        Ok(())
    }

    pub fn load(dir: &Path, expected_model: &str) -> Result<Self, IndexError> {
        let bytes = std::fs::read(Self::path_in(dir))?;
        let index: Self = serde_json::from_slice(&bytes)?;
        if index.embedding_model != expected_model {
            return Err(IndexError::ModelMismatch {
                expected: expected_model.to_string(),
                found: index.embedding_model,
            });
        }
        Ok(index)
    }
}
