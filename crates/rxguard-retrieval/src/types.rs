use crate::error::IndexError;

/// A contiguous window of a guideline page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub content: String,
    pub chunk_index: usize,
    /// Offset of the window in characters from the start of the page.
    pub char_offset: usize,
}

/// Chunking strategy trait
pub trait Chunker: Send + Sync {
    fn chunk(&self, text: &str) -> Vec<TextChunk>;
}

/// Embedding model abstraction
pub trait EmbeddingModel: Send + Sync {
    /// Identifier persisted with the index (ex: "hashing-384").
    fn id(&self) -> &str;

    fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, IndexError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize;
}
