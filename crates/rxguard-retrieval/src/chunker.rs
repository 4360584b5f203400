use crate::types::{Chunker, TextChunk};

pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Fixed-size character windows with a shared overlap between neighbours.
///
/// A window prefers to end on whitespace found in its back half so words are
/// not cut; otherwise it is cut at exactly `chunk_size` characters.
pub struct FixedSizeChunker {
    chunk_size: usize,
    overlap: usize,
}

impl FixedSizeChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            overlap: overlap.min(chunk_size - 1),
        }
    }
}

impl Default for FixedSizeChunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < len {
            let mut end = (start + self.chunk_size).min(len);
            if end < len {
                let floor = start + self.chunk_size / 2;
                if let Some(pos) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                    end = pos + 1;
                }
            }

            let window: String = chars[start..end].iter().collect();
            let content = window.trim();
            if !content.is_empty() {
                chunks.push(TextChunk {
                    content: content.to_string(),
                    chunk_index: chunks.len(),
                    char_offset: start,
                });
            }

            if end >= len {
                break;
            }
            let next = end.saturating_sub(self.overlap);
            start = if next > start { next } else { end };
        }

        chunks
    }
}
