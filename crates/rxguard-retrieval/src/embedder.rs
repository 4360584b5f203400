use crate::error::IndexError;
use crate::types::EmbeddingModel;

pub const DEFAULT_EMBEDDING_MODEL: &str = "hashing-384";
const HASHING_PREFIX: &str = "hashing-";

/// Feature-hashing embedder.
///
/// Lowercased alphanumeric tokens and adjacent token pairs are hashed with
/// blake3 into a fixed number of signed buckets, then L2 normalized. Text
/// with no tokens embeds to the zero vector.
pub struct HashingEmbedder {
    id: String,
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            id: format!("{HASHING_PREFIX}{dimension}"),
            dimension,
        }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let hash = blake3::hash(feature.as_bytes());
        let bytes = hash.as_bytes();
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[..8]);
        let index = (u64::from_le_bytes(word) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index, sign)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl EmbeddingModel for HashingEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let tokens = tokenize(text);
        let mut vector = vec![0.0f32; self.dimension];

        for token in &tokens {
            let (index, sign) = self.bucket(token);
            vector[index] += sign;
        }
        for pair in tokens.windows(2) {
            let (index, sign) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            vector[index] += 0.5 * sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Resolve a configured model id to an embedder.
pub fn embedder_for(model_id: &str) -> Result<Box<dyn EmbeddingModel>, IndexError> {
    let dimension = model_id
        .strip_prefix(HASHING_PREFIX)
        .and_then(|d| d.parse::<usize>().ok())
        .filter(|d| *d > 0)
        .ok_or_else(|| IndexError::UnknownModel(model_id.to_string()))?;
    Ok(Box::new(HashingEmbedder::new(dimension)))
}

pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}
