//! Text embeddings consumed by the similarity search collaborator
//!
//! The subsystem does not implement a vector index. It only needs a way to
//! turn record text into vectors so a search backend can rank them.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::Result;

pub const EMBEDDING_DIMENSION: usize = 384;

/// Anything that can turn text into a fixed-size vector
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Deterministic feature-hashed bag-of-words embedding.
///
/// Each lowercase token is hashed into one of `dimension` buckets with a
/// hash-derived sign, then the vector is L2-normalised. Texts sharing most
/// tokens score close to 1.0; unrelated texts score near 0.
#[derive(Debug, Clone)]
pub struct TokenHashEmbedder {
    dimension: usize,
}

impl TokenHashEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(EMBEDDING_DIMENSION)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for TokenHashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for TokenHashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];

        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);

        for token in tokens {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let h = hasher.finish();
            let bucket = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 when the vectors are empty, differ in length, or either has
/// zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(feature = "lance")]
pub use fast::FastEmbedder;

#[cfg(feature = "lance")]
mod fast {
    use std::sync::Mutex;

    use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};

    use super::{EMBEDDING_DIMENSION, Embedder};
    use crate::error::{MemoryError, Result};

    /// multilingual-e5-small embeddings via fastembed
    pub struct FastEmbedder {
        model: Mutex<TextEmbedding>,
    }

    impl FastEmbedder {
        pub fn new() -> Result<Self> {
            let model =
                TextEmbedding::try_new(InitOptions::new(FastEmbedModel::MultilingualE5Small))
                    .map_err(|e| MemoryError::Embedding(e.to_string()))?;
            Ok(Self {
                model: Mutex::new(model),
            })
        }
    }

    impl Embedder for FastEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut model = self
                .model
                .lock()
                .map_err(|_| MemoryError::Embedding("Embedding model lock poisoned".to_string()))?;
            let embeddings = model
                .embed(vec![text.to_string()], None)
                .map_err(|e| MemoryError::Embedding(e.to_string()))?;
            embeddings
                .into_iter()
                .next()
                .ok_or_else(|| MemoryError::Embedding("No embedding returned".to_string()))
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut model = self
                .model
                .lock()
                .map_err(|_| MemoryError::Embedding("Embedding model lock poisoned".to_string()))?;
            model
                .embed(texts.to_vec(), None)
                .map_err(|e| MemoryError::Embedding(e.to_string()))
        }

        fn dimension(&self) -> usize {
            EMBEDDING_DIMENSION
        }
    }
}
