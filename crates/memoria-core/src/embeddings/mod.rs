//! Embedding Provider (§4.A) — text to fixed-dimension dense vector.
//!
//! A pure function from the kernel's point of view: the same model must be
//! used for queries and for stored items, and the component carries no
//! per-call state.

#[cfg(feature = "embeddings")]
mod local;

#[cfg(feature = "embeddings")]
pub use local::{LocalEmbeddingProvider, EMBEDDING_DIMENSIONS};

/// Stateless text-to-vector provider. Implementations may cache a model
/// handle internally (see [`LocalEmbeddingProvider`]) but expose no state
/// to callers.
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

#[derive(Debug, Clone)]
pub enum EmbeddingError {
    ModelInit(String),
    EmbeddingFailed(String),
    InvalidInput(String),
}

impl std::fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingError::ModelInit(e) => write!(f, "model initialization failed: {e}"),
            EmbeddingError::EmbeddingFailed(e) => write!(f, "embedding generation failed: {e}"),
            EmbeddingError::InvalidInput(e) => write!(f, "invalid input: {e}"),
        }
    }
}

impl std::error::Error for EmbeddingError {}

/// Cosine similarity between two equal-length vectors; 0.0 on mismatch.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 { dot / denom } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }
}
