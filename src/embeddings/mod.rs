//! Embedding gateway and vector math
//!
//! Provides the text→vector operation behind a trait, with remote
//! (OpenAI-compatible), local (fastembed) and feature-hashing implementations,
//! plus the cosine/centroid helpers every ranking component shares.

pub mod hashing;
#[cfg(feature = "local-embeddings")]
pub mod local;
pub mod remote;

pub use hashing::HashingEmbedder;
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbeddingService;
pub use remote::RemoteEmbeddingService;

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::error::{ImpMailError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Embedding gateway trait
///
/// Implementations silently truncate overlong input before calling out and are
/// expected to be pure for a fixed model version.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Get model name
    fn model_name(&self) -> &str;

    /// Get embedding dimensionality
    fn dimensions(&self) -> usize;
}

/// Construct the gateway selected by configuration
pub async fn build_gateway(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingGateway>> {
    match config.provider {
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(
            config.dimensions,
            config.max_input_chars,
        ))),
        EmbeddingProvider::Remote => Ok(Arc::new(RemoteEmbeddingService::new(config.clone())?)),
        #[cfg(feature = "local-embeddings")]
        EmbeddingProvider::Local => Ok(Arc::new(LocalEmbeddingService::new(config.clone()).await?)),
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingProvider::Local => Err(ImpMailError::Config(config::ConfigError::Message(
            "local embeddings require the `local-embeddings` feature".to_string(),
        ))),
    }
}

/// Calculate cosine similarity between two vectors
///
/// Returns 0.0 for empty, zero-norm or length-mismatched inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    (dot_product / (magnitude_a * magnitude_b)).clamp(-1.0, 1.0)
}

/// Arithmetic mean of a set of vectors
///
/// The dimension of the first vector wins; vectors of any other length are
/// ignored. Returns None when nothing is left to average.
pub fn centroid<V: AsRef<[f32]>>(vectors: &[V]) -> Option<Vec<f32>> {
    let dims = vectors.first()?.as_ref().len();
    if dims == 0 {
        return None;
    }

    let mut sum = vec![0.0f32; dims];
    let mut count = 0usize;
    for vector in vectors.iter().map(AsRef::as_ref) {
        if vector.len() != dims {
            continue;
        }
        for (acc, value) in sum.iter_mut().zip(vector) {
            *acc += value;
        }
        count += 1;
    }

    let n = count as f32;
    Some(sum.into_iter().map(|x| x / n).collect())
}

/// Reject vectors that would poison similarity math
pub(crate) fn validate_embedding(embedding: &[f32], expected_dims: usize) -> Result<()> {
    if expected_dims > 0 && embedding.len() != expected_dims {
        return Err(ImpMailError::Embedding(format!(
            "Expected {} dimensions, got {}",
            expected_dims,
            embedding.len()
        )));
    }

    if embedding.iter().any(|x| !x.is_finite()) {
        return Err(ImpMailError::Embedding(
            "Embedding contains invalid values (NaN or Inf)".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_cosine_similarity() {
        let vec1 = vec![1.0, 0.0, 0.0];
        let vec2 = vec![1.0, 0.0, 0.0];
        let vec3 = vec![0.0, 1.0, 0.0];

        // Same vectors
        assert!((cosine_similarity(&vec1, &vec2) - 1.0).abs() < 0.01);

        // Orthogonal vectors
        assert!((cosine_similarity(&vec1, &vec3) - 0.0).abs() < 0.01);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0, 0.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_centroid_is_mean() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![2.0, 2.0]];
        let c = centroid(&vectors).unwrap();
        assert!((c[0] - 1.0).abs() < 1e-6);
        assert!((c[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_skips_mismatched_and_empty() {
        let vectors = vec![vec![2.0, 4.0], vec![9.0], vec![4.0, 0.0]];
        assert_eq!(centroid(&vectors).unwrap(), vec![3.0, 2.0]);

        let empty: Vec<Vec<f32>> = Vec::new();
        assert!(centroid(&empty).is_none());
    }

    #[test]
    fn test_validate_embedding() {
        assert!(validate_embedding(&[0.5; 4], 4).is_ok());
        assert!(validate_embedding(&[0.5; 3], 4).is_err());
        assert!(validate_embedding(&[f32::NAN, 0.0], 0).is_err());
    }

    proptest! {
        #[test]
        fn prop_cosine_bounded(
            pairs in prop::collection::vec((-100.0f32..100.0, -100.0f32..100.0), 1..32)
        ) {
            let (a, b): (Vec<f32>, Vec<f32>) = pairs.into_iter().unzip();
            let sim = cosine_similarity(&a, &b);
            prop_assert!((-1.0..=1.0).contains(&sim));
        }

        #[test]
        fn prop_cosine_self_is_one(a in prop::collection::vec(0.1f32..100.0, 1..32)) {
            prop_assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-4);
        }
    }
}
