//! Feature-hashing embedder
//!
//! Deterministic, network-free embeddings built from hashed character n-grams
//! and words. Useful offline and as a reproducible gateway in tests; semantic
//! quality is far below a trained model.

use crate::embeddings::EmbeddingGateway;
use crate::error::Result;
use crate::utils::string::truncate_chars;
use async_trait::async_trait;

const MODEL_NAME: &str = "feature-hash-v1";

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// 64-bit FNV-1a; stored vectors depend on it staying fixed across builds
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h = FNV_OFFSET;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// Feature-hashing embedding gateway
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    max_input_chars: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize, max_input_chars: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            max_input_chars,
        }
    }

    fn bucket(&self, token: &str) -> usize {
        (fnv1a(token.as_bytes()) % self.dimensions as u64) as usize
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0; self.dimensions];
        let text_lower = truncate_chars(text, self.max_input_chars).to_lowercase();
        let chars: Vec<char> = text_lower.chars().collect();

        // Character n-grams
        for window_size in 2..=4 {
            for window in chars.windows(window_size) {
                let gram: String = window.iter().collect();
                embedding[self.bucket(&gram)] += 1.0;
            }
        }

        // Words weighted more than character n-grams
        for word in text_lower.split_whitespace() {
            embedding[self.bucket(word)] += 2.0;
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingGateway for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
