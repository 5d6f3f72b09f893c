use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::EmbeddingProvider;
use crate::error::MnemaError;

/// Bucket count of the hashed bag-of-tokens vector.
const DIMENSION: usize = 4096;

/// Deterministic local embedder: a unit-normalised bag of hashed tokens.
///
/// Texts sharing tokens land close together, punctuation-only variants are
/// identical. This is the offline fallback when no embedding backend is
/// configured, and it makes similarity-threshold behaviour reproducible in
/// tests. Token buckets come from SHA-256 so the mapping is stable across
/// processes and releases.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashedEmbedder;

impl HashedEmbedder {
    pub fn embed_sync(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; DIMENSION];
        for token in tokenize(text) {
            vector[bucket(&token)] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MnemaError> {
        Ok(Self::embed_sync(text))
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn bucket(token: &str) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    (u16::from_be_bytes([digest[0], digest[1]]) as usize) % DIMENSION
}
