//! Deterministic hash-based embedder.

use super::{DEFAULT_DIMENSIONS, Embedder};
use crate::{Error, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Bag-of-words pseudo-embedder.
///
/// Each lowercased word is hashed and spread over a few dimensions, then the
/// vector is L2-normalized. Texts sharing words score higher under cosine
/// similarity, which is enough for tests and offline demos. It does not
/// capture meaning: "car" and "automobile" are unrelated.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Bounds work on very long inputs.
    const MAX_WORDS: usize = 1000;

    /// Creates an embedder producing `dimensions`-long vectors (minimum 1).
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn pseudo_embed(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        for word in text.split_whitespace().take(Self::MAX_WORDS) {
            let word: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect();
            if word.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            self.distribute_hash(&mut embedding, hasher.finish());
        }

        normalize(&mut embedding);
        embedding
    }

    fn distribute_hash(&self, embedding: &mut [f32], hash: u64) {
        for j in 0..4 {
            let idx = (hash >> (j * 16)) as usize % self.dimensions;
            let value = ((hash >> (j * 8 + 4)) & 0xFF) as f32 / 255.0 + 0.5;
            embedding[idx] += value;
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

fn normalize(embedding: &mut [f32]) {
    let norm_sq: f32 = embedding.iter().map(|x| x * x).sum();
    if norm_sq <= 0.0 {
        return;
    }
    let inv_norm = norm_sq.sqrt().recip();
    for v in embedding.iter_mut() {
        *v *= inv_norm;
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("cannot embed empty text".to_string()));
        }
        Ok(self.pseudo_embed(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("We chose Postgres").unwrap();
        let b = embedder.embed("We chose Postgres").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_shared_words_score_higher() {
        let embedder = HashEmbedder::default();
        let query = embedder.embed("database decision").unwrap();
        let related = embedder.embed("The database decision was Postgres").unwrap();
        let unrelated = embedder.embed("Bought apples at the market").unwrap();

        assert!(
            cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated)
        );
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let embedder = HashEmbedder::new(32);
        assert_eq!(
            embedder.embed("Postgres!").unwrap(),
            embedder.embed("postgres").unwrap()
        );
    }

    #[test]
    fn test_rejects_empty() {
        assert!(HashEmbedder::default().embed("   ").is_err());
    }
}
