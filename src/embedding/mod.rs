//! Embedding generation.
//!
//! The retrieval path only consumes embeddings: the query prompt is embedded
//! once per request and any failure is fatal to that request. Ingestion embeds
//! chunk texts in batches.
//!
//! | Embedder | Use Case |
//! |----------|----------|
//! | [`HashEmbedder`] | Deterministic bag-of-words vectors, tests and offline use |
//! | [`HttpEmbedder`] | External Embedding Service over HTTP |
//! | [`FastEmbedEmbedder`] | Local ONNX model (feature `fastembed-embeddings`) |

// Allow cast precision loss for hash-based embedding calculations.
#![allow(clippy::cast_precision_loss)]
// Allow cast possible truncation for hash index calculations on 32-bit platforms.
#![allow(clippy::cast_possible_truncation)]

mod fastembed;
mod hash;
mod http;

pub use fastembed::FastEmbedEmbedder;
pub use hash::HashEmbedder;
pub use http::HttpEmbedder;

use crate::{Error, Result};

/// Default embedding dimensions (all-MiniLM-L6-v2).
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Trait for embedding generators.
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generates embeddings for multiple texts, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if any embedding fails; there are no partial results.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Checks that `embedding` has exactly `expected` dimensions.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on mismatch.
pub fn validate_dimensions(embedding: &[f32], expected: usize) -> Result<()> {
    if embedding.len() != expected {
        return Err(Error::InvalidInput(format!(
            "embedding dimension mismatch: expected {expected}, got {}",
            embedding.len()
        )));
    }
    Ok(())
}

/// Computes cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or 0.0 if the vectors differ in length,
/// are empty, or either has zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_bounds() {
        let v = [1.0, 0.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&v, &[0.0, 1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_similarity(&v, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert!(cosine_similarity(&[], &[]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[1.0], &[1.0, 2.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_validate_dimensions() {
        assert!(validate_dimensions(&[0.0; 4], 4).is_ok());
        assert!(matches!(
            validate_dimensions(&[0.0; 3], 4),
            Err(Error::InvalidInput(_))
        ));
    }
}
