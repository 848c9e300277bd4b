//! Vector index trait.
//!
//! # Available Implementations
//!
//! | Backend | Use Case | Configuration |
//! |---------|----------|---------------|
//! | `FlatVectorIndex` | Local brute-force cosine search | Default, no external deps |
//! | `QdrantIndex` | Remote Qdrant collection | `vector.backend = "qdrant"` |

use crate::Result;
use crate::models::{ChunkFilter, ChunkMatch, ChunkPayload};

/// Trait for chunk-level nearest-neighbor search.
///
/// # Dimensionality
///
/// Dimensionality is fixed per index. Implementations reject vectors of any
/// other length with [`crate::Error::InvalidInput`] before touching storage.
///
/// # Payloads
///
/// Payloads are validated at this boundary: a stored payload that does not
/// decode into [`ChunkPayload`] comes back as a match with `payload: None`.
pub trait VectorIndex: Send + Sync {
    /// The dimensionality of stored vectors.
    fn dimensions(&self) -> usize;

    /// Inserts or replaces the vector stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns an error on dimension mismatch or backend failure.
    fn upsert(&self, id: u64, vector: &[f32], payload: &ChunkPayload) -> Result<()>;

    /// Returns up to `limit` matches scoring at least `score_threshold`,
    /// restricted by `filter`, ordered by descending score.
    ///
    /// # Errors
    ///
    /// Returns an error on dimension mismatch or backend failure.
    fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
        filter: &ChunkFilter,
    ) -> Result<Vec<ChunkMatch>>;

    /// Returns the number of stored vectors.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    fn count(&self) -> Result<usize>;

    /// Short backend name used in logs and metrics.
    fn backend_name(&self) -> &'static str;
}
