//! Vector index chunk payloads.

use super::MemoryId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Fixed payload stored alongside every chunk vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Memory this chunk belongs to.
    pub memory_id: MemoryId,
    /// Position of the chunk within the memory content.
    pub chunk_index: u32,
    /// Chunk text, truncated to the configured maximum.
    pub content: String,
    /// Tags of the owning memory.
    pub tags: Vec<String>,
    /// Owning principal (normalized).
    pub principal: String,
    /// Producing source.
    pub source: String,
}

impl ChunkPayload {
    /// Decodes a payload from an open JSON map.
    ///
    /// Returns `None` when the map does not match the payload schema.
    #[must_use]
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

/// A single nearest-neighbor hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMatch {
    /// Vector id.
    pub id: u64,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
    /// Decoded payload, `None` if the stored metadata was malformed.
    pub payload: Option<ChunkPayload>,
}

/// Metadata filter applied to a vector search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFilter {
    /// Principal that must own the chunk.
    pub principal: String,
    /// Source the chunk must come from, if restricted.
    pub source: Option<String>,
}

impl ChunkFilter {
    /// Creates a filter for a principal, optionally restricted to one source.
    #[must_use]
    pub fn new(principal: impl Into<String>, source: Option<String>) -> Self {
        Self {
            principal: principal.into(),
            source,
        }
    }

    /// Returns true if the payload passes this filter.
    #[must_use]
    pub fn matches(&self, payload: &ChunkPayload) -> bool {
        payload.principal == self.principal
            && self
                .source
                .as_deref()
                .is_none_or(|source| payload.source == source)
    }
}

/// Derives the integer vector id for a chunk.
///
/// The id is the first 8 bytes of `SHA-256("{memory_id}:{chunk_index}")`
/// read big-endian, so re-ingesting the same chunk overwrites its vector.
#[must_use]
pub fn chunk_vector_id(memory_id: &MemoryId, chunk_index: u32) -> u64 {
    let digest = Sha256::digest(format!("{memory_id}:{chunk_index}").as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}
