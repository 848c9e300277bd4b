//! Retrieval results.

use super::{ImageRef, MemoryId};
use serde::{Deserialize, Serialize};

/// A memory returned by retrieval, scored by its best chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedMemory {
    /// Memory identifier.
    pub id: MemoryId,
    /// Producing source.
    pub source: String,
    /// Summary text.
    pub extracted_content: String,
    /// Memory tags.
    pub tags: Vec<String>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Maximum chunk similarity.
    pub similarity: f32,
    /// Texts of every chunk that matched.
    pub matched_chunks: Vec<String>,
    /// Attached images.
    pub images: Vec<ImageRef>,
}
