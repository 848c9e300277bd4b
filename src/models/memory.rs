//! Memory types and identifiers.

use super::Principal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Creates a new memory ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh time-ordered memory ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("mem_{}", uuid::Uuid::now_v7().simple()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Reference to an image attached to a memory.
///
/// The binary lives in external object storage; only the key is kept here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    /// Attachment identifier (part of the memory fingerprint).
    pub id: String,
    /// Object storage key or URL.
    pub storage_key: String,
    /// MIME type, when known.
    pub mime_type: Option<String>,
}

/// A unit of extracted content owned by a principal.
#[derive(Debug, Clone, PartialEq)]
pub struct Memory {
    /// Unique identifier.
    pub id: MemoryId,
    /// Owning principal.
    pub principal: Principal,
    /// Producing integration.
    pub source: String,
    /// Conversation the content was extracted from.
    pub conversation_thread: Option<String>,
    /// Human-readable summary text.
    pub extracted_content: String,
    /// Ordered short labels.
    pub tags: Vec<String>,
    /// Content hash used as a uniqueness key.
    pub fingerprint: String,
    /// Attached images.
    pub images: Vec<ImageRef>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
}
