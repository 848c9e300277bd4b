//! Memory ingestion.
//!
//! The write side of retrieval: a memory is chunked and embedded first, so
//! an embedding failure leaves nothing behind. Only then is the row written,
//! where the fingerprint turns a repeat extraction into a duplicate with no
//! further writes. New memories get one vector per chunk.

use super::fingerprint;
use crate::embedding::{Embedder, validate_dimensions};
use crate::models::{ChunkPayload, ImageRef, Memory, MemoryId, Principal, chunk_vector_id};
use crate::storage::{InsertOutcome, MemoryStore, VectorIndex};
use crate::{Error, Result, current_timestamp};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// An extraction to store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    /// Owning principal (unnormalized).
    pub principal: String,
    /// Producing integration.
    pub source: String,
    /// Summary text.
    pub extracted_content: String,
    /// Short labels.
    pub tags: Vec<String>,
    /// Conversation the content came from.
    pub conversation_thread: Option<String>,
    /// Attached images.
    pub images: Vec<ImageRef>,
}

impl IngestRequest {
    /// Creates a request without tags, thread or images.
    #[must_use]
    pub fn new(
        principal: impl Into<String>,
        source: impl Into<String>,
        extracted_content: impl Into<String>,
    ) -> Self {
        Self {
            principal: principal.into(),
            source: source.into(),
            extracted_content: extracted_content.into(),
            tags: Vec::new(),
            conversation_thread: None,
            images: Vec::new(),
        }
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the conversation thread.
    #[must_use]
    pub fn with_conversation_thread(mut self, thread: impl Into<String>) -> Self {
        self.conversation_thread = Some(thread.into());
        self
    }

    /// Sets the attached images.
    #[must_use]
    pub fn with_images(mut self, images: Vec<ImageRef>) -> Self {
        self.images = images;
        self
    }
}

/// Result of an ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    /// The stored memory, or the existing one for a duplicate.
    pub memory_id: MemoryId,
    /// True if an identical extraction was already stored.
    pub duplicate: bool,
    /// Chunks indexed by this call (0 for duplicates).
    pub chunk_count: usize,
}

/// Splits `content` into chunks of at most `max_chars` characters.
///
/// Chunks break on whitespace. A single word longer than `max_chars` is cut
/// into pieces.
#[must_use]
pub fn chunk_content(content: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in content.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            chunks.extend(chars.chunks(max_chars).map(|piece| piece.iter().collect::<String>()));
            continue;
        }

        let needed = if current.is_empty() { word_len } else { word_len + 1 };
        if current_len + needed > max_chars {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn require(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("{field} cannot be empty")));
    }
    Ok(value.to_string())
}

/// Stores memories and indexes their chunks.
pub struct IngestService {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    memories: Arc<dyn MemoryStore>,
    max_chunk_chars: usize,
}

impl IngestService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        memories: Arc<dyn MemoryStore>,
        max_chunk_chars: usize,
    ) -> Self {
        Self {
            embedder,
            index,
            memories,
            max_chunk_chars,
        }
    }

    /// Stores an extraction and indexes its chunks.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for empty fields or an embedding whose
    ///   length differs from the index dimensionality. Nothing is written.
    /// - The embedder's error. Nothing is written.
    /// - Store or index errors, after which the memory row may exist
    ///   without all of its vectors.
    #[instrument(
        skip(self, request),
        fields(
            operation = "ingest",
            principal = %request.principal,
            source = %request.source,
            content_len = request.extracted_content.len()
        )
    )]
    pub fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome> {
        let principal = Principal::parse(&request.principal)?;
        let source = require("source", &request.source)?;
        let content = require("extracted content", &request.extracted_content)?;
        let tags: Vec<String> = request
            .tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let conversation_thread = request
            .conversation_thread
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let attachment_ids: Vec<&str> = request.images.iter().map(|i| i.id.as_str()).collect();
        let fingerprint = fingerprint(
            &source,
            &content,
            &tags,
            conversation_thread.as_deref(),
            &attachment_ids,
        );

        let chunks = chunk_content(&content, self.max_chunk_chars);
        let texts: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed_batch(&texts)?;
        if vectors.len() != chunks.len() {
            return Err(Error::OperationFailed {
                operation: "embed_batch".to_string(),
                cause: format!("expected {} embeddings, got {}", chunks.len(), vectors.len()),
            });
        }
        let dimensions = self.index.dimensions();
        for vector in &vectors {
            validate_dimensions(vector, dimensions)?;
        }

        let memory = Memory {
            id: MemoryId::generate(),
            principal,
            source,
            conversation_thread,
            extracted_content: content,
            tags,
            fingerprint,
            images: request.images,
            created_at: current_timestamp(),
        };
        let memory_id = match self.memories.insert_memory(&memory)? {
            InsertOutcome::Duplicate(existing) => {
                tracing::info!(memory.id = %existing, "Extraction already stored");
                metrics::counter!("memories_ingested_total", "status" => "duplicate").increment(1);
                return Ok(IngestOutcome {
                    memory_id: existing,
                    duplicate: true,
                    chunk_count: 0,
                });
            },
            InsertOutcome::Inserted(id) => id,
        };

        let mut mapping = Vec::with_capacity(chunks.len());
        for ((index, text), vector) in (0u32..).zip(chunks).zip(&vectors) {
            let vector_id = chunk_vector_id(&memory_id, index);
            let payload = ChunkPayload {
                memory_id: memory_id.clone(),
                chunk_index: index,
                content: text,
                tags: memory.tags.clone(),
                principal: memory.principal.as_str().to_string(),
                source: memory.source.clone(),
            };
            self.index.upsert(vector_id, vector, &payload)?;
            mapping.push((index, vector_id));
        }
        self.memories.record_chunks(&memory_id, &mapping)?;

        metrics::counter!("memories_ingested_total", "status" => "stored").increment(1);
        tracing::info!(memory.id = %memory_id, chunk_count = mapping.len(), "Memory stored");
        Ok(IngestOutcome {
            memory_id,
            duplicate: false,
            chunk_count: mapping.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::ChunkFilter;
    use crate::storage::{FlatVectorIndex, SqliteStore};

    const DIMS: usize = 16;

    fn service(max_chunk_chars: usize) -> (IngestService, Arc<FlatVectorIndex>, Arc<SqliteStore>) {
        let index = Arc::new(FlatVectorIndex::in_memory(DIMS));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let service = IngestService::new(
            Arc::new(HashEmbedder::new(DIMS)),
            index.clone(),
            store.clone(),
            max_chunk_chars,
        );
        (service, index, store)
    }

    #[test]
    fn test_chunk_content_respects_limit() {
        let chunks = chunk_content("alpha beta gamma delta", 11);
        assert_eq!(chunks, vec!["alpha beta", "gamma delta"]);
        assert!(chunks.iter().all(|c| c.chars().count() <= 11));
    }

    #[test]
    fn test_chunk_content_splits_long_words() {
        let chunks = chunk_content("ab abcdefgh c", 3);
        assert_eq!(chunks, vec!["ab", "abc", "def", "gh", "c"]);
    }

    #[test]
    fn test_chunk_content_empty() {
        assert!(chunk_content("   ", 10).is_empty());
    }

    #[test]
    fn test_ingest_indexes_chunks() {
        let (service, index, store) = service(12);
        let outcome = service
            .ingest(
                IngestRequest::new("0xABC", "claude", "use postgres for the primary store")
                    .with_tags(vec!["db".to_string()]),
            )
            .unwrap();
        assert!(!outcome.duplicate);
        assert_eq!(outcome.chunk_count, 4);
        assert_eq!(index.count().unwrap(), 4);

        let principal = Principal::parse("0xabc").unwrap();
        let memories = store
            .get_memories(&principal, std::slice::from_ref(&outcome.memory_id))
            .unwrap();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].tags, vec!["db".to_string()]);

        let query = HashEmbedder::new(DIMS).embed("use postgres for").unwrap();
        let hits = index
            .search(&query, 10, -1.0, &ChunkFilter::new("0xabc", None))
            .unwrap();
        assert!(hits.iter().all(|h| h.payload.as_ref().is_some_and(|p| p.memory_id == outcome.memory_id)));
    }

    #[test]
    fn test_repeat_ingest_is_duplicate() {
        let (service, index, _store) = service(800);
        let request = IngestRequest::new("0xabc", "claude", "same content")
            .with_tags(vec!["b".to_string(), "a".to_string()]);
        let first = service.ingest(request.clone()).unwrap();
        let second = service
            .ingest(request.with_tags(vec!["a".to_string(), "b".to_string()]))
            .unwrap();
        assert!(second.duplicate);
        assert_eq!(second.memory_id, first.memory_id);
        assert_eq!(second.chunk_count, 0);
        assert_eq!(index.count().unwrap(), 1);
    }

    #[test]
    fn test_same_content_for_other_principal_is_stored() {
        let (service, index, _store) = service(800);
        service.ingest(IngestRequest::new("0xabc", "claude", "shared")).unwrap();
        let other = service.ingest(IngestRequest::new("0xdef", "claude", "shared")).unwrap();
        assert!(!other.duplicate);
        assert_eq!(index.count().unwrap(), 2);
    }

    #[test]
    fn test_dimension_mismatch_writes_nothing() {
        let index = Arc::new(FlatVectorIndex::in_memory(DIMS));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let service = IngestService::new(
            Arc::new(HashEmbedder::new(DIMS + 1)),
            index.clone(),
            store.clone(),
            800,
        );
        let err = service
            .ingest(IngestRequest::new("0xabc", "claude", "content"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(index.count().unwrap(), 0);
        assert_eq!(store.count_memories(&Principal::parse("0xabc").unwrap()).unwrap(), 0);
    }

    #[test]
    fn test_rejects_empty_fields() {
        let (service, _index, _store) = service(800);
        assert!(matches!(
            service.ingest(IngestRequest::new("0xabc", " ", "content")),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            service.ingest(IngestRequest::new("0xabc", "claude", "")),
            Err(Error::InvalidInput(_))
        ));
    }
}
