//! Qdrant REST vector index.
//!
//! Talks to the Qdrant HTTP API directly with the blocking client:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create collection | `PUT /collections/{name}` |
//! | upsert | `PUT /collections/{name}/points?wait=true` |
//! | search | `POST /collections/{name}/points/search` |
//! | count | `POST /collections/{name}/points/count` |
//!
//! Principal and source filtering uses Qdrant `must` payload conditions and
//! the similarity floor uses its native `score_threshold`.

use crate::Result;
use crate::embedding::validate_dimensions;
use crate::http::{build_http_client, join_url, send, send_json};
use crate::models::{ChunkFilter, ChunkMatch, ChunkPayload};
use crate::storage::metrics::timed;
use crate::storage::traits::VectorIndex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::instrument;

const BACKEND: &str = "qdrant";

#[derive(Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}

/// Qdrant collection client.
pub struct QdrantIndex {
    url: String,
    collection: String,
    dimensions: usize,
    api_key: Option<SecretString>,
    client: reqwest::blocking::Client,
    collection_ready: AtomicBool,
}

impl QdrantIndex {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

    /// Creates a client for `collection` at `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, collection: impl Into<String>, dimensions: usize) -> Self {
        Self {
            url: url.into(),
            collection: collection.into(),
            dimensions,
            api_key: None,
            client: build_http_client(Self::DEFAULT_TIMEOUT_MS),
            collection_ready: AtomicBool::new(false),
        }
    }

    /// Sets the Qdrant API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<SecretString>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Returns the collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn endpoint(&self, suffix: &str) -> String {
        join_url(&self.url, &format!("collections/{}{suffix}", self.collection))
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("api-key", key.expose_secret()),
            None => request,
        }
    }

    /// Creates the collection with cosine distance if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if Qdrant cannot be reached or rejects the request.
    pub fn ensure_collection(&self) -> Result<()> {
        if self.collection_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let exists = self
            .authorize(self.client.get(self.endpoint("")))
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false);

        if !exists {
            tracing::info!(collection = %self.collection, dimensions = self.dimensions, "Creating Qdrant collection");
            let body = json!({
                "vectors": { "size": self.dimensions, "distance": "Cosine" }
            });
            send(
                BACKEND,
                "qdrant_create_collection",
                self.authorize(self.client.put(self.endpoint(""))).json(&body),
            )?;
        }

        self.collection_ready.store(true, Ordering::Release);
        Ok(())
    }

    fn build_filter(filter: &ChunkFilter) -> Value {
        let mut must = vec![json!({
            "key": "principal",
            "match": { "value": filter.principal }
        })];
        if let Some(source) = &filter.source {
            must.push(json!({ "key": "source", "match": { "value": source } }));
        }
        json!({ "must": must })
    }

    fn into_match(point: ScoredPoint) -> Option<ChunkMatch> {
        let Some(id) = point.id.as_u64() else {
            tracing::warn!(id = %point.id, "Skipping Qdrant point with non-integer id");
            return None;
        };
        Some(ChunkMatch {
            id,
            score: point.score,
            payload: point.payload.and_then(ChunkPayload::from_value),
        })
    }
}

impl VectorIndex for QdrantIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip(self, vector, payload), fields(operation = "vector_upsert", backend = BACKEND, vector.id = id))]
    fn upsert(&self, id: u64, vector: &[f32], payload: &ChunkPayload) -> Result<()> {
        validate_dimensions(vector, self.dimensions)?;
        timed(BACKEND, "upsert", || {
            self.ensure_collection()?;
            let body = json!({
                "points": [{ "id": id, "vector": vector, "payload": payload }]
            });
            send(
                BACKEND,
                "qdrant_upsert",
                self.authorize(self.client.put(self.endpoint("/points?wait=true")))
                    .json(&body),
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self, vector), fields(operation = "vector_search", backend = BACKEND, principal = %filter.principal))]
    fn search(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: f32,
        filter: &ChunkFilter,
    ) -> Result<Vec<ChunkMatch>> {
        validate_dimensions(vector, self.dimensions)?;
        timed(BACKEND, "search", || {
            let body = json!({
                "vector": vector,
                "limit": limit,
                "score_threshold": score_threshold,
                "with_payload": true,
                "filter": Self::build_filter(filter),
            });
            let response: QdrantResponse<Vec<ScoredPoint>> = send_json(
                BACKEND,
                "qdrant_search",
                self.authorize(self.client.post(self.endpoint("/points/search")))
                    .json(&body),
            )?;
            Ok(response
                .result
                .into_iter()
                .filter_map(Self::into_match)
                .collect())
        })
    }

    fn count(&self) -> Result<usize> {
        timed(BACKEND, "count", || {
            let response: QdrantResponse<CountResult> = send_json(
                BACKEND,
                "qdrant_count",
                self.authorize(self.client.post(self.endpoint("/points/count")))
                    .json(&json!({ "exact": true })),
            )?;
            Ok(response.result.count)
        })
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

impl std::fmt::Debug for QdrantIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantIndex")
            .field("url", &self.url)
            .field("collection", &self.collection)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::models::MemoryId;

    #[test]
    fn test_filter_shape() {
        let unscoped = QdrantIndex::build_filter(&ChunkFilter::new("0xabc", None));
        assert_eq!(unscoped["must"].as_array().unwrap().len(), 1);

        let scoped =
            QdrantIndex::build_filter(&ChunkFilter::new("0xabc", Some("claude".to_string())));
        assert_eq!(scoped["must"][1]["key"], "source");
        assert_eq!(scoped["must"][1]["match"]["value"], "claude");
    }

    #[test]
    fn test_into_match_decodes_payload() {
        let payload = ChunkPayload {
            memory_id: MemoryId::new("m1"),
            chunk_index: 2,
            content: "c".to_string(),
            tags: vec!["t".to_string()],
            principal: "0xabc".to_string(),
            source: "claude".to_string(),
        };
        let point: ScoredPoint = serde_json::from_value(json!({
            "id": 7,
            "score": 0.9,
            "payload": serde_json::to_value(&payload).unwrap(),
        }))
        .unwrap();
        let matched = QdrantIndex::into_match(point).unwrap();
        assert_eq!(matched.id, 7);
        assert_eq!(matched.payload, Some(payload));

        let uuid_point: ScoredPoint =
            serde_json::from_value(json!({"id": "5c56c793-69f3-4fbf-87e6-c4bf54c28c26", "score": 0.9}))
                .unwrap();
        assert!(QdrantIndex::into_match(uuid_point).is_none());
    }

    #[test]
    fn test_dimension_check_precedes_network() {
        let index = QdrantIndex::new("http://127.0.0.1:9", "chunks", 4);
        let payload = ChunkPayload {
            memory_id: MemoryId::new("m1"),
            chunk_index: 0,
            content: String::new(),
            tags: vec![],
            principal: "0xabc".to_string(),
            source: "claude".to_string(),
        };
        assert!(matches!(
            index.upsert(1, &[1.0], &payload),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_endpoint_paths() {
        let index = QdrantIndex::new("http://localhost:6333/", "memory_chunks", 4);
        assert_eq!(
            index.endpoint("/points/search"),
            "http://localhost:6333/collections/memory_chunks/points/search"
        );
    }
}
