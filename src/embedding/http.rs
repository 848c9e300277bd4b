//! Client for an external Embedding Service.

use super::{Embedder, validate_dimensions};
use crate::http::{build_http_client, send_json};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::instrument;

const SERVICE: &str = "embedding";

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding Service client.
///
/// Sends `POST {endpoint}` with `{"texts": [...]}` and expects
/// `{"embeddings": [[...], ...]}` in the same order. Every returned vector is
/// checked against the configured dimensionality, so a misconfigured model
/// fails closed instead of polluting the index.
pub struct HttpEmbedder {
    endpoint: String,
    api_key: Option<SecretString>,
    dimensions: usize,
    client: reqwest::blocking::Client,
}

impl HttpEmbedder {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

    /// Creates a client for `endpoint` producing `dimensions`-long vectors.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, dimensions: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            dimensions,
            client: build_http_client(Self::DEFAULT_TIMEOUT_MS),
        }
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<SecretString>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.client = build_http_client(timeout_ms);
        self
    }

    /// Returns the endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest { texts });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response: EmbedResponse = send_json(SERVICE, "embedding_request", request)?;
        if response.embeddings.len() != texts.len() {
            return Err(Error::OperationFailed {
                operation: "embedding_request".to_string(),
                cause: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    response.embeddings.len()
                ),
            });
        }
        for embedding in &response.embeddings {
            validate_dimensions(embedding, self.dimensions)?;
        }
        Ok(response.embeddings)
    }
}

impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip(self, text), fields(operation = "embed", text_length = text.len()))]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::InvalidInput("cannot embed empty text".to_string()));
        }
        self.request(&[text])?
            .pop()
            .ok_or_else(|| Error::OperationFailed {
                operation: "embedding_request".to_string(),
                cause: "no embedding returned".to_string(),
            })
    }

    #[instrument(skip(self, texts), fields(operation = "embed_batch", batch_size = texts.len()))]
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::InvalidInput("cannot embed empty text".to_string()));
        }
        self.request(texts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_service_fails_closed() {
        let embedder = HttpEmbedder::new("http://127.0.0.1:9/embed", 8).with_timeout_ms(500);
        assert!(matches!(
            embedder.embed("hello"),
            Err(Error::OperationFailed { .. })
        ));
    }

    #[test]
    fn test_empty_inputs() {
        let embedder = HttpEmbedder::new("http://127.0.0.1:9/embed", 8);
        assert!(embedder.embed_batch(&[]).unwrap().is_empty());
        assert!(matches!(embedder.embed(""), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_request_shape() {
        let body = serde_json::to_value(EmbedRequest { texts: &["a", "b"] }).unwrap();
        assert_eq!(body, serde_json::json!({"texts": ["a", "b"]}));
    }
}
