//! Local ONNX embeddings via fastembed-rs.
//!
//! With the `fastembed-embeddings` feature this loads all-MiniLM-L6-v2 on first
//! use. Without it, construction fails with [`Error::FeatureNotEnabled`] so a
//! misconfigured deployment never silently falls back to hash vectors.

use crate::{Error, Result};

#[cfg(feature = "fastembed-embeddings")]
mod native {
    use super::super::{DEFAULT_DIMENSIONS, Embedder};
    use super::{Error, Result};
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::{Mutex, OnceLock, PoisonError};
    use std::time::Instant;

    /// Process-wide model, loaded lazily.
    static EMBEDDING_MODEL: OnceLock<Mutex<fastembed::TextEmbedding>> = OnceLock::new();

    fn get_model() -> Result<&'static Mutex<fastembed::TextEmbedding>> {
        if let Some(model) = EMBEDDING_MODEL.get() {
            return Ok(model);
        }

        tracing::info!("Loading embedding model (first use)...");
        let start = Instant::now();
        let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(false);
        let model =
            fastembed::TextEmbedding::try_new(options).map_err(|e| Error::OperationFailed {
                operation: "load_embedding_model".to_string(),
                cause: e.to_string(),
            })?;
        tracing::info!(
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            model = "all-MiniLM-L6-v2",
            "Embedding model loaded"
        );

        let _ = EMBEDDING_MODEL.set(Mutex::new(model));
        EMBEDDING_MODEL.get().ok_or_else(|| Error::OperationFailed {
            operation: "get_embedding_model".to_string(),
            cause: "model initialization race".to_string(),
        })
    }

    /// `FastEmbed` embedder using all-MiniLM-L6-v2 (384 dimensions).
    pub struct FastEmbedEmbedder;

    impl FastEmbedEmbedder {
        /// Creates the embedder. The model loads on the first call.
        ///
        /// # Errors
        ///
        /// Never fails when the feature is enabled.
        pub const fn new() -> Result<Self> {
            Ok(Self)
        }
    }

    impl Embedder for FastEmbedEmbedder {
        fn dimensions(&self) -> usize {
            DEFAULT_DIMENSIONS
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.embed_batch(&[text])?
                .pop()
                .ok_or_else(|| Error::OperationFailed {
                    operation: "embed".to_string(),
                    cause: "no embedding returned from model".to_string(),
                })
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            if texts.iter().any(|t| t.trim().is_empty()) {
                return Err(Error::InvalidInput("cannot embed empty text".to_string()));
            }

            let model = get_model()?;
            let owned: Vec<String> = texts.iter().map(|s| (*s).to_string()).collect();

            // ONNX runtime can panic on malformed inputs.
            let result = catch_unwind(AssertUnwindSafe(|| {
                model
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .embed(owned, None)
            }));

            result
                .map_err(|panic_info| {
                    let panic_msg = panic_info
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic_info.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(panic_message = %panic_msg, batch_size = texts.len(), "ONNX runtime panicked");
                    Error::OperationFailed {
                        operation: "embed_batch".to_string(),
                        cause: format!("ONNX runtime panic: {panic_msg}"),
                    }
                })?
                .map_err(|e| Error::OperationFailed {
                    operation: "embed_batch".to_string(),
                    cause: e.to_string(),
                })
        }
    }
}

#[cfg(feature = "fastembed-embeddings")]
pub use native::FastEmbedEmbedder;

/// `FastEmbed` embedder (unavailable without the `fastembed-embeddings` feature).
#[cfg(not(feature = "fastembed-embeddings"))]
pub struct FastEmbedEmbedder;

#[cfg(not(feature = "fastembed-embeddings"))]
impl FastEmbedEmbedder {
    /// Always fails: the feature is not compiled in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FeatureNotEnabled`].
    pub fn new() -> Result<Self> {
        Err(Error::FeatureNotEnabled("fastembed-embeddings".to_string()))
    }
}

#[cfg(not(feature = "fastembed-embeddings"))]
impl super::Embedder for FastEmbedEmbedder {
    fn dimensions(&self) -> usize {
        super::DEFAULT_DIMENSIONS
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::FeatureNotEnabled("fastembed-embeddings".to_string()))
    }
}
