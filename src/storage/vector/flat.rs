//! Brute-force vector index.

use crate::embedding::{cosine_similarity, validate_dimensions};
use crate::models::{ChunkFilter, ChunkMatch, ChunkPayload};
use crate::storage::metrics::timed;
use crate::storage::traits::VectorIndex;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::instrument;

const BACKEND: &str = "flat";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    vector: Vec<f32>,
    /// Stored as an open map so a snapshot written by an older schema still
    /// loads; decoding happens per match.
    payload: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct IndexData {
    dimensions: usize,
    entries: HashMap<u64, Entry>,
}

struct State {
    entries: HashMap<u64, Entry>,
    dirty: bool,
}

/// In-process vector index scanning every stored vector per query.
///
/// Filtering on `principal` and `source` happens on the raw payload before
/// scoring, mirroring how a remote index applies payload filters natively.
/// With a snapshot path the index is loaded on open and written back on
/// [`FlatVectorIndex::flush`] and on drop.
pub struct FlatVectorIndex {
    dimensions: usize,
    snapshot_path: Option<PathBuf>,
    state: RwLock<State>,
}

impl FlatVectorIndex {
    /// Creates an in-memory index (no persistence).
    #[must_use]
    pub fn in_memory(dimensions: usize) -> Self {
        Self {
            dimensions,
            snapshot_path: None,
            state: RwLock::new(State {
                entries: HashMap::new(),
                dirty: false,
            }),
        }
    }

    /// Opens an index backed by a JSON snapshot, loading it if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read or parsed, or was
    /// written with different dimensions.
    pub fn open(snapshot_path: impl Into<PathBuf>, dimensions: usize) -> Result<Self> {
        let snapshot_path = snapshot_path.into();
        let mut entries = HashMap::new();

        if snapshot_path.exists() {
            let content = fs::read_to_string(&snapshot_path).map_err(|e| Error::OperationFailed {
                operation: "load_vector_snapshot".to_string(),
                cause: e.to_string(),
            })?;
            let data: IndexData =
                serde_json::from_str(&content).map_err(|e| Error::OperationFailed {
                    operation: "parse_vector_snapshot".to_string(),
                    cause: e.to_string(),
                })?;
            if data.dimensions != dimensions {
                return Err(Error::InvalidInput(format!(
                    "vector snapshot dimensions mismatch: expected {dimensions}, got {}",
                    data.dimensions
                )));
            }
            entries = data.entries;
        }

        Ok(Self {
            dimensions,
            snapshot_path: Some(snapshot_path),
            state: RwLock::new(State {
                entries,
                dirty: false,
            }),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes the snapshot if anything changed since the last flush.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let mut state = self.write();
        if !state.dirty {
            return Ok(());
        }

        let data = IndexData {
            dimensions: self.dimensions,
            entries: state.entries.clone(),
        };
        let content = serde_json::to_string(&data).map_err(|e| Error::OperationFailed {
            operation: "serialize_vector_snapshot".to_string(),
            cause: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_vector_dir".to_string(),
                cause: e.to_string(),
            })?;
        }
        fs::write(path, content).map_err(|e| Error::OperationFailed {
            operation: "write_vector_snapshot".to_string(),
            cause: e.to_string(),
        })?;

        state.dirty = false;
        Ok(())
    }

    fn payload_matches(payload: &serde_json::Value, filter: &ChunkFilter) -> bool {
        let field = |name: &str| payload.get(name).and_then(serde_json::Value::as_str);
        field("principal") == Some(filter.principal.as_str())
            && filter
                .source
                .as_deref()
                .is_none_or(|source| field("source") == Some(source))
    }
}

impl VectorIndex for FlatVectorIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[instrument(skip(self, vector, payload), fields(operation = "vector_upsert", backend = BACKEND, vector.id = id))]
    fn upsert(&self, id: u64, vector: &[f32], payload: &ChunkPayload) -> Result<()> {
        validate_dimensions(vector, self.dimensions)?;
        timed(BACKEND, "upsert", || {
            let payload = serde_json::to_value(payload).map_err(|e| Error::OperationFailed {
                operation: "encode_chunk_payload".to_string(),
                cause: e.to_string(),
            })?;
            let mut state = self.write();
            state.entries.insert(
                id,
                Entry {
                    vector: vector.to_vec(),
                    payload,
                },
            );
            state.dirty = true;
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
            let state = self.read();
            let mut scored: Vec<(u64, f32, &serde_json::Value)> = state
                .entries
                .iter()
                .filter(|(_, entry)| Self::payload_matches(&entry.payload, filter))
                .map(|(id, entry)| (*id, cosine_similarity(vector, &entry.vector), &entry.payload))
                .filter(|(_, score, _)| *score >= score_threshold)
                .collect();

            scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

            Ok(scored
                .into_iter()
                .take(limit)
                .map(|(id, score, payload)| ChunkMatch {
                    id,
                    score,
                    payload: ChunkPayload::from_value(payload.clone()),
                })
                .collect())
        })
    }

    fn count(&self) -> Result<usize> {
        Ok(self.read().entries.len())
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

impl Drop for FlatVectorIndex {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "Failed to write vector snapshot on drop");
        }
    }
}
