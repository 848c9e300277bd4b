//! Service wiring.
//!
//! Backends are process-scoped handles created once and passed into each
//! service constructor, so any of them can be swapped for a test double.
//!
//! ```text
//! ServiceContainer
//!   ├── LeaseManager    (ledger, lease store, cache)
//!   ├── AccessResolver  (lease manager)
//!   ├── AuditRecorder   (audit store, ledger)
//!   ├── RetrievalService
//!   └── IngestService
//! ```

use super::{AccessResolver, AuditRecorder, IngestService, LeaseManager, RetrievalService};
use crate::config::{
    CacheKind, EmbeddingBackend, LedgerBackend, MemleaseConfig, RetrievalConfig, VectorBackend,
};
use crate::embedding::{DEFAULT_DIMENSIONS, Embedder, FastEmbedEmbedder, HashEmbedder, HttpEmbedder};
use crate::ledger::{HttpLedger, Ledger, LocalLedger, ResilientLedger};
use crate::storage::{
    AuditStore, CacheBackend, FlatVectorIndex, LeaseStore, MemoryCache, MemoryStore, QdrantIndex,
    RedisCache, ResilientVectorIndex, SqliteStore, VectorIndex,
};
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;

/// Capacity of the in-process lease cache used by [`ServiceContainer::in_memory`].
const IN_MEMORY_CACHE_CAPACITY: usize = 1_000;

/// The external collaborators every service is built from.
#[derive(Clone)]
pub struct Backends {
    /// Lease and audit system of record.
    pub ledger: Arc<dyn Ledger>,
    /// Relational lease projection.
    pub leases: Arc<dyn LeaseStore>,
    /// Relational audit rows.
    pub audits: Arc<dyn AuditStore>,
    /// Relational memory rows and chunk mappings.
    pub memories: Arc<dyn MemoryStore>,
    /// Lease cache.
    pub cache: Arc<dyn CacheBackend>,
    /// Chunk vectors.
    pub index: Arc<dyn VectorIndex>,
    /// Embedding service.
    pub embedder: Arc<dyn Embedder>,
}

impl Backends {
    /// Fully in-process backends: in-memory `SQLite`, local ledger, LRU cache,
    /// flat index and hash embedder.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn in_memory(dimensions: usize) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        Ok(Self {
            ledger: Arc::new(LocalLedger::in_memory()),
            leases: store.clone(),
            audits: store.clone(),
            memories: store,
            cache: Arc::new(MemoryCache::new(IN_MEMORY_CACHE_CAPACITY)),
            index: Arc::new(FlatVectorIndex::in_memory(dimensions)),
            embedder: Arc::new(HashEmbedder::new(dimensions)),
        })
    }

    /// Creates the backends a configuration selects.
    ///
    /// Remote ledger and vector backends are wrapped in circuit breakers.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend cannot be opened, an optional backend
    /// was not compiled in, or the embedder and index disagree on
    /// dimensionality.
    pub fn from_config(config: &MemleaseConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::new(config.db_path())?);
        let ledger = create_ledger(config)?;
        let cache = create_cache(config)?;
        let index = create_index(config)?;
        let embedder = create_embedder(config)?;

        if embedder.dimensions() != index.dimensions() {
            return Err(Error::InvalidInput(format!(
                "embedder produces {} dimensions but the vector index expects {}",
                embedder.dimensions(),
                index.dimensions()
            )));
        }

        tracing::debug!(
            ledger = ledger.backend_name(),
            cache = cache.backend_name(),
            vector = index.backend_name(),
            "Created backends"
        );
        Ok(Self {
            ledger,
            leases: store.clone(),
            audits: store.clone(),
            memories: store,
            cache,
            index,
            embedder,
        })
    }
}

fn create_ledger(config: &MemleaseConfig) -> Result<Arc<dyn Ledger>> {
    Ok(match config.ledger.backend {
        LedgerBackend::Local => Arc::new(LocalLedger::open(config.ledger_journal_path())?),
        LedgerBackend::Http => {
            let ledger = HttpLedger::new(&config.ledger.endpoint)
                .with_api_key(config.ledger.api_key.clone())
                .with_timeout_ms(config.ledger.timeout_ms);
            Arc::new(ResilientLedger::new(ledger, &config.resilience))
        },
    })
}

fn create_cache(config: &MemleaseConfig) -> Result<Arc<dyn CacheBackend>> {
    Ok(match config.cache.backend {
        CacheKind::Memory => Arc::new(MemoryCache::new(config.cache.capacity)),
        CacheKind::Redis => Arc::new(RedisCache::new(&config.cache.url)?),
    })
}

fn create_index(config: &MemleaseConfig) -> Result<Arc<dyn VectorIndex>> {
    let dimensions = config.vector.dimensions;
    Ok(match config.vector.backend {
        VectorBackend::Flat => {
            Arc::new(FlatVectorIndex::open(config.vector_snapshot_path(), dimensions)?)
        },
        VectorBackend::Qdrant => {
            let index = QdrantIndex::new(&config.vector.url, &config.vector.collection, dimensions)
                .with_api_key(config.vector.api_key.clone());
            Arc::new(ResilientVectorIndex::new(index, &config.resilience))
        },
    })
}

fn create_embedder(config: &MemleaseConfig) -> Result<Arc<dyn Embedder>> {
    let dimensions = config.vector.dimensions;
    Ok(match config.embedding.backend {
        EmbeddingBackend::Hash => Arc::new(HashEmbedder::new(dimensions)),
        EmbeddingBackend::Http => Arc::new(
            HttpEmbedder::new(&config.embedding.endpoint, dimensions)
                .with_api_key(config.embedding.api_key.clone())
                .with_timeout_ms(config.embedding.timeout_ms),
        ),
        EmbeddingBackend::FastEmbed => Arc::new(FastEmbedEmbedder::new()?),
    })
}

/// Backend names and sizes, for the `status` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    /// Ledger backend.
    pub ledger: &'static str,
    /// Cache backend.
    pub cache: &'static str,
    /// Vector index backend.
    pub vector_index: &'static str,
    /// Index dimensionality.
    pub dimensions: usize,
    /// Vectors currently indexed.
    pub indexed_chunks: usize,
}

/// All services, wired over one set of backends.
pub struct ServiceContainer {
    backends: Backends,
    leases: Arc<LeaseManager>,
    resolver: Arc<AccessResolver>,
    audit: Arc<AuditRecorder>,
    retrieval: RetrievalService,
    ingest: IngestService,
}

impl ServiceContainer {
    /// Wires services over explicit backends.
    #[must_use]
    pub fn from_backends(
        backends: Backends,
        retrieval: RetrievalConfig,
        max_chunk_chars: usize,
    ) -> Self {
        let leases = Arc::new(LeaseManager::new(
            backends.ledger.clone(),
            backends.leases.clone(),
            backends.cache.clone(),
        ));
        let resolver = Arc::new(AccessResolver::new(leases.clone()));
        let audit = Arc::new(AuditRecorder::new(
            backends.audits.clone(),
            backends.ledger.clone(),
        ));
        let retrieval = RetrievalService::new(
            retrieval,
            resolver.clone(),
            backends.embedder.clone(),
            backends.index.clone(),
            backends.memories.clone(),
            audit.clone(),
        );
        let ingest = IngestService::new(
            backends.embedder.clone(),
            backends.index.clone(),
            backends.memories.clone(),
            max_chunk_chars,
        );
        Self {
            backends,
            leases,
            resolver,
            audit,
            retrieval,
            ingest,
        }
    }

    /// Wires services from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a backend cannot
    /// be created.
    pub fn from_config(config: &MemleaseConfig) -> Result<Self> {
        config.validate()?;
        let backends = Backends::from_config(config)?;
        Ok(Self::from_backends(
            backends,
            config.retrieval,
            config.vector.max_chunk_chars,
        ))
    }

    /// Fully in-process services with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let defaults = MemleaseConfig::default();
        Ok(Self::from_backends(
            Backends::in_memory(DEFAULT_DIMENSIONS)?,
            defaults.retrieval,
            defaults.vector.max_chunk_chars,
        ))
    }

    /// Lease lifecycle.
    #[must_use]
    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    /// Access resolution.
    #[must_use]
    pub fn resolver(&self) -> &AccessResolver {
        &self.resolver
    }

    /// Audit trail.
    #[must_use]
    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    /// Retrieval orchestrator.
    #[must_use]
    pub const fn retrieval(&self) -> &RetrievalService {
        &self.retrieval
    }

    /// Memory ingestion.
    #[must_use]
    pub const fn ingest(&self) -> &IngestService {
        &self.ingest
    }

    /// The underlying backends.
    #[must_use]
    pub const fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Reports backend names and index size.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector index cannot be counted.
    pub fn status(&self) -> Result<SystemStatus> {
        Ok(SystemStatus {
            ledger: self.backends.ledger.backend_name(),
            cache: self.backends.cache.backend_name(),
            vector_index: self.backends.index.backend_name(),
            dimensions: self.backends.index.dimensions(),
            indexed_chunks: self.backends.index.count()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_status() {
        let services = ServiceContainer::in_memory().unwrap();
        let status = services.status().unwrap();
        assert_eq!(status.ledger, "local_ledger");
        assert_eq!(status.cache, "memory");
        assert_eq!(status.vector_index, "flat");
        assert_eq!(status.dimensions, DEFAULT_DIMENSIONS);
        assert_eq!(status.indexed_chunks, 0);
    }

    #[test]
    fn test_from_config_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let config = MemleaseConfig::default().with_data_dir(dir.path());

        let lease_id = {
            let services = ServiceContainer::from_config(&config).unwrap();
            services
                .leases()
                .create_lease("0xabc", "assistant1", "global", 7)
                .unwrap()
        };

        let services = ServiceContainer::from_config(&config).unwrap();
        let status = services.leases().check_lease(lease_id.as_str()).unwrap();
        assert!(status.is_active);
        assert!(dir.path().join("memlease.db").exists());
        assert!(dir.path().join("ledger.jsonl").exists());
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let dir = TempDir::new().unwrap();
        let mut config = MemleaseConfig::default().with_data_dir(dir.path());
        config.retrieval.candidate_multiplier = 0;
        assert!(matches!(
            ServiceContainer::from_config(&config),
            Err(Error::InvalidInput(_))
        ));
    }

    #[cfg(not(feature = "redis"))]
    #[test]
    fn test_redis_without_feature() {
        let dir = TempDir::new().unwrap();
        let mut config = MemleaseConfig::default().with_data_dir(dir.path());
        config.cache.backend = CacheKind::Redis;
        assert!(matches!(
            ServiceContainer::from_config(&config),
            Err(Error::FeatureNotEnabled(_))
        ));
    }
}
