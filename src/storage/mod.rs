//! Storage layer.
//!
//! Four independently failing collaborators sit behind traits:
//! - **Relational**: leases, audit rows, memories (`SQLite`)
//! - **Cache**: TTL lease lookups (in-process LRU, Redis)
//! - **Vector**: chunk similarity search (brute force, Qdrant)
//!
//! The ledger lives in [`crate::ledger`] because it is the identity authority
//! rather than a projection.

// Allow cast precision loss for score calculations where exact precision is not critical.
#![allow(clippy::cast_precision_loss)]
// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]

pub mod cache;
pub mod metrics;
pub mod resilience;
pub mod sqlite;
pub mod traits;
pub mod vector;

pub use cache::{MemoryCache, RedisCache};
pub use resilience::{
    CircuitBreaker, CircuitState, GuardedCalls, ResilientVectorIndex, StorageResilienceConfig,
};
pub use sqlite::SqliteStore;
pub use traits::{AuditStore, CacheBackend, InsertOutcome, LeaseStore, MemoryStore, VectorIndex};
pub use vector::{FlatVectorIndex, QdrantIndex};
