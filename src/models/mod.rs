//! Data models for memlease.
//!
//! This module contains the core data structures shared by the storage
//! adapters and the services.

mod audit;
mod chunk;
mod lease;
mod memory;
mod principal;
mod retrieval;

pub use audit::{AuditAction, AuditRecord, AuditStats};
pub use chunk::{ChunkFilter, ChunkMatch, ChunkPayload, chunk_vector_id};
pub use lease::{AccessSpecifier, GLOBAL_ACCESS, Lease, LeaseId, LeaseStatus};
pub use memory::{ImageRef, Memory, MemoryId};
pub use principal::Principal;
pub use retrieval::RankedMemory;
