//! Business logic services.
//!
//! Services orchestrate the ledger and storage backends and provide the
//! lease, access, audit, retrieval and ingestion operations.
//!
//! # Failure policy
//!
//! | Service | On upstream failure |
//! |---------|---------------------|
//! | [`LeaseManager`] | Surfaced to the caller |
//! | [`AccessResolver`] | Surfaced to the caller |
//! | [`AuditRecorder`] | Logged and counted, never surfaced |
//! | [`RetrievalService`] | Recorded as a denial, then surfaced |
//! | [`IngestService`] | Surfaced to the caller |

mod access;
mod audit;
mod container;
mod fingerprint;
mod ingest;
mod lease;
mod retrieval;

pub use access::{AccessDecision, AccessResolver, resolve_among};
pub use audit::{AuditDecision, AuditRecorder, MAX_TRAIL_LIMIT};
pub use container::{Backends, ServiceContainer, SystemStatus};
pub use fingerprint::fingerprint;
pub use ingest::{IngestOutcome, IngestRequest, IngestService, chunk_content};
pub use lease::{LeaseManager, MAX_LEASE_DAYS, SECONDS_PER_DAY};
pub use retrieval::{RetrievalRequest, RetrievalService};
