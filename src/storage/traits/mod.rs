//! Storage backend traits.
//!
//! Every trait takes `&self` so backends can be shared as `Arc<dyn Trait>`;
//! implementations use interior mutability for their state.

mod cache;
mod relational;
mod vector;

pub use cache::CacheBackend;
pub use relational::{AuditStore, InsertOutcome, LeaseStore, MemoryStore};
pub use vector::VectorIndex;
