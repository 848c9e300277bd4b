//! Vector index backends.
//!
//! | Backend | Search | Persistence |
//! |---------|--------|-------------|
//! | [`FlatVectorIndex`] | Brute-force cosine, O(n) | Optional JSON snapshot |
//! | [`QdrantIndex`] | Remote HNSW with native payload filters | Qdrant collection |

mod flat;
mod qdrant;

pub use flat::FlatVectorIndex;
pub use qdrant::QdrantIndex;
