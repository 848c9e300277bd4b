//! Lease cache backends.
//!
//! | Backend | Use Case |
//! |---------|----------|
//! | [`MemoryCache`] | Single process, default |
//! | [`RedisCache`] | Shared across processes (feature `redis`) |

mod memory;
mod redis;

pub use memory::MemoryCache;
pub use redis::RedisCache;
