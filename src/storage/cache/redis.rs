//! Redis-backed lease cache.
//!
//! Entries are plain string keys written with `SET key value EX ttl`, so the
//! TTL is enforced by Redis itself. Requires the `redis` feature; without it
//! every operation returns [`Error::FeatureNotEnabled`].

use crate::storage::traits::CacheBackend;
use crate::{Error, Result};

#[cfg(feature = "redis")]
use crate::storage::metrics::timed;
#[cfg(feature = "redis")]
use redis::{Client, Connection};
#[cfg(feature = "redis")]
use std::sync::{Mutex, PoisonError};
#[cfg(feature = "redis")]
use tracing::instrument;

#[cfg(feature = "redis")]
const BACKEND: &str = "redis";

/// Redis cache backend.
pub struct RedisCache {
    /// Redis connection URL.
    connection_url: String,
    /// Redis client.
    #[cfg(feature = "redis")]
    client: Client,
    /// Cached connection, reopened after an error.
    #[cfg(feature = "redis")]
    connection: Mutex<Option<Connection>>,
}

impl RedisCache {
    /// Creates a Redis cache for `connection_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    #[cfg(feature = "redis")]
    pub fn new(connection_url: impl Into<String>) -> Result<Self> {
        let connection_url = connection_url.into();
        let client = Client::open(connection_url.as_str()).map_err(|e| Error::OperationFailed {
            operation: "redis_connect".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self {
            connection_url,
            client,
            connection: Mutex::new(None),
        })
    }

    /// Creates a Redis cache (stub when the feature is disabled).
    ///
    /// # Errors
    ///
    /// Always returns [`Error::FeatureNotEnabled`].
    #[cfg(not(feature = "redis"))]
    pub fn new(connection_url: impl Into<String>) -> Result<Self> {
        tracing::debug!(url = %connection_url.into(), "Redis cache requested without the redis feature");
        Err(Error::FeatureNotEnabled("redis".to_string()))
    }

    /// Returns the connection URL.
    #[must_use]
    pub fn connection_url(&self) -> &str {
        &self.connection_url
    }
}

#[cfg(feature = "redis")]
impl RedisCache {
    fn with_connection<T>(
        &self,
        operation: &'static str,
        call: impl FnOnce(&mut Connection) -> redis::RedisResult<T>,
    ) -> Result<T> {
        let mut slot = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self
                .client
                .get_connection()
                .map_err(|e| Error::OperationFailed {
                    operation: "redis_get_connection".to_string(),
                    cause: e.to_string(),
                })?,
        };

        match call(&mut conn) {
            Ok(value) => {
                *slot = Some(conn);
                Ok(value)
            },
            Err(e) => {
                tracing::warn!(operation, error = %e, "Redis command failed, dropping connection");
                Err(Error::OperationFailed {
                    operation: format!("redis_{operation}"),
                    cause: e.to_string(),
                })
            },
        }
    }
}

#[cfg(feature = "redis")]
impl CacheBackend for RedisCache {
    #[instrument(skip(self, value), fields(operation = "cache_set", backend = BACKEND, key = %key))]
    fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        timed(BACKEND, "set", || {
            if ttl_secs == 0 {
                return self
                    .with_connection("del", |conn| redis::cmd("DEL").arg(key).query::<i64>(conn))
                    .map(|_| ());
            }
            self.with_connection("set", |conn| {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("EX")
                    .arg(ttl_secs)
                    .query::<()>(conn)
            })
        })
    }

    #[instrument(skip(self), fields(operation = "cache_get", backend = BACKEND, key = %key))]
    fn get(&self, key: &str) -> Result<Option<String>> {
        timed(BACKEND, "get", || {
            self.with_connection("get", |conn| {
                redis::cmd("GET").arg(key).query::<Option<String>>(conn)
            })
        })
    }

    #[instrument(skip(self), fields(operation = "cache_delete", backend = BACKEND, key = %key))]
    fn delete(&self, key: &str) -> Result<bool> {
        timed(BACKEND, "delete", || {
            self.with_connection("del", |conn| redis::cmd("DEL").arg(key).query::<i64>(conn))
                .map(|removed| removed > 0)
        })
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

#[cfg(not(feature = "redis"))]
impl CacheBackend for RedisCache {
    fn set(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<()> {
        Err(Error::FeatureNotEnabled("redis".to_string()))
    }

    fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(Error::FeatureNotEnabled("redis".to_string()))
    }

    fn delete(&self, _key: &str) -> Result<bool> {
        Err(Error::FeatureNotEnabled("redis".to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
