//! Redis-backed status store (optional).
//!
//! One string value per key, written with plain `SET`; no expiry is applied.
//! Part records are small JSON blobs, so a fresh connection per call is fine.

use redis::Commands;
use tracing::{instrument, warn};

use super::{StatusStore, StatusStoreError};

#[derive(Debug, Clone)]
pub struct RedisStatusStore {
    client: redis::Client,
}

impl RedisStatusStore {
    /// `redis_url` e.g. `redis://localhost:6379`.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, StatusStoreError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(backend)?;
        Ok(Self { client })
    }

    fn connection(&self) -> Result<redis::Connection, StatusStoreError> {
        self.client.get_connection().map_err(backend)
    }
}

fn backend(e: redis::RedisError) -> StatusStoreError {
    StatusStoreError::Backend(e.to_string())
}

/// Values that are not UTF-8 read as absent, like any other malformed blob.
fn decode_utf8(key: &str, bytes: Vec<u8>) -> Option<String> {
    match String::from_utf8(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "status value is not UTF-8, treating as absent");
            None
        }
    }
}

impl StatusStore for RedisStatusStore {
    #[instrument(skip(self), err)]
    fn read(&self, key: &str) -> Result<Option<String>, StatusStoreError> {
        let mut conn = self.connection()?;
        let raw: Option<Vec<u8>> = conn.get(key).map_err(backend)?;
        Ok(raw.and_then(|bytes| decode_utf8(key, bytes)))
    }

    #[instrument(skip(self, value), fields(bytes = value.len()), err)]
    fn write(&self, key: &str, value: &str) -> Result<(), StatusStoreError> {
        let mut conn = self.connection()?;
        conn.set(key, value).map_err(backend)
    }

    #[instrument(skip(self), err)]
    fn remove(&self, key: &str) -> Result<(), StatusStoreError> {
        let mut conn = self.connection()?;
        let _: i64 = conn.del(key).map_err(backend)?;
        Ok(())
    }
}
