//! Out-of-band status store for per-part job records.
//!
//! The store is a plain string key-value space (Redis in production). Typed
//! access to part records and training markers goes through
//! [`StatusRecords`].

pub mod memory;
pub mod records;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::InMemoryStatusStore;
pub use records::{StatusRecords, TrainingLookup};
#[cfg(feature = "redis")]
pub use self::redis::RedisStatusStore;

use std::sync::Arc;

/// Raw key-value access to the status store.
pub trait StatusStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StatusStoreError>;

    fn write(&self, key: &str, value: &str) -> Result<(), StatusStoreError>;

    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StatusStoreError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StatusStoreError {
    #[error("status store backend error: {0}")]
    Backend(String),
    #[error("status record could not be encoded: {0}")]
    Encode(String),
}

impl<T: StatusStore + ?Sized> StatusStore for Arc<T> {
    fn read(&self, key: &str) -> Result<Option<String>, StatusStoreError> {
        (**self).read(key)
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StatusStoreError> {
        (**self).write(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StatusStoreError> {
        (**self).remove(key)
    }
}
