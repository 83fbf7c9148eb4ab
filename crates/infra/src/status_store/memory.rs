//! In-memory status store for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{StatusStore, StatusStoreError};

#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StatusStoreError {
    StatusStoreError::Backend("status store lock poisoned".to_string())
}

impl StatusStore for InMemoryStatusStore {
    fn read(&self, key: &str) -> Result<Option<String>, StatusStoreError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StatusStoreError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StatusStoreError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_remove() {
        let store = InMemoryStatusStore::new();
        assert_eq!(store.read("process-1").unwrap(), None);

        store.write("process-1", "{}").unwrap();
        assert_eq!(store.read("process-1").unwrap().as_deref(), Some("{}"));

        store.remove("process-1").unwrap();
        store.remove("process-1").unwrap();
        assert!(store.is_empty());
    }
}
