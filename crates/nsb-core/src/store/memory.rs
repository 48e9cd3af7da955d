//! In-memory payload store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{PayloadStore, StoreError};
use crate::keygen::PayloadKeyGenerator;

/// Process-local payload store.
///
/// Implements the same contract as [`super::RedisStore`] over a `HashMap`,
/// for tests and single-host deployments that do not want an external store.
/// Clone handles (wrap in `Arc`) to share one store between clients.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    keys: PayloadKeyGenerator,
}

impl MemoryStore {
    /// Creates an empty store minting keys for `client_id`.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            keys: PayloadKeyGenerator::new(client_id),
        }
    }

    /// Number of payloads currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("store lock poisoned").len()
    }

    /// Whether the store holds no payloads.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a payload is stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .contains_key(key)
    }
}

#[async_trait]
impl PayloadStore for MemoryStore {
    async fn put(&self, value: &[u8]) -> Result<String, StoreError> {
        let key = self.keys.next_key();
        self.entries
            .lock()
            .expect("store lock poisoned")
            .insert(key.clone(), value.to_vec());
        Ok(key)
    }

    async fn take(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .remove(key)
            .ok_or_else(|| StoreError::Missing {
                key: key.to_owned(),
            })
    }

    async fn peek(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.entries
            .lock()
            .expect("store lock poisoned")
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::Missing {
                key: key.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_take_roundtrip() {
        let store = MemoryStore::new("node1");
        let key = store.put(b"payload").await.unwrap();
        assert!(store.contains(&key));

        let value = store.take(&key).await.unwrap();
        assert_eq!(value, b"payload");
        assert!(!store.contains(&key));
    }

    #[tokio::test]
    async fn take_is_destructive_peek_is_not() {
        let store = MemoryStore::new("node1");
        let key = store.put(b"payload").await.unwrap();

        assert_eq!(store.peek(&key).await.unwrap(), b"payload");
        assert_eq!(store.peek(&key).await.unwrap(), b"payload");

        store.take(&key).await.unwrap();
        assert!(matches!(
            store.take(&key).await,
            Err(StoreError::Missing { .. })
        ));
    }

    #[tokio::test]
    async fn miss_reports_the_key() {
        let store = MemoryStore::new("node1");
        match store.peek("nope").await {
            Err(StoreError::Missing { key }) => assert_eq!(key, "nope"),
            other => panic!("expected miss, got {other:?}"),
        }
    }
}
