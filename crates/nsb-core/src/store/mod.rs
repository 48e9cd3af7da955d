//! Payload offload store.
//!
//! Larger payloads can be kept out of the socket path: the sending client
//! `put`s the bytes into an external key/value store and only the key travels
//! through the broker. The receiving side brings the bytes back in with
//! `peek` (non-destructive, used on FETCH while the payload is still in
//! flight through the simulator) or `take` (atomic get-and-delete, used on
//! RECEIVE when delivery is final).
//!
//! Store failures are never fatal to the broker: a failed `put` drops the
//! affected SEND/POST, and a `take`/`peek` miss surfaces as a distinct
//! [`StoreError::Missing`] error.

mod memory;
mod redis;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Errors from the payload offload store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store was unreachable or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(#[from] ::redis::RedisError),

    /// The requested key was not present.
    #[error("no payload stored under key {key}")]
    Missing {
        /// The key that missed.
        key: String,
    },
}

/// Abstract key/value store for offloaded payloads.
///
/// Keys minted by `put` are unique under concurrent puts from any client.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    /// Stores a payload under a freshly minted key and returns the key.
    async fn put(&self, value: &[u8]) -> Result<String, StoreError>;

    /// Atomically retrieves and deletes the payload under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] if no payload is stored under `key`.
    async fn take(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Retrieves the payload under `key` without deleting it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] if no payload is stored under `key`.
    async fn peek(&self, key: &str) -> Result<Vec<u8>, StoreError>;
}
