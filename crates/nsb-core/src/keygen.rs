//! Payload key generation for the offload store.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Mask applied to the millisecond timestamp component (41 bits).
const TIMESTAMP_MASK: u128 = 0x1FF_FFFF_FFFF;

/// Mask applied to the per-client counter component (20 bits).
const COUNTER_MASK: u32 = 0xF_FFFF;

/// Generates payload keys unique under concurrent puts from any client.
///
/// A key is `timestamp-clientId-counter`, where the timestamp is the current
/// epoch milliseconds masked to 41 bits and the counter is a lock-protected
/// monotonic value masked to 20 bits. Client identifiers are unique per
/// originator kind, so keys from different clients cannot collide, and the
/// counter disambiguates keys minted within one millisecond.
#[derive(Debug)]
pub struct PayloadKeyGenerator {
    client_id: String,
    counter: Mutex<u32>,
}

impl PayloadKeyGenerator {
    /// Creates a generator for the given client identifier.
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            counter: Mutex::new(0),
        }
    }

    /// Mints the next payload key.
    ///
    /// # Panics
    ///
    /// Panics if the system clock is before the Unix epoch.
    #[must_use]
    pub fn next_key(&self) -> String {
        let mut counter = self.counter.lock().expect("key counter lock poisoned");
        *counter = (*counter + 1) & COUNTER_MASK;
        let seq = *counter;
        drop(counter);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_millis()
            & TIMESTAMP_MASK;
        format!("{millis}-{}-{seq}", self.client_id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn keys_embed_client_id() {
        let keys = PayloadKeyGenerator::new("node1");
        let key = keys.next_key();
        let parts: Vec<&str> = key.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], "node1");
        assert_eq!(parts[2], "1");
    }

    #[test]
    fn consecutive_keys_are_distinct() {
        let keys = PayloadKeyGenerator::new("node1");
        let minted: HashSet<String> = (0..1000).map(|_| keys.next_key()).collect();
        assert_eq!(minted.len(), 1000);
    }

    #[test]
    fn counter_wraps_at_twenty_bits() {
        let keys = PayloadKeyGenerator::new("node1");
        {
            let mut counter = keys.counter.lock().unwrap();
            *counter = COUNTER_MASK;
        }
        let key = keys.next_key();
        assert!(key.ends_with("-0"), "expected wrapped counter in {key}");
    }
}
