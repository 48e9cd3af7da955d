//! Buffer entries: the broker's record of one payload in flight.

/// The payload carrier of a [`MessageEntry`]: either the literal bytes, or
/// the key the payload was offloaded under.
///
/// When a simulator client fetches an offloaded payload, the store is peeked
/// rather than drained, so the carrier keeps the key (for the eventual POST)
/// alongside the optionally retrieved bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadObj {
    /// The payload travels inline on the wire.
    Inline(Vec<u8>),
    /// The payload lives in the offload store under `key`.
    Offloaded {
        /// Store key the payload was put under.
        key: String,
        /// Bytes retrieved from the store, when they have been brought in.
        payload: Option<Vec<u8>>,
    },
}

impl PayloadObj {
    /// Returns the payload bytes if they are locally available.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Inline(bytes) => Some(bytes),
            Self::Offloaded { payload, .. } => payload.as_deref(),
        }
    }

    /// Returns the offload store key, if this carrier is offloaded.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Inline(_) => None,
            Self::Offloaded { key, .. } => Some(key),
        }
    }
}

/// One payload in flight through the broker.
///
/// Created inside a SEND/POST handler, held in the transmission or reception
/// buffer in FIFO order, and destroyed when a matching FETCH/RECEIVE pops it.
/// In PUSH mode entries never exist; frames are forwarded in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    /// Identifier of the sending application client.
    pub source: String,
    /// Identifier of the destination application client.
    pub destination: String,
    /// The payload bytes or offload key.
    pub payload_obj: PayloadObj,
    /// Size of the payload in bytes.
    pub payload_size: u64,
}

impl MessageEntry {
    /// Creates a new entry.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        payload_obj: PayloadObj,
        payload_size: u64,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            payload_obj,
            payload_size,
        }
    }

    /// Whether this entry holds a real message (non-empty source).
    #[must_use]
    pub fn exists(&self) -> bool {
        !self.source.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inline_carrier_exposes_bytes() {
        let obj = PayloadObj::Inline(b"abc".to_vec());
        assert_eq!(obj.bytes(), Some(&b"abc"[..]));
        assert_eq!(obj.key(), None);
    }

    #[test]
    fn offloaded_carrier_keeps_key_and_optional_bytes() {
        let obj = PayloadObj::Offloaded {
            key: "171234-node1-1".into(),
            payload: None,
        };
        assert_eq!(obj.bytes(), None);
        assert_eq!(obj.key(), Some("171234-node1-1"));

        let obj = PayloadObj::Offloaded {
            key: "171234-node1-1".into(),
            payload: Some(b"big".to_vec()),
        };
        assert_eq!(obj.bytes(), Some(&b"big"[..]));
    }

    #[test]
    fn entry_exists_tracks_source() {
        let entry = MessageEntry::new("node1", "node2", PayloadObj::Inline(vec![]), 0);
        assert!(entry.exists());

        let blank = MessageEntry::new("", "", PayloadObj::Inline(vec![]), 0);
        assert!(!blank.exists());
    }
}
