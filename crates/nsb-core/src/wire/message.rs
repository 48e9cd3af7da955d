//! The NSB message schema.
//!
//! A single protobuf message, [`Envelope`], travels on every channel. Its
//! manifest carries the operation, the originator, and a status code; the
//! remaining blocks are optional and populated per operation:
//!
//! | Block      | Used by                                    |
//! |------------|--------------------------------------------|
//! | `metadata` | SEND, FETCH, POST, RECEIVE, FORWARD        |
//! | `intro`    | INIT request                               |
//! | `config`   | INIT response                              |
//! | `payload`  | inline payload mode                        |
//! | `msg_key`  | offload store mode                         |
//!
//! Exactly one of `payload` / `msg_key` carries the payload; which one is
//! fixed by the daemon's offload flag and propagated to clients at INIT.

use bytes::Bytes;
use prost::Message;

use crate::entry::PayloadObj;
use crate::error::ProtocolResult;

/// Operation discriminator for a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum Operation {
    /// Handshake: register a client's channels and hand back configuration.
    Init = 0,
    /// Liveness check on the CTRL channel.
    Ping = 1,
    /// Application hands a payload to the broker.
    Send = 2,
    /// Simulator asks for a payload awaiting transport.
    Fetch = 3,
    /// Simulator hands back a transported (or dropped) payload.
    Post = 4,
    /// Application asks for a delivered payload.
    Receive = 5,
    /// Daemon-originated push of a frame that was not requested.
    Forward = 6,
    /// Shut the daemon down.
    Exit = 7,
}

/// Which kind of process originated a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum Originator {
    /// An application client.
    AppClient = 0,
    /// A simulator client.
    SimClient = 1,
    /// The broker daemon itself.
    Daemon = 2,
}

/// Status code qualifying an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum OpCode {
    /// The operation succeeded (or is a plain request).
    Success = 0,
    /// The operation failed.
    Failure = 1,
    /// A payload accompanies this frame.
    Message = 2,
    /// No payload was available (or the simulated network dropped it).
    NoMessage = 3,
}

/// Whether clients poll the broker or the broker pushes to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum SystemMode {
    /// The daemon buffers; clients poll with FETCH/RECEIVE.
    Pull = 0,
    /// The daemon forwards inline; clients wait passively on RECV.
    Push = 1,
}

/// Whether one simulator client serves the whole system or one per node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum SimulatorMode {
    /// A single simulator client transports all traffic.
    SystemWide = 0,
    /// One simulator client per simulated node.
    PerNode = 1,
}

/// The `{operation, originator, code}` triple present on every frame.
#[derive(Clone, Copy, PartialEq, Message)]
pub struct Manifest {
    /// Operation discriminant ([`Operation`]).
    #[prost(enumeration = "Operation", tag = "1")]
    pub op: i32,
    /// Originator discriminant ([`Originator`]).
    #[prost(enumeration = "Originator", tag = "2")]
    pub og: i32,
    /// Status code discriminant ([`OpCode`]).
    #[prost(enumeration = "OpCode", tag = "3")]
    pub code: i32,
}

/// Source, destination, and size of a payload. Absent fields are meaningful:
/// a FETCH without `src_id` pops the head of the queue, a RECEIVE without
/// `dest_id` defaults to the caller's own identifier.
#[derive(Clone, PartialEq, Message)]
pub struct Metadata {
    /// Identifier of the sending application client.
    #[prost(string, optional, tag = "1")]
    pub src_id: Option<String>,
    /// Identifier of the destination application client.
    #[prost(string, optional, tag = "2")]
    pub dest_id: Option<String>,
    /// Size of the payload in bytes.
    #[prost(uint64, tag = "3")]
    pub payload_size: u64,
}

/// Channel introduction details, carried only on the INIT request.
///
/// Ports are the locally-bound ports of each channel as observed by the
/// client; the daemon resolves `address:port` against its accept-time lookup
/// table to recover the connections.
#[derive(Clone, PartialEq, Message)]
pub struct IntroDetails {
    /// Client identifier.
    #[prost(string, tag = "1")]
    pub identifier: String,
    /// Client-side IP address shared by all three channels.
    #[prost(string, tag = "2")]
    pub address: String,
    /// Locally-bound port of the CTRL channel.
    #[prost(uint32, tag = "3")]
    pub ch_ctrl: u32,
    /// Locally-bound port of the SEND channel.
    #[prost(uint32, tag = "4")]
    pub ch_send: u32,
    /// Locally-bound port of the RECV channel.
    #[prost(uint32, tag = "5")]
    pub ch_recv: u32,
}

/// System configuration, carried only on the INIT response. Clients adopt
/// these parameters verbatim.
#[derive(Clone, PartialEq, Message)]
pub struct ConfigParams {
    /// PULL or PUSH delivery ([`SystemMode`]).
    #[prost(enumeration = "SystemMode", tag = "1")]
    pub sys_mode: i32,
    /// SYSTEM_WIDE or PER_NODE simulator routing ([`SimulatorMode`]).
    #[prost(enumeration = "SimulatorMode", tag = "2")]
    pub sim_mode: i32,
    /// Whether payloads are offloaded to the external store.
    #[prost(bool, tag = "3")]
    pub use_db: bool,
    /// Offload store address.
    #[prost(string, tag = "4")]
    pub db_address: String,
    /// Offload store port.
    #[prost(uint32, tag = "5")]
    pub db_port: u32,
    /// Offload store database number.
    #[prost(uint32, tag = "6")]
    pub db_num: u32,
}

/// One NSB frame: a manifest plus the operation-dependent blocks.
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    /// The `{op, og, code}` triple. Always present on valid frames.
    #[prost(message, optional, tag = "1")]
    pub manifest: Option<Manifest>,
    /// Payload routing metadata.
    #[prost(message, optional, tag = "2")]
    pub metadata: Option<Metadata>,
    /// Channel introduction (INIT request only).
    #[prost(message, optional, tag = "3")]
    pub intro: Option<IntroDetails>,
    /// System configuration (INIT response only).
    #[prost(message, optional, tag = "4")]
    pub config: Option<ConfigParams>,
    /// Inline payload bytes (inline mode).
    #[prost(bytes = "vec", optional, tag = "5")]
    pub payload: Option<Vec<u8>>,
    /// Offload store key (offload mode).
    #[prost(string, optional, tag = "6")]
    pub msg_key: Option<String>,
}

impl Envelope {
    /// Creates an envelope carrying only a manifest.
    #[must_use]
    pub fn control(op: Operation, og: Originator, code: OpCode) -> Self {
        Self {
            manifest: Some(Manifest {
                op: op as i32,
                og: og as i32,
                code: code as i32,
            }),
            ..Self::default()
        }
    }

    /// Attaches metadata and returns the envelope.
    #[must_use]
    pub fn with_metadata(
        mut self,
        src_id: Option<String>,
        dest_id: Option<String>,
        payload_size: u64,
    ) -> Self {
        self.metadata = Some(Metadata {
            src_id,
            dest_id,
            payload_size,
        });
        self
    }

    /// Returns the decoded operation, if the manifest is present and valid.
    #[must_use]
    pub fn op(&self) -> Option<Operation> {
        self.manifest.and_then(|m| Operation::try_from(m.op).ok())
    }

    /// Returns the decoded originator, if the manifest is present and valid.
    #[must_use]
    pub fn originator(&self) -> Option<Originator> {
        self.manifest.and_then(|m| Originator::try_from(m.og).ok())
    }

    /// Returns the decoded status code, if the manifest is present and valid.
    #[must_use]
    pub fn code(&self) -> Option<OpCode> {
        self.manifest.and_then(|m| OpCode::try_from(m.code).ok())
    }

    /// Rewrites the manifest operation in place, preserving originator and
    /// code. Used by the daemon to turn SEND/POST into FORWARD.
    pub fn rewrite_op(&mut self, op: Operation) {
        if let Some(m) = self.manifest.as_mut() {
            m.op = op as i32;
        }
    }

    /// Extracts the payload carrier according to the offload flag.
    ///
    /// With offload on, the carrier is the `msg_key`; otherwise it is the
    /// inline payload bytes. A missing field yields an empty carrier of the
    /// expected kind.
    #[must_use]
    pub fn carrier(&self, use_store: bool) -> PayloadObj {
        if use_store {
            PayloadObj::Offloaded {
                key: self.msg_key.clone().unwrap_or_default(),
                payload: None,
            }
        } else {
            PayloadObj::Inline(self.payload.clone().unwrap_or_default())
        }
    }

    /// Sets the payload carrier, populating `msg_key` or `payload`.
    pub fn set_carrier(&mut self, obj: &PayloadObj) {
        match obj {
            PayloadObj::Inline(bytes) => self.payload = Some(bytes.clone()),
            PayloadObj::Offloaded { key, .. } => self.msg_key = Some(key.clone()),
        }
    }

    /// Serializes this envelope to a frame body.
    #[must_use]
    pub fn encode_frame(&self) -> Bytes {
        Bytes::from(self.encode_to_vec())
    }

    /// Parses a frame body into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Decode`] if the bytes are not a valid
    /// envelope.
    pub fn decode_frame(buf: &[u8]) -> ProtocolResult<Self> {
        Ok(Self::decode(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_envelope_roundtrip() {
        let env = Envelope::control(Operation::Ping, Originator::AppClient, OpCode::Success);
        let decoded = Envelope::decode_frame(&env.encode_frame()).unwrap();

        assert_eq!(decoded.op(), Some(Operation::Ping));
        assert_eq!(decoded.originator(), Some(Originator::AppClient));
        assert_eq!(decoded.code(), Some(OpCode::Success));
        assert!(decoded.metadata.is_none());
        assert!(decoded.payload.is_none());
    }

    #[test]
    fn send_envelope_carries_metadata_and_payload() {
        let mut env = Envelope::control(Operation::Send, Originator::AppClient, OpCode::Message)
            .with_metadata(Some("node1".into()), Some("node2".into()), 2);
        env.set_carrier(&PayloadObj::Inline(b"hi".to_vec()));

        let decoded = Envelope::decode_frame(&env.encode_frame()).unwrap();
        let meta = decoded.metadata.as_ref().unwrap();
        assert_eq!(meta.src_id.as_deref(), Some("node1"));
        assert_eq!(meta.dest_id.as_deref(), Some("node2"));
        assert_eq!(meta.payload_size, 2);
        assert_eq!(decoded.payload.as_deref(), Some(&b"hi"[..]));
        assert!(decoded.msg_key.is_none());
    }

    #[test]
    fn carrier_follows_offload_flag() {
        let mut env = Envelope::control(Operation::Send, Originator::AppClient, OpCode::Message);
        env.msg_key = Some("k1".into());
        env.payload = Some(b"inline".to_vec());

        match env.carrier(true) {
            PayloadObj::Offloaded { key, payload } => {
                assert_eq!(key, "k1");
                assert!(payload.is_none());
            },
            PayloadObj::Inline(_) => panic!("expected offloaded carrier"),
        }
        match env.carrier(false) {
            PayloadObj::Inline(bytes) => assert_eq!(bytes, b"inline"),
            PayloadObj::Offloaded { .. } => panic!("expected inline carrier"),
        }
    }

    #[test]
    fn rewrite_op_preserves_originator_and_code() {
        let mut env = Envelope::control(Operation::Send, Originator::AppClient, OpCode::Message);
        env.rewrite_op(Operation::Forward);

        assert_eq!(env.op(), Some(Operation::Forward));
        assert_eq!(env.originator(), Some(Originator::AppClient));
        assert_eq!(env.code(), Some(OpCode::Message));
    }

    #[test]
    fn unknown_discriminant_decodes_to_none() {
        let env = Envelope {
            manifest: Some(Manifest {
                op: 99,
                og: 0,
                code: 0,
            }),
            ..Envelope::default()
        };
        assert_eq!(env.op(), None);
        assert_eq!(env.originator(), Some(Originator::AppClient));
    }

    #[test]
    fn init_response_carries_config() {
        let mut env = Envelope::control(Operation::Init, Originator::Daemon, OpCode::Success);
        env.config = Some(ConfigParams {
            sys_mode: SystemMode::Push as i32,
            sim_mode: SimulatorMode::PerNode as i32,
            use_db: true,
            db_address: "127.0.0.1".into(),
            db_port: 6379,
            db_num: 0,
        });

        let decoded = Envelope::decode_frame(&env.encode_frame()).unwrap();
        let cfg = decoded.config.as_ref().unwrap();
        assert_eq!(SystemMode::try_from(cfg.sys_mode), Ok(SystemMode::Push));
        assert_eq!(
            SimulatorMode::try_from(cfg.sim_mode),
            Ok(SimulatorMode::PerNode)
        );
        assert!(cfg.use_db);
        assert_eq!(cfg.db_port, 6379);
    }
}
