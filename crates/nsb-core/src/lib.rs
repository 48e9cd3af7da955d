//! # nsb-core
//!
//! Core library for the Network Simulation Broker (NSB): the pieces shared
//! between the broker daemon and the client protocol runtime.
//!
//! NSB decouples application endpoints from the network simulator that
//! transports their traffic. Application clients hand outbound payloads to the
//! broker; simulator clients fetch them, carry them through a discrete-event
//! simulation, and post the delivered payloads back; application clients then
//! receive them at the destination.
//!
//! This crate provides:
//!
//! - **Wire schema**: the protobuf [`Envelope`](wire::Envelope) exchanged on
//!   every channel, with its manifest, metadata, intro, and config blocks.
//! - **Framing**: the length-prefixed [`FrameCodec`](wire::FrameCodec) used on
//!   all TCP channels.
//! - **Buffer entries**: [`MessageEntry`](entry::MessageEntry), the broker's
//!   record of one payload in flight.
//! - **Offload store**: the [`PayloadStore`](store::PayloadStore) contract
//!   with Redis-backed and in-memory implementations, and the payload key
//!   generator.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod error;
pub mod keygen;
pub mod store;
pub mod wire;

pub use entry::{MessageEntry, PayloadObj};
pub use error::ProtocolError;
pub use keygen::PayloadKeyGenerator;
pub use store::{MemoryStore, PayloadStore, RedisStore, StoreError};
pub use wire::{
    ConfigParams, Envelope, FrameCodec, IntroDetails, Manifest, Metadata, OpCode, Operation,
    Originator, SimulatorMode, SystemMode,
};
