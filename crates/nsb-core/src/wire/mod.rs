//! Wire protocol: framing and the NSB message schema.
//!
//! Every channel carries length-prefixed frames:
//!
//! ```text
//! +----------------------------+------------------+
//! | Length (4 bytes, BE)       | Payload          |
//! +----------------------------+------------------+
//! ```
//!
//! The payload of each frame is exactly one protobuf-encoded [`Envelope`].
//! There is no tag byte: the manifest operation inside the envelope is the
//! discriminator, and the originator field plus the arrival channel identify
//! the sender's role.

mod framing;
mod message;

pub use framing::FrameCodec;
pub use message::{
    ConfigParams, Envelope, IntroDetails, Manifest, Metadata, OpCode, Operation, Originator,
    SimulatorMode, SystemMode,
};
