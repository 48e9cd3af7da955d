//! Protocol-level error types shared by the daemon and client runtimes.

use thiserror::Error;

/// Maximum frame size accepted on any channel (16 MiB).
///
/// The length prefix is validated against this bound before any allocation
/// occurs, so a corrupt or hostile peer cannot make the receiver reserve
/// arbitrary memory.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Errors arising from framing or decoding wire traffic.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A frame exceeded the maximum allowed size.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size declared by the length prefix or of the outgoing payload.
        size: usize,
        /// Maximum size the codec accepts.
        max: usize,
    },

    /// The frame body could not be parsed as an NSB message.
    #[error("malformed message: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Underlying transport failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for protocol results.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
