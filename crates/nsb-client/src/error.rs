//! Client runtime error types.

use nsb_core::{ProtocolError, StoreError};
use thiserror::Error;

use crate::channels::Channel;

/// Errors from the client protocol runtime.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A channel could not be connected within the grace window.
    #[error("connection of {channel} channel timed out after {secs}s")]
    ConnectTimeout {
        /// The channel that failed to connect.
        channel: Channel,
        /// The grace window that elapsed.
        secs: u64,
    },

    /// The daemon closed a channel.
    #[error("daemon closed the {channel} channel")]
    Disconnected {
        /// The channel that hit end-of-stream.
        channel: Channel,
    },

    /// The daemon rejected the INIT handshake.
    #[error("daemon rejected INIT")]
    InitRejected,

    /// The INIT response was not usable.
    #[error("invalid INIT response: {reason}")]
    InitInvalid {
        /// What was wrong with the response.
        reason: &'static str,
    },

    /// The daemon did not answer INIT within the response timeout.
    #[error("no INIT response from daemon")]
    InitTimeout,

    /// A response frame carried an operation or code this call cannot use.
    #[error("unexpected frame: expected {expected}")]
    UnexpectedFrame {
        /// What the call was waiting for.
        expected: &'static str,
    },

    /// The session is configured for the offload store but none is attached.
    #[error("offload store required but not configured")]
    StoreNotConfigured,

    /// Offload store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Framing or decode failure on a channel.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Underlying socket failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
