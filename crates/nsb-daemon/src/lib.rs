//! nsb-daemon - Network Simulation Broker daemon library
//!
//! The daemon is the rendezvous point between application clients and
//! simulator clients. It accepts the three TCP channels each client opens,
//! folds them into per-client registrations at INIT, and routes every
//! subsequent frame through a single-task dispatcher: SENDs land in the
//! transmission buffer (or are forwarded straight to a simulator in PUSH
//! mode), FETCHes drain it, POSTs land in the reception buffer, RECEIVEs
//! drain that.
//!
//! All broker state lives on one task. Per-connection reader tasks only
//! decode frames off the wire and hand them to the dispatcher through a
//! channel, which gives a total order on operations without locking the
//! buffers.
//!
//! # Modules
//!
//! - [`config`]: YAML configuration for the broker
//! - [`registry`]: connection and client bookkeeping
//! - [`buffers`]: the transmission and reception FIFO buffers
//! - [`dispatch`]: the per-operation frame handlers
//! - [`server`]: TCP accept loop and dispatcher task

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffers;
pub mod config;
pub mod dispatch;
pub mod registry;
pub mod server;

use std::net::SocketAddr;

use thiserror::Error;

pub use config::{BrokerConfig, ConfigError};
pub use server::BrokerServer;

/// Top-level daemon errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The configuration file could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the daemon tried to bind.
        addr: SocketAddr,
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// Other I/O failure in the accept loop.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
