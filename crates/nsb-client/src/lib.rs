//! # nsb-client
//!
//! Client protocol runtime for the Network Simulation Broker.
//!
//! Two interfaces are built on one shared core:
//!
//! - [`AppClient`] gives application code a network-like interface: `send` a
//!   payload towards a destination, `receive` payloads delivered to it.
//! - [`SimClient`] gives a network simulator the other side: `fetch` payloads
//!   awaiting transport, `post` the delivery (or the drop) when the simulated
//!   network is done with them.
//!
//! Both open three TCP channels to the daemon (CTRL, SEND, RECV), perform the
//! INIT handshake, and adopt the configuration the daemon hands back: PULL vs
//! PUSH delivery, and whether payloads ride inline or through the offload
//! store. A pending blocking `receive` on RECV never blocks a CTRL ping or a
//! SEND, which is the reason for the three channels.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use nsb_client::{AppClient, SimClient};
//!
//! # async fn demo() -> Result<(), nsb_client::ClientError> {
//! let server = "127.0.0.1:65432".parse().unwrap();
//! let mut app = AppClient::connect("node1", server).await?;
//! let mut sim = SimClient::connect("sim1", server).await?;
//!
//! app.send("node2", b"hi").await?;
//! if let Some(entry) = sim.fetch(None, Some(Duration::from_secs(1))).await? {
//!     // ... transport through the simulated network ...
//!     sim.post(&entry.source, &entry.destination, entry.payload_obj, entry.payload_size)
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod app;
mod channels;
mod error;
mod session;
mod sim;

pub use app::AppClient;
pub use channels::{Channel, ChannelSet};
pub use error::ClientError;
pub use session::SessionConfig;
pub use sim::SimClient;

use std::time::Duration;

/// Maximum time a client will spend connecting its channels to the daemon,
/// retrying within the window.
pub const SERVER_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum time a client waits for a daemon response on CTRL.
pub const DAEMON_RESPONSE_TIMEOUT: Duration = Duration::from_secs(600);
