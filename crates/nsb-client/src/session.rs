//! Shared client core: INIT handshake, PING, EXIT, and the session
//! configuration adopted from the daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use nsb_core::{
    ConfigParams, Envelope, MessageEntry, OpCode, Operation, Originator, PayloadStore, RedisStore,
    SimulatorMode, SystemMode,
};
use tracing::{info, warn};

use crate::DAEMON_RESPONSE_TIMEOUT;
use crate::channels::{Channel, ChannelSet};
use crate::error::ClientError;

/// System configuration adopted verbatim from the daemon's INIT response.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// PULL or PUSH delivery.
    pub system_mode: SystemMode,
    /// SYSTEM_WIDE or PER_NODE simulator routing.
    pub simulator_mode: SimulatorMode,
    /// Whether payloads ride through the offload store.
    pub use_store: bool,
    /// Offload store address.
    pub store_address: String,
    /// Offload store port.
    pub store_port: u16,
    /// Offload store database number.
    pub store_number: u32,
}

impl SessionConfig {
    fn from_params(params: &ConfigParams) -> Result<Self, ClientError> {
        let system_mode =
            SystemMode::try_from(params.sys_mode).map_err(|_| ClientError::InitInvalid {
                reason: "unknown system mode",
            })?;
        let simulator_mode =
            SimulatorMode::try_from(params.sim_mode).map_err(|_| ClientError::InitInvalid {
                reason: "unknown simulator mode",
            })?;
        Ok(Self {
            system_mode,
            simulator_mode,
            use_store: params.use_db,
            store_address: params.db_address.clone(),
            store_port: u16::try_from(params.db_port).map_err(|_| ClientError::InitInvalid {
                reason: "store port out of range",
            })?,
            store_number: params.db_num,
        })
    }
}

/// The state shared by both client kinds: the channels, the adopted
/// configuration, and the optional offload store handle. The originator is
/// fixed at construction and stamped on every outgoing frame.
pub(crate) struct ClientCore {
    pub(crate) id: String,
    pub(crate) originator: Originator,
    pub(crate) channels: ChannelSet,
    pub(crate) config: SessionConfig,
    store: Option<Arc<dyn PayloadStore>>,
}

impl ClientCore {
    /// Connects the three channels and performs the INIT handshake.
    ///
    /// When the daemon's configuration enables the offload store and no
    /// store override is supplied, a Redis connection is opened with the
    /// address the daemon handed back.
    pub(crate) async fn connect(
        id: &str,
        originator: Originator,
        server: SocketAddr,
        store_override: Option<Arc<dyn PayloadStore>>,
    ) -> Result<Self, ClientError> {
        info!(identifier = %id, %server, ?originator, "connecting to daemon");
        let mut channels = ChannelSet::connect(server).await?;

        let mut init = Envelope::control(Operation::Init, originator, OpCode::Success);
        init.intro = Some(channels.local_intro(id)?);

        let response = channels
            .request_ctrl(&init, DAEMON_RESPONSE_TIMEOUT)
            .await?
            .ok_or(ClientError::InitTimeout)?;
        if response.op() != Some(Operation::Init) {
            return Err(ClientError::UnexpectedFrame {
                expected: "INIT response",
            });
        }
        if response.code() != Some(OpCode::Success) {
            return Err(ClientError::InitRejected);
        }
        let params = response.config.as_ref().ok_or(ClientError::InitInvalid {
            reason: "missing configuration block",
        })?;
        let config = SessionConfig::from_params(params)?;
        info!(
            identifier = %id,
            mode = ?config.system_mode,
            sim_mode = ?config.simulator_mode,
            use_store = config.use_store,
            "initialized"
        );

        let store = match store_override {
            Some(store) => Some(store),
            None if config.use_store => {
                let store = RedisStore::connect(
                    id,
                    &config.store_address,
                    config.store_port,
                    config.store_number,
                )
                .await?;
                Some(Arc::new(store) as Arc<dyn PayloadStore>)
            },
            None => None,
        };

        Ok(Self {
            id: id.to_owned(),
            originator,
            channels,
            config,
            store,
        })
    }

    /// The attached offload store.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::StoreNotConfigured`] when the session uses the
    /// store but none is attached.
    pub(crate) fn store(&self) -> Result<&Arc<dyn PayloadStore>, ClientError> {
        self.store.as_ref().ok_or(ClientError::StoreNotConfigured)
    }

    /// Pings the daemon on CTRL. Returns whether it answered healthy; a
    /// timeout or an unexpected response counts as unhealthy.
    pub(crate) async fn ping(&mut self, timeout: Duration) -> Result<bool, ClientError> {
        let ping = Envelope::control(Operation::Ping, self.originator, OpCode::Success);
        let Some(response) = self.channels.request_ctrl(&ping, timeout).await? else {
            warn!(identifier = %self.id, "ping timed out");
            return Ok(false);
        };
        if response.op() != Some(Operation::Ping) {
            warn!(identifier = %self.id, "unexpected response to ping");
            return Ok(false);
        }
        match response.code() {
            Some(OpCode::Success) => Ok(true),
            Some(OpCode::Failure) => {
                warn!(identifier = %self.id, "daemon reachable but reports failure");
                Ok(false)
            },
            _ => {
                warn!(identifier = %self.id, "unexpected code in ping response");
                Ok(false)
            },
        }
    }

    /// Sends EXIT on CTRL. No response is awaited.
    pub(crate) async fn exit(&mut self) -> Result<(), ClientError> {
        let exit = Envelope::control(Operation::Exit, self.originator, OpCode::Success);
        self.channels.send_envelope(Channel::Ctrl, &exit).await?;
        info!(identifier = %self.id, "sent EXIT to daemon");
        Ok(())
    }

    /// Interprets a FETCH/RECEIVE response or FORWARD frame as a delivery.
    ///
    /// `accepted` lists the operations this call may consume. A MESSAGE code
    /// yields an entry carrying the raw payload carrier; NO_MESSAGE yields
    /// `None`.
    pub(crate) fn parse_delivery(
        &self,
        envelope: &Envelope,
        accepted: &[Operation],
        expected: &'static str,
    ) -> Result<Option<MessageEntry>, ClientError> {
        let op = envelope
            .op()
            .ok_or(ClientError::UnexpectedFrame { expected })?;
        if !accepted.contains(&op) {
            return Err(ClientError::UnexpectedFrame { expected });
        }
        match envelope.code() {
            Some(OpCode::Message) => {
                let metadata = envelope
                    .metadata
                    .as_ref()
                    .ok_or(ClientError::UnexpectedFrame { expected })?;
                Ok(Some(MessageEntry::new(
                    metadata.src_id.clone().unwrap_or_default(),
                    metadata.dest_id.clone().unwrap_or_default(),
                    envelope.carrier(self.config.use_store),
                    metadata.payload_size,
                )))
            },
            Some(OpCode::NoMessage) => Ok(None),
            _ => Err(ClientError::UnexpectedFrame { expected }),
        }
    }
}
