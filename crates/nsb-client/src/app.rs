//! Application client interface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use nsb_core::{
    Envelope, MessageEntry, OpCode, Operation, Originator, PayloadObj, PayloadStore, SystemMode,
};
use tracing::{info, warn};

use crate::DAEMON_RESPONSE_TIMEOUT;
use crate::channels::Channel;
use crate::error::ClientError;
use crate::session::{ClientCore, SessionConfig};

/// Operations an app may consume on its RECV channel.
const APP_DELIVERY_OPS: [Operation; 2] = [Operation::Receive, Operation::Forward];

/// High-level NSB interface for application code: send payloads towards a
/// destination and receive payloads delivered here, with the broker's
/// simulated network in between.
pub struct AppClient {
    core: ClientCore,
}

impl AppClient {
    /// Connects the three channels to the daemon and performs the INIT
    /// handshake as an application client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InitRejected`] if the daemon refuses the
    /// registration, and connection or handshake failures otherwise. A
    /// process embedding this client typically treats those as fatal.
    pub async fn connect(identifier: &str, server: SocketAddr) -> Result<Self, ClientError> {
        let core = ClientCore::connect(identifier, Originator::AppClient, server, None).await?;
        Ok(Self { core })
    }

    /// Like [`AppClient::connect`], with an explicit offload store instead
    /// of the Redis instance named by the daemon's configuration.
    pub async fn connect_with_store(
        identifier: &str,
        server: SocketAddr,
        store: Arc<dyn PayloadStore>,
    ) -> Result<Self, ClientError> {
        let core =
            ClientCore::connect(identifier, Originator::AppClient, server, Some(store)).await?;
        Ok(Self { core })
    }

    /// This client's identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.core.id
    }

    /// The configuration adopted from the daemon.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    /// Pings the daemon on CTRL. Returns `false` for an unhealthy daemon
    /// and for a response timeout alike.
    ///
    /// # Errors
    ///
    /// Returns transport failures only.
    pub async fn ping(&mut self) -> Result<bool, ClientError> {
        self.core.ping(DAEMON_RESPONSE_TIMEOUT).await
    }

    /// Instructs the daemon to shut down. No response is awaited.
    ///
    /// # Errors
    ///
    /// Returns transport failures only.
    pub async fn exit(&mut self) -> Result<(), ClientError> {
        self.core.exit().await
    }

    /// Sends a payload to `dest_id` via the broker.
    ///
    /// With the offload store enabled the payload is put into the store
    /// first and only its key travels on the wire; the key is returned.
    /// Inline mode returns `None`. No response is expected from the daemon.
    ///
    /// # Errors
    ///
    /// A store `put` failure drops the send and is returned to the caller.
    pub async fn send(
        &mut self,
        dest_id: &str,
        payload: &[u8],
    ) -> Result<Option<String>, ClientError> {
        let mut envelope =
            Envelope::control(Operation::Send, self.core.originator, OpCode::Message)
                .with_metadata(
                    Some(self.core.id.clone()),
                    Some(dest_id.to_owned()),
                    payload.len() as u64,
                );

        let key = if self.core.config.use_store {
            let key = match self.core.store()?.put(payload).await {
                Ok(key) => key,
                Err(err) => {
                    warn!(identifier = %self.core.id, error = %err, "store put failed, dropping send");
                    return Err(err.into());
                },
            };
            envelope.msg_key = Some(key.clone());
            Some(key)
        } else {
            envelope.payload = Some(payload.to_vec());
            None
        };

        self.core
            .channels
            .send_envelope(Channel::Send, &envelope)
            .await?;
        info!(identifier = %self.core.id, dest = %dest_id, size = payload.len(), "sent payload to broker");
        Ok(key)
    }

    /// Receives a payload delivered to `dest_id` (defaulting to this
    /// client's own identifier).
    ///
    /// In PULL mode a RECEIVE request is issued on the RECV channel and the
    /// daemon's answer is awaited; in PUSH mode the call waits passively for
    /// a FORWARD frame. `timeout` of `None` blocks indefinitely,
    /// `Some(Duration::ZERO)` polls. Returns `None` on NO_MESSAGE or
    /// timeout.
    ///
    /// With the offload store enabled, delivery is final here: the payload
    /// is checked out of the store (get-and-delete) and inlined into the
    /// returned entry. A store miss is logged and reported as `None`.
    ///
    /// # Errors
    ///
    /// Returns transport and decode failures.
    pub async fn receive(
        &mut self,
        dest_id: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Option<MessageEntry>, ClientError> {
        if self.core.config.system_mode == SystemMode::Pull {
            let request =
                Envelope::control(Operation::Receive, self.core.originator, OpCode::Success)
                    .with_metadata(
                        None,
                        Some(dest_id.unwrap_or(self.core.id.as_str()).to_owned()),
                        0,
                    );
            self.core
                .channels
                .send_envelope(Channel::Recv, &request)
                .await?;
        }

        let Some(response) = self
            .core
            .channels
            .recv_envelope(Channel::Recv, timeout)
            .await?
        else {
            return Ok(None);
        };
        let Some(mut entry) =
            self.core
                .parse_delivery(&response, &APP_DELIVERY_OPS, "RECEIVE or FORWARD")?
        else {
            info!(identifier = %self.core.id, "no message for us");
            return Ok(None);
        };

        if let Some(key) = entry.payload_obj.key().map(ToOwned::to_owned) {
            match self.core.store()?.take(&key).await {
                Ok(bytes) => entry.payload_obj = PayloadObj::Inline(bytes),
                Err(err) => {
                    warn!(identifier = %self.core.id, key = %key, error = %err, "store take failed");
                    return Ok(None);
                },
            }
        }
        info!(
            identifier = %self.core.id,
            src = %entry.source,
            dest = %entry.destination,
            size = entry.payload_size,
            "received payload"
        );
        Ok(Some(entry))
    }

    /// Blocks indefinitely for the next delivery. The listener form of
    /// [`AppClient::receive`], intended for a dedicated listening task.
    ///
    /// # Errors
    ///
    /// See [`AppClient::receive`].
    pub async fn listen_receive(&mut self) -> Result<Option<MessageEntry>, ClientError> {
        self.receive(None, None).await
    }
}
