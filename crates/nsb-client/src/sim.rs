//! Simulator client interface.

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

/// Operations a sim may consume on its RECV channel.
const SIM_DELIVERY_OPS: [Operation; 2] = [Operation::Fetch, Operation::Forward];

/// High-level NSB interface for a network simulator: fetch payloads awaiting
/// transport and post their delivery (or their drop) once the simulated
/// network is done with them.
pub struct SimClient {
    core: ClientCore,
}

impl SimClient {
    /// Connects the three channels to the daemon and performs the INIT
    /// handshake as a simulator client.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InitRejected`] if the daemon refuses the
    /// registration — notably for a second simulator in SYSTEM_WIDE mode —
    /// and connection or handshake failures otherwise.
    pub async fn connect(identifier: &str, server: SocketAddr) -> Result<Self, ClientError> {
        let core = ClientCore::connect(identifier, Originator::SimClient, server, None).await?;
        Ok(Self { core })
    }

    /// Like [`SimClient::connect`], with an explicit offload store instead
    /// of the Redis instance named by the daemon's configuration.
    pub async fn connect_with_store(
        identifier: &str,
        server: SocketAddr,
        store: Arc<dyn PayloadStore>,
    ) -> Result<Self, ClientError> {
        let core =
            ClientCore::connect(identifier, Originator::SimClient, server, Some(store)).await?;
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

    /// Pings the daemon.
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

    /// Fetches a payload awaiting transport, bringing the payload bytes in.
    ///
    /// `src_id` of `Some` asks for the first payload from that source (the
    /// broker may skip over earlier entries from other sources); `None` pops
    /// the head of the queue. In PUSH mode no request is issued and the call
    /// waits for a FORWARD frame instead. Returns `None` on NO_MESSAGE or
    /// timeout.
    ///
    /// With the offload store enabled, the payload is still in flight
    /// through the simulator, so the store is only peeked: the returned
    /// entry keeps the store key for the eventual [`SimClient::post`] and
    /// carries the peeked bytes alongside it. A store miss is logged and
    /// reported as `None`.
    ///
    /// # Errors
    ///
    /// Returns transport and decode failures.
    pub async fn fetch(
        &mut self,
        src_id: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Option<MessageEntry>, ClientError> {
        self.fetch_inner(src_id, timeout, true).await
    }

    /// Fetches like [`SimClient::fetch`] without bringing offloaded payload
    /// bytes in. Simulators that transport only metadata (payload sizes)
    /// avoid a store round-trip this way.
    ///
    /// # Errors
    ///
    /// Returns transport and decode failures.
    pub async fn fetch_metadata(
        &mut self,
        src_id: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Option<MessageEntry>, ClientError> {
        self.fetch_inner(src_id, timeout, false).await
    }

    async fn fetch_inner(
        &mut self,
        src_id: Option<&str>,
        timeout: Option<Duration>,
        get_payload: bool,
    ) -> Result<Option<MessageEntry>, ClientError> {
        if self.core.config.system_mode == SystemMode::Pull {
            let mut request =
                Envelope::control(Operation::Fetch, self.core.originator, OpCode::Success);
            if let Some(src) = src_id {
                request = request.with_metadata(Some(src.to_owned()), None, 0);
            }
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
                .parse_delivery(&response, &SIM_DELIVERY_OPS, "FETCH or FORWARD")?
        else {
            info!(identifier = %self.core.id, "nothing to transport");
            return Ok(None);
        };

        if get_payload {
            if let PayloadObj::Offloaded { key, payload } = &mut entry.payload_obj {
                match self.core.store()?.peek(key).await {
                    Ok(bytes) => *payload = Some(bytes),
                    Err(err) => {
                        warn!(identifier = %self.core.id, key = %key, error = %err, "store peek failed");
                        return Ok(None);
                    },
                }
            }
        }
        info!(
            identifier = %self.core.id,
            src = %entry.source,
            dest = %entry.destination,
            size = entry.payload_size,
            "fetched payload for transport"
        );
        Ok(Some(entry))
    }

    /// Posts a successfully transported payload back to the broker for
    /// delivery to `dest_id`.
    ///
    /// The carrier is handed back as-is: an offloaded payload keeps riding
    /// under its store key (the final checkout happens at the destination's
    /// receive), an inline payload travels inline. No response is expected.
    ///
    /// # Errors
    ///
    /// Returns transport failures.
    pub async fn post(
        &mut self,
        src_id: &str,
        dest_id: &str,
        payload_obj: PayloadObj,
        payload_size: u64,
    ) -> Result<(), ClientError> {
        let mut envelope =
            Envelope::control(Operation::Post, self.core.originator, OpCode::Message)
                .with_metadata(
                    Some(src_id.to_owned()),
                    Some(dest_id.to_owned()),
                    payload_size,
                );
        envelope.set_carrier(&payload_obj);
        self.core
            .channels
            .send_envelope(Channel::Send, &envelope)
            .await?;
        info!(identifier = %self.core.id, src = %src_id, dest = %dest_id, "posted delivery to broker");
        Ok(())
    }

    /// Reports that the simulated network dropped a payload. The broker
    /// makes no state change for it.
    ///
    /// # Errors
    ///
    /// Returns transport failures.
    pub async fn post_dropped(&mut self, src_id: &str, dest_id: &str) -> Result<(), ClientError> {
        let envelope =
            Envelope::control(Operation::Post, self.core.originator, OpCode::NoMessage)
                .with_metadata(Some(src_id.to_owned()), Some(dest_id.to_owned()), 0);
        self.core
            .channels
            .send_envelope(Channel::Send, &envelope)
            .await?;
        info!(identifier = %self.core.id, src = %src_id, dest = %dest_id, "posted simulated drop");
        Ok(())
    }

    /// Blocks indefinitely for the next payload to transport. The listener
    /// form of [`SimClient::fetch`], intended for a dedicated listening
    /// task.
    ///
    /// # Errors
    ///
    /// See [`SimClient::fetch`].
    pub async fn listen_fetch(&mut self) -> Result<Option<MessageEntry>, ClientError> {
        self.fetch(None, None).await
    }
}
