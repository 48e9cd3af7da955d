//! Per-operation frame handlers.
//!
//! The [`Broker`] owns every piece of mutable daemon state: the client
//! registry, the two buffers, and the write half of every channel. It is
//! driven exclusively by the dispatcher task in [`crate::server`], so no
//! handler ever races another.
//!
//! Each incoming frame is decoded and routed by its manifest operation. At
//! most one response frame is written back on the arrival connection; in
//! PUSH mode, SEND and POST are instead rewritten to FORWARD and written on
//! the target client's RECV channel. Awaiting that forward write is the only
//! point where a handler can block on a peer.

use std::collections::HashMap;

use bytes::Bytes;
use futures::SinkExt;
use futures::stream::SplitSink;
use nsb_core::{
    Envelope, FrameCodec, MessageEntry, OpCode, Operation, Originator, SimulatorMode, SystemMode,
};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::buffers::MessageBuffer;
use crate::config::BrokerConfig;
use crate::registry::{ClientRegistry, ConnId};

/// Write half of one channel connection.
pub type ConnSink = SplitSink<Framed<TcpStream, FrameCodec>, Bytes>;

/// The broker: all daemon state plus the frame handlers.
pub struct Broker {
    config: BrokerConfig,
    registry: ClientRegistry,
    tx_buffer: MessageBuffer,
    rx_buffer: MessageBuffer,
    sinks: HashMap<ConnId, ConnSink>,
    running: bool,
}

impl Broker {
    /// Creates a broker with empty state.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            registry: ClientRegistry::new(),
            tx_buffer: MessageBuffer::new(),
            rx_buffer: MessageBuffer::new(),
            sinks: HashMap::new(),
            running: true,
        }
    }

    /// Whether the daemon should keep servicing its loop.
    #[must_use]
    pub fn running(&self) -> bool {
        self.running
    }

    /// Records a freshly accepted channel connection.
    pub fn add_connection(&mut self, conn: ConnId, peer: std::net::SocketAddr, sink: ConnSink) {
        info!(%conn, %peer, "channel connected");
        self.registry.register_channel(peer, conn);
        self.sinks.insert(conn, sink);
    }

    /// Handles a closed connection: the connection is dropped from all
    /// tables, but the buffers are preserved.
    pub fn remove_connection(&mut self, conn: ConnId) {
        self.sinks.remove(&conn);
        let removed = self.registry.remove_conn(conn);
        if removed.is_empty() {
            debug!(%conn, "channel disconnected");
        } else {
            warn!(%conn, clients = ?removed, "channel disconnected, dropped client registration");
        }
    }

    /// Decodes one frame and routes it to the operation handler.
    pub async fn handle_frame(&mut self, conn: ConnId, frame: Bytes) {
        let envelope = match Envelope::decode_frame(&frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%conn, error = %err, "dropping malformed frame");
                return;
            },
        };

        let Some(op) = envelope.op() else {
            // Missing manifest or unknown discriminant: answer with a
            // negative ping so the peer knows we did not understand.
            warn!(%conn, manifest = ?envelope.manifest, "unknown operation");
            self.send_to(
                conn,
                Envelope::control(Operation::Ping, Originator::Daemon, OpCode::Failure),
            )
            .await;
            return;
        };
        debug!(%conn, ?op, og = ?envelope.originator(), "frame received");

        match op {
            Operation::Init => self.handle_init(conn, &envelope).await,
            Operation::Ping => self.handle_ping(conn).await,
            Operation::Send => self.handle_send(conn, envelope).await,
            Operation::Fetch => self.handle_fetch(conn, &envelope).await,
            Operation::Post => self.handle_post(conn, envelope).await,
            Operation::Receive => self.handle_receive(conn, &envelope).await,
            Operation::Exit => self.handle_exit(conn),
            Operation::Forward => {
                // FORWARD is daemon-originated only.
                warn!(%conn, "dropping FORWARD frame from a client");
            },
        }
    }

    /// INIT: fold the three channels named by the intro into one client
    /// registration and reply with the system configuration.
    async fn handle_init(&mut self, conn: ConnId, envelope: &Envelope) {
        let registered = self.try_register(envelope);

        let mut reply = Envelope::control(
            Operation::Init,
            Originator::Daemon,
            if registered {
                OpCode::Success
            } else {
                OpCode::Failure
            },
        );
        if registered {
            reply.config = Some(self.config_params());
        }
        self.send_to(conn, reply).await;
    }

    fn try_register(&mut self, envelope: &Envelope) -> bool {
        let Some(intro) = envelope.intro.as_ref() else {
            warn!("INIT carried no intro details");
            return false;
        };
        let details = match self.registry.resolve_intro(intro) {
            Ok(details) => details,
            Err(err) => {
                warn!(identifier = %intro.identifier, error = %err, "INIT failed to resolve channels");
                return false;
            },
        };

        match envelope.originator() {
            Some(Originator::AppClient) => {
                info!(
                    identifier = %details.identifier,
                    ctrl = %details.ch_ctrl,
                    send = %details.ch_send,
                    recv = %details.ch_recv,
                    "registered app client"
                );
                self.registry.register_app(details);
                true
            },
            Some(Originator::SimClient) => {
                let identifier = details.identifier.clone();
                match self
                    .registry
                    .register_sim(details, self.config.simulator_mode)
                {
                    Ok(()) => {
                        info!(identifier = %identifier, mode = ?self.config.simulator_mode, "registered sim client");
                        true
                    },
                    Err(err) => {
                        warn!(identifier = %identifier, error = %err, "sim registration rejected");
                        false
                    },
                }
            },
            _ => {
                warn!(identifier = %intro.identifier, "INIT from unknown originator");
                false
            },
        }
    }

    fn config_params(&self) -> nsb_core::ConfigParams {
        nsb_core::ConfigParams {
            sys_mode: self.config.system_mode as i32,
            sim_mode: self.config.simulator_mode as i32,
            use_db: self.config.use_store,
            db_address: self.config.store_address.clone(),
            db_port: u32::from(self.config.store_port),
            db_num: self.config.store_number,
        }
    }

    /// PING: always healthy.
    async fn handle_ping(&mut self, conn: ConnId) {
        self.send_to(
            conn,
            Envelope::control(Operation::Ping, Originator::Daemon, OpCode::Success),
        )
        .await;
    }

    /// SEND: buffer the payload (PULL) or forward it to the responsible
    /// simulator's RECV channel (PUSH). Never answered.
    async fn handle_send(&mut self, conn: ConnId, mut envelope: Envelope) {
        if envelope.originator() != Some(Originator::AppClient) {
            warn!(%conn, "dropping SEND from non-app originator");
            return;
        }
        let Some(entry) = self.entry_from(&envelope) else {
            warn!(%conn, "dropping SEND without source and destination");
            return;
        };

        match self.config.system_mode {
            SystemMode::Pull => {
                debug!(
                    src = %entry.source,
                    dest = %entry.destination,
                    size = entry.payload_size,
                    "TX entry created"
                );
                self.tx_buffer.push(entry);
            },
            SystemMode::Push => {
                let target = self
                    .registry
                    .sim_for_push(self.config.simulator_mode, &entry.source)
                    .map(|sim| (sim.identifier.clone(), sim.ch_recv));
                let Some((sim_id, recv)) = target else {
                    warn!(src = %entry.source, "no simulator registered to forward SEND, dropping");
                    return;
                };
                envelope.rewrite_op(Operation::Forward);
                debug!(src = %entry.source, sim = %sim_id, "forwarding SEND to simulator");
                self.send_to(recv, envelope).await;
            },
        }
    }

    /// FETCH: hand the simulator a buffered payload, or NO_MESSAGE.
    async fn handle_fetch(&mut self, conn: ConnId, envelope: &Envelope) {
        if envelope.originator() != Some(Originator::SimClient) {
            warn!(%conn, "dropping FETCH from non-sim originator");
            return;
        }
        if self.config.system_mode == SystemMode::Push {
            // Simulators receive FORWARD frames in PUSH mode; a stray FETCH
            // gets no reply.
            debug!(%conn, "ignoring FETCH in PUSH mode");
            return;
        }

        let mut src_filter = envelope
            .metadata
            .as_ref()
            .and_then(|m| m.src_id.clone())
            .filter(|s| !s.is_empty());

        // A per-node simulator only ever sees its own node's outbound
        // traffic, so a filtered fetch is pinned to the caller's identifier.
        if self.config.simulator_mode == SimulatorMode::PerNode && src_filter.is_some() {
            if let Some(sim) = self.registry.sim_by_recv(conn) {
                if src_filter.as_deref() != Some(sim.identifier.as_str()) {
                    warn!(
                        requested = ?src_filter,
                        sim = %sim.identifier,
                        "per-node FETCH source overridden with caller identifier"
                    );
                    src_filter = Some(sim.identifier.clone());
                }
            }
        }

        let fetched = match src_filter.as_deref() {
            Some(src) => self.tx_buffer.take_by_source(src),
            None => self.tx_buffer.pop_front(),
        };
        let reply = Self::delivery_reply(Operation::Fetch, fetched.as_ref());
        if let Some(entry) = &fetched {
            debug!(
                src = %entry.source,
                dest = %entry.destination,
                size = entry.payload_size,
                "TX entry retrieved"
            );
        }
        self.send_to(conn, reply).await;
    }

    /// POST: buffer the delivered payload (PULL) or forward it to the
    /// destination app's RECV channel (PUSH). A NO_MESSAGE post records a
    /// simulated drop and changes no state.
    async fn handle_post(&mut self, conn: ConnId, mut envelope: Envelope) {
        if envelope.originator() != Some(Originator::SimClient) {
            warn!(%conn, "dropping POST from non-sim originator");
            return;
        }
        if envelope.code() == Some(OpCode::NoMessage) {
            debug!(%conn, "simulated network dropped a payload");
            return;
        }
        let Some(entry) = self.entry_from(&envelope) else {
            warn!(%conn, "dropping POST without source and destination");
            return;
        };

        match self.config.system_mode {
            SystemMode::Pull => {
                debug!(
                    src = %entry.source,
                    dest = %entry.destination,
                    size = entry.payload_size,
                    "RX entry created"
                );
                self.rx_buffer.push(entry);
            },
            SystemMode::Push => {
                let target = self
                    .registry
                    .app(&entry.destination)
                    .map(|app| app.ch_recv);
                let Some(recv) = target else {
                    warn!(dest = %entry.destination, "no app client registered to forward POST, dropping");
                    return;
                };
                envelope.rewrite_op(Operation::Forward);
                debug!(dest = %entry.destination, "forwarding POST to app");
                self.send_to(recv, envelope).await;
            },
        }
    }

    /// RECEIVE: hand the application a delivered payload, or NO_MESSAGE.
    async fn handle_receive(&mut self, conn: ConnId, envelope: &Envelope) {
        if envelope.originator() != Some(Originator::AppClient) {
            warn!(%conn, "dropping RECEIVE from non-app originator");
            return;
        }

        // Destination defaults to the caller's own identifier.
        let dest = envelope
            .metadata
            .as_ref()
            .and_then(|m| m.dest_id.clone())
            .filter(|d| !d.is_empty())
            .or_else(|| {
                self.registry
                    .app_by_recv(conn)
                    .map(|app| app.identifier.clone())
            });

        let received = match dest.as_deref() {
            Some(dest) => self.rx_buffer.take_by_destination(dest),
            None => {
                warn!(%conn, "RECEIVE from unregistered client without destination");
                None
            },
        };
        let reply = Self::delivery_reply(Operation::Receive, received.as_ref());
        if let Some(entry) = &received {
            debug!(
                src = %entry.source,
                dest = %entry.destination,
                size = entry.payload_size,
                "RX entry retrieved"
            );
        }
        self.send_to(conn, reply).await;
    }

    /// EXIT: stop the daemon loop. The server tears down every channel on
    /// the way out.
    fn handle_exit(&mut self, conn: ConnId) {
        info!(%conn, "EXIT received, stopping daemon");
        self.running = false;
    }

    /// Builds a MESSAGE or NO_MESSAGE reply for FETCH/RECEIVE.
    fn delivery_reply(op: Operation, entry: Option<&MessageEntry>) -> Envelope {
        match entry {
            Some(entry) => {
                let mut reply = Envelope::control(op, Originator::Daemon, OpCode::Message)
                    .with_metadata(
                        Some(entry.source.clone()),
                        Some(entry.destination.clone()),
                        entry.payload_size,
                    );
                reply.set_carrier(&entry.payload_obj);
                reply
            },
            None => Envelope::control(op, Originator::Daemon, OpCode::NoMessage),
        }
    }

    /// Builds a buffer entry from a SEND/POST envelope, or `None` when the
    /// source or destination is missing.
    fn entry_from(&self, envelope: &Envelope) -> Option<MessageEntry> {
        let metadata = envelope.metadata.as_ref()?;
        let source = metadata.src_id.clone().filter(|s| !s.is_empty())?;
        let destination = metadata.dest_id.clone().filter(|d| !d.is_empty())?;
        Some(MessageEntry::new(
            source,
            destination,
            envelope.carrier(self.config.use_store),
            metadata.payload_size,
        ))
    }

    /// Writes one envelope on a connection.
    ///
    /// The await here is the FORWARD write-readiness wait: if the target
    /// peer stops draining its RECV channel, the dispatcher stalls with it.
    async fn send_to(&mut self, conn: ConnId, envelope: Envelope) {
        let Some(sink) = self.sinks.get_mut(&conn) else {
            warn!(%conn, "no open connection to write response");
            return;
        };
        if let Err(err) = sink.send(envelope.encode_frame()).await {
            warn!(%conn, error = %err, "failed to write frame");
        }
    }

    /// Closes every channel. Called once the loop has stopped.
    pub async fn teardown(&mut self) {
        for (conn, mut sink) in self.sinks.drain() {
            debug!(%conn, "closing connection");
            let _ = sink.close().await;
        }
    }
}
