//! TCP accept loop and dispatcher task.
//!
//! The server owns the listening socket and the single dispatcher task. Each
//! accepted channel is split: the write half goes to the [`Broker`], the
//! read half is pumped by a small task that decodes frames and feeds them
//! into the dispatcher's event channel. Accepts are drained before events so
//! that an INIT frame never outruns the registration of the channels it
//! names.

use std::net::SocketAddr;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::SplitStream;
use nsb_core::FrameCodec;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{info, warn};

use crate::config::BrokerConfig;
use crate::dispatch::Broker;
use crate::registry::ConnId;
use crate::DaemonError;

/// Depth of the dispatcher's event channel.
const EVENT_CHANNEL_DEPTH: usize = 256;

/// One unit of work for the dispatcher.
enum Event {
    /// A complete frame arrived on a channel.
    Frame {
        /// Arrival connection.
        conn: ConnId,
        /// Undecoded frame body.
        frame: Bytes,
    },
    /// A channel hit end-of-stream or a read error.
    Closed {
        /// The closed connection.
        conn: ConnId,
    },
}

/// The broker daemon's socket server.
pub struct BrokerServer {
    listener: TcpListener,
    broker: Broker,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    next_conn: u64,
}

impl BrokerServer {
    /// Binds the listening socket and prepares the broker.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Bind`] if the address cannot be bound.
    pub async fn bind(config: BrokerConfig) -> Result<Self, DaemonError> {
        let addr = SocketAddr::new(config.bind_address, config.server_port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| DaemonError::Bind { addr, source })?;
        info!(addr = %listener.local_addr()?, mode = ?config.system_mode, sim_mode = ?config.simulator_mode, use_store = config.use_store, "server started");

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        Ok(Self {
            listener,
            broker: Broker::new(config),
            events_tx,
            events_rx,
            next_conn: 0,
        })
    }

    /// The address the daemon is listening on. Useful when bound to port 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr, DaemonError> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the daemon until an EXIT frame stops it.
    ///
    /// # Errors
    ///
    /// Returns an error only on a fatal accept-loop failure; per-connection
    /// errors are logged and the offending connection is dropped.
    pub async fn run(mut self) -> Result<(), DaemonError> {
        while self.broker.running() {
            tokio::select! {
                // Biased so pending accepts are drained before any frame is
                // dispatched: a client connects its channels strictly before
                // sending INIT, and handling them in that order keeps the
                // endpoint table ahead of the intro resolution.
                biased;

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.accept(stream, peer),
                        Err(err) => warn!(error = %err, "accept failed"),
                    }
                }

                event = self.events_rx.recv() => {
                    match event {
                        Some(Event::Frame { conn, frame }) => {
                            self.broker.handle_frame(conn, frame).await;
                        }
                        Some(Event::Closed { conn }) => {
                            self.broker.remove_connection(conn);
                        }
                        // Unreachable while we hold events_tx.
                        None => break,
                    }
                }
            }
        }

        info!("server no longer running, closing connections");
        self.broker.teardown().await;
        info!("server stopped");
        Ok(())
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Err(err) = stream.set_nodelay(true) {
            warn!(%peer, error = %err, "failed to set TCP_NODELAY");
        }

        self.next_conn += 1;
        let conn = ConnId(self.next_conn);
        let (sink, frames) = Framed::new(stream, FrameCodec::new()).split();
        self.broker.add_connection(conn, peer, sink);
        tokio::spawn(pump(conn, frames, self.events_tx.clone()));
    }
}

/// Reads frames off one channel and feeds them to the dispatcher, reporting
/// the close when the stream ends.
async fn pump(
    conn: ConnId,
    mut frames: SplitStream<Framed<TcpStream, FrameCodec>>,
    events: mpsc::Sender<Event>,
) {
    while let Some(result) = frames.next().await {
        match result {
            Ok(frame) => {
                if events.send(Event::Frame { conn, frame }).await.is_err() {
                    // Dispatcher is gone; nothing left to do.
                    return;
                }
            },
            Err(err) => {
                warn!(%conn, error = %err, "channel read failed");
                break;
            },
        }
    }
    let _ = events.send(Event::Closed { conn }).await;
}
