//! Per-client channel transport.
//!
//! Each client owns three TCP connections to the daemon, opened in order
//! CTRL, SEND, RECV. Every connection is configured with `SO_REUSEADDR`,
//! `SO_KEEPALIVE`, and `TCP_NODELAY`, and carries length-prefixed protobuf
//! frames.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use nsb_core::{Envelope, FrameCodec, IntroDetails};
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::SERVER_CONNECTION_TIMEOUT;
use crate::error::ClientError;

/// Pause between connection attempts within the grace window.
const CONNECT_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// The three logical channels each client opens to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// INIT, PING, EXIT; bidirectional request/response.
    Ctrl,
    /// Client-to-daemon SEND (app) or POST (sim); in PUSH mode also carries
    /// the daemon's FORWARD of a POST back to the target app.
    Send,
    /// Client-to-daemon FETCH (sim) or RECEIVE (app); in PUSH mode also
    /// carries the daemon's FORWARD of a SEND to the target sim.
    Recv,
}

impl Channel {
    /// The channels in the order they are connected.
    pub const ALL: [Self; 3] = [Self::Ctrl, Self::Send, Self::Recv];
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ctrl => write!(f, "CTRL"),
            Self::Send => write!(f, "SEND"),
            Self::Recv => write!(f, "RECV"),
        }
    }
}

type FramedChannel = Framed<TcpStream, FrameCodec>;

/// The triple of framed connections behind one client.
pub struct ChannelSet {
    ctrl: FramedChannel,
    send: FramedChannel,
    recv: FramedChannel,
}

impl ChannelSet {
    /// Connects all three channels to the daemon, in order CTRL, SEND,
    /// RECV. Each channel retries within [`SERVER_CONNECTION_TIMEOUT`]
    /// before the whole connect fails.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectTimeout`] naming the channel that could
    /// not be connected within the grace window.
    pub async fn connect(server: SocketAddr) -> Result<Self, ClientError> {
        let mut connected = Vec::with_capacity(Channel::ALL.len());
        for channel in Channel::ALL {
            connected.push(Self::connect_channel(server, channel).await?);
        }
        let mut drain = connected.into_iter();
        Ok(Self {
            ctrl: drain.next().expect("three channels connected"),
            send: drain.next().expect("three channels connected"),
            recv: drain.next().expect("three channels connected"),
        })
    }

    async fn connect_channel(
        server: SocketAddr,
        channel: Channel,
    ) -> Result<FramedChannel, ClientError> {
        let deadline = Instant::now() + SERVER_CONNECTION_TIMEOUT;
        loop {
            match Self::try_connect(server).await {
                Ok(stream) => {
                    debug!(%channel, local = %stream.local_addr()?, "channel connected");
                    return Ok(Framed::new(stream, FrameCodec::new()));
                },
                Err(err) => {
                    if Instant::now() >= deadline {
                        debug!(%channel, error = %err, "giving up on connection");
                        return Err(ClientError::ConnectTimeout {
                            channel,
                            secs: SERVER_CONNECTION_TIMEOUT.as_secs(),
                        });
                    }
                    debug!(%channel, error = %err, "retrying connection");
                    tokio::time::sleep(CONNECT_RETRY_PAUSE).await;
                },
            }
        }
    }

    async fn try_connect(server: SocketAddr) -> std::io::Result<TcpStream> {
        let socket = if server.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.set_keepalive(true)?;
        let stream = socket.connect(server).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Builds the INIT intro from the locally-bound address and ports of the
    /// three channels.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a socket has no local address.
    pub fn local_intro(&self, identifier: &str) -> Result<IntroDetails, ClientError> {
        let ctrl = self.ctrl.get_ref().local_addr()?;
        let send = self.send.get_ref().local_addr()?;
        let recv = self.recv.get_ref().local_addr()?;
        Ok(IntroDetails {
            identifier: identifier.to_owned(),
            address: ctrl.ip().to_string(),
            ch_ctrl: u32::from(ctrl.port()),
            ch_send: u32::from(send.port()),
            ch_recv: u32::from(recv.port()),
        })
    }

    fn framed_mut(&mut self, channel: Channel) -> &mut FramedChannel {
        match channel {
            Channel::Ctrl => &mut self.ctrl,
            Channel::Send => &mut self.send,
            Channel::Recv => &mut self.recv,
        }
    }

    /// Writes one envelope on a channel.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame cannot be written.
    pub async fn send_envelope(
        &mut self,
        channel: Channel,
        envelope: &Envelope,
    ) -> Result<(), ClientError> {
        self.framed_mut(channel)
            .send(envelope.encode_frame())
            .await?;
        Ok(())
    }

    /// Reads one envelope off a channel.
    ///
    /// `timeout` of `None` waits indefinitely; `Some(Duration::ZERO)` polls
    /// and returns immediately. A timeout yields `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Disconnected`] on end-of-stream and a protocol
    /// error on a framing or decode failure.
    pub async fn recv_envelope(
        &mut self,
        channel: Channel,
        timeout: Option<Duration>,
    ) -> Result<Option<Envelope>, ClientError> {
        let framed = self.framed_mut(channel);
        let next = match timeout {
            None => framed.next().await,
            Some(limit) => match tokio::time::timeout(limit, framed.next()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!(%channel, timeout_secs = limit.as_secs_f64(), "receive timed out");
                    return Ok(None);
                },
            },
        };
        match next {
            Some(frame) => Ok(Some(Envelope::decode_frame(&frame?)?)),
            None => Err(ClientError::Disconnected { channel }),
        }
    }

    /// Sends a request on CTRL and awaits the response.
    ///
    /// # Errors
    ///
    /// Propagates send and receive failures; a timeout yields `Ok(None)`.
    pub async fn request_ctrl(
        &mut self,
        envelope: &Envelope,
        timeout: Duration,
    ) -> Result<Option<Envelope>, ClientError> {
        self.send_envelope(Channel::Ctrl, envelope).await?;
        self.recv_envelope(Channel::Ctrl, Some(timeout)).await
    }
}
