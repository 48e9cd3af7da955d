//! Connection and client bookkeeping.
//!
//! Registration happens in two stages. When a channel connects, its peer
//! `address:port` is recorded against the connection id. When the INIT frame
//! arrives on the CTRL channel, the intro's three locally-bound ports are
//! resolved through that table and folded into one [`ClientDetails`], which
//! is then registered under the client identifier in the app or sim lookup.
//!
//! In SYSTEM_WIDE simulator mode the sim lookup holds at most one entry,
//! keyed by a sentinel; in PER_NODE mode sims are keyed by identifier.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use nsb_core::{IntroDetails, SimulatorMode};
use thiserror::Error;

/// Sentinel key for the sole simulator client in SYSTEM_WIDE mode.
pub const SYSTEM_WIDE_SIM_KEY: &str = "simulator";

/// Identifier of one accepted channel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// A registered client: its identifier, address, and the connection behind
/// each of its three channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDetails {
    /// Client identifier from the INIT intro.
    pub identifier: String,
    /// Client-side IP address shared by the channels.
    pub address: String,
    /// CTRL channel connection.
    pub ch_ctrl: ConnId,
    /// SEND channel connection.
    pub ch_send: ConnId,
    /// RECV channel connection.
    pub ch_recv: ConnId,
}

/// Errors registering a client at INIT.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    /// One of the intro's `address:port` pairs is not a known connection.
    #[error("unknown channel endpoint {endpoint}")]
    UnknownEndpoint {
        /// The `address:port` string that failed to resolve.
        endpoint: String,
    },

    /// A second simulator tried to register in SYSTEM_WIDE mode.
    #[error("system-wide simulator mode only allows one simulator client")]
    DuplicateSystemWideSim,
}

/// Daemon-side registry of connections and clients.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    /// `address:port` of each accepted channel, as seen by the daemon.
    endpoints: HashMap<String, ConnId>,
    apps: HashMap<String, ClientDetails>,
    sims: HashMap<String, ClientDetails>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly accepted channel under its peer address.
    pub fn register_channel(&mut self, peer: SocketAddr, conn: ConnId) {
        self.endpoints
            .insert(format!("{}:{}", peer.ip(), peer.port()), conn);
    }

    /// Resolves an intro into [`ClientDetails`] via the endpoint table.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::UnknownEndpoint`] naming the first
    /// `address:port` pair that does not correspond to an accepted channel.
    pub fn resolve_intro(&self, intro: &IntroDetails) -> Result<ClientDetails, RegisterError> {
        let resolve = |port: u32| -> Result<ConnId, RegisterError> {
            let endpoint = format!("{}:{port}", intro.address);
            self.endpoints
                .get(&endpoint)
                .copied()
                .ok_or(RegisterError::UnknownEndpoint { endpoint })
        };
        Ok(ClientDetails {
            identifier: intro.identifier.clone(),
            address: intro.address.clone(),
            ch_ctrl: resolve(intro.ch_ctrl)?,
            ch_send: resolve(intro.ch_send)?,
            ch_recv: resolve(intro.ch_recv)?,
        })
    }

    /// Registers an application client. A duplicate identifier replaces the
    /// prior entry.
    pub fn register_app(&mut self, details: ClientDetails) {
        self.apps.insert(details.identifier.clone(), details);
    }

    /// Registers a simulator client according to the simulator mode.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::DuplicateSystemWideSim`] if a simulator is
    /// already registered in SYSTEM_WIDE mode.
    pub fn register_sim(
        &mut self,
        details: ClientDetails,
        mode: SimulatorMode,
    ) -> Result<(), RegisterError> {
        match mode {
            SimulatorMode::PerNode => {
                self.sims.insert(details.identifier.clone(), details);
            },
            SimulatorMode::SystemWide => {
                if !self.sims.is_empty() {
                    return Err(RegisterError::DuplicateSystemWideSim);
                }
                self.sims.insert(SYSTEM_WIDE_SIM_KEY.to_owned(), details);
            },
        }
        Ok(())
    }

    /// Looks up an application client by identifier.
    #[must_use]
    pub fn app(&self, identifier: &str) -> Option<&ClientDetails> {
        self.apps.get(identifier)
    }

    /// Selects the simulator a pushed SEND should be forwarded to.
    ///
    /// SYSTEM_WIDE: the sole registered simulator. PER_NODE: the simulator
    /// registered under the sending node's identifier.
    #[must_use]
    pub fn sim_for_push(&self, mode: SimulatorMode, src_id: &str) -> Option<&ClientDetails> {
        match mode {
            SimulatorMode::SystemWide => self.sims.values().next(),
            SimulatorMode::PerNode => self.sims.get(src_id),
        }
    }

    /// Identifies the application client whose RECV channel is `conn`.
    #[must_use]
    pub fn app_by_recv(&self, conn: ConnId) -> Option<&ClientDetails> {
        self.apps.values().find(|d| d.ch_recv == conn)
    }

    /// Identifies the simulator client whose RECV channel is `conn`.
    #[must_use]
    pub fn sim_by_recv(&self, conn: ConnId) -> Option<&ClientDetails> {
        self.sims.values().find(|d| d.ch_recv == conn)
    }

    /// Drops a closed connection from every table.
    ///
    /// Any client registration holding the connection in one of its channel
    /// slots is removed as well. Returns the identifiers of removed clients
    /// for logging. Buffers are untouched.
    pub fn remove_conn(&mut self, conn: ConnId) -> Vec<String> {
        self.endpoints.retain(|_, c| *c != conn);

        let mut removed = Vec::new();
        self.apps.retain(|_, d| {
            let keep = d.ch_ctrl != conn && d.ch_send != conn && d.ch_recv != conn;
            if !keep {
                removed.push(d.identifier.clone());
            }
            keep
        });
        self.sims.retain(|_, d| {
            let keep = d.ch_ctrl != conn && d.ch_send != conn && d.ch_recv != conn;
            if !keep {
                removed.push(d.identifier.clone());
            }
            keep
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intro(id: &str, ctrl: u32, send: u32, recv: u32) -> IntroDetails {
        IntroDetails {
            identifier: id.to_owned(),
            address: "127.0.0.1".to_owned(),
            ch_ctrl: ctrl,
            ch_send: send,
            ch_recv: recv,
        }
    }

    fn seed_channels(registry: &mut ClientRegistry, base: u16, first_conn: u64) {
        for (i, port) in (base..base + 3).enumerate() {
            registry.register_channel(
                format!("127.0.0.1:{port}").parse().unwrap(),
                ConnId(first_conn + i as u64),
            );
        }
    }

    #[test]
    fn intro_resolves_against_accepted_channels() {
        let mut registry = ClientRegistry::new();
        seed_channels(&mut registry, 40000, 1);

        let details = registry
            .resolve_intro(&intro("node1", 40000, 40001, 40002))
            .unwrap();
        assert_eq!(details.ch_ctrl, ConnId(1));
        assert_eq!(details.ch_send, ConnId(2));
        assert_eq!(details.ch_recv, ConnId(3));
    }

    #[test]
    fn unknown_endpoint_is_named() {
        let mut registry = ClientRegistry::new();
        seed_channels(&mut registry, 40000, 1);

        let err = registry
            .resolve_intro(&intro("node1", 40000, 40001, 49999))
            .unwrap_err();
        assert_eq!(
            err,
            RegisterError::UnknownEndpoint {
                endpoint: "127.0.0.1:49999".to_owned()
            }
        );
    }

    #[test]
    fn system_wide_allows_one_sim() {
        let mut registry = ClientRegistry::new();
        seed_channels(&mut registry, 40000, 1);
        seed_channels(&mut registry, 41000, 4);

        let first = registry
            .resolve_intro(&intro("sim1", 40000, 40001, 40002))
            .unwrap();
        registry
            .register_sim(first, SimulatorMode::SystemWide)
            .unwrap();

        let second = registry
            .resolve_intro(&intro("sim2", 41000, 41001, 41002))
            .unwrap();
        assert_eq!(
            registry.register_sim(second, SimulatorMode::SystemWide),
            Err(RegisterError::DuplicateSystemWideSim)
        );

        // The survivor is reachable under the sentinel regardless of src.
        let target = registry
            .sim_for_push(SimulatorMode::SystemWide, "anything")
            .unwrap();
        assert_eq!(target.identifier, "sim1");
    }

    #[test]
    fn per_node_sims_key_on_identifier() {
        let mut registry = ClientRegistry::new();
        seed_channels(&mut registry, 40000, 1);
        seed_channels(&mut registry, 41000, 4);

        for (id, base) in [("node1", 40000u32), ("node2", 41000)] {
            let details = registry
                .resolve_intro(&intro(id, base, base + 1, base + 2))
                .unwrap();
            registry
                .register_sim(details, SimulatorMode::PerNode)
                .unwrap();
        }

        assert_eq!(
            registry
                .sim_for_push(SimulatorMode::PerNode, "node2")
                .unwrap()
                .identifier,
            "node2"
        );
        assert!(registry
            .sim_for_push(SimulatorMode::PerNode, "node9")
            .is_none());
    }

    #[test]
    fn duplicate_app_identifier_replaces_prior() {
        let mut registry = ClientRegistry::new();
        seed_channels(&mut registry, 40000, 1);
        seed_channels(&mut registry, 41000, 4);

        let first = registry
            .resolve_intro(&intro("node1", 40000, 40001, 40002))
            .unwrap();
        registry.register_app(first);
        let second = registry
            .resolve_intro(&intro("node1", 41000, 41001, 41002))
            .unwrap();
        registry.register_app(second);

        assert_eq!(registry.app("node1").unwrap().ch_ctrl, ConnId(4));
    }

    #[test]
    fn closed_conn_purges_registration() {
        let mut registry = ClientRegistry::new();
        seed_channels(&mut registry, 40000, 1);

        let details = registry
            .resolve_intro(&intro("node1", 40000, 40001, 40002))
            .unwrap();
        registry.register_app(details);

        let removed = registry.remove_conn(ConnId(2));
        assert_eq!(removed, vec!["node1".to_owned()]);
        assert!(registry.app("node1").is_none());
    }
}
