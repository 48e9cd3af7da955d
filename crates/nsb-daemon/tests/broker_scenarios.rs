//! End-to-end broker scenarios: a real daemon on an ephemeral port with real
//! app and sim clients talking through it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use nsb_client::{AppClient, ClientError, SimClient};
use nsb_core::{MemoryStore, PayloadObj, SimulatorMode, SystemMode};
use nsb_daemon::{BrokerConfig, BrokerServer, DaemonError};
use tokio::task::JoinHandle;

/// Per-step receive timeout.
const STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause long enough for the daemon to ingest a fire-and-forget frame.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn test_config() -> BrokerConfig {
    BrokerConfig {
        // Ephemeral port so parallel tests never collide.
        server_port: 0,
        ..BrokerConfig::default()
    }
}

async fn start_broker(
    config: BrokerConfig,
) -> (SocketAddr, JoinHandle<Result<(), DaemonError>>) {
    let server = BrokerServer::bind(config).await.expect("bind broker");
    let addr = server.local_addr().expect("local addr");
    let handle = tokio::spawn(server.run());
    (addr, handle)
}

#[tokio::test]
async fn two_hop_hello() {
    let (addr, daemon) = start_broker(test_config()).await;

    let mut node1 = AppClient::connect("node1", addr).await.unwrap();
    let mut node2 = AppClient::connect("node2", addr).await.unwrap();
    let mut sim = SimClient::connect("sim1", addr).await.unwrap();

    assert!(node1.ping().await.unwrap());

    // node1 -> broker.
    let key = node1.send("node2", b"hi").await.unwrap();
    assert!(key.is_none(), "inline mode mints no store key");
    settle().await;

    // broker -> sim.
    let entry = sim.fetch(None, Some(STEP_TIMEOUT)).await.unwrap().unwrap();
    assert_eq!(entry.source, "node1");
    assert_eq!(entry.destination, "node2");
    assert_eq!(entry.payload_obj.bytes(), Some(&b"hi"[..]));
    assert_eq!(entry.payload_size, 2);

    // sim -> broker after "transport".
    sim.post(
        &entry.source,
        &entry.destination,
        entry.payload_obj.clone(),
        entry.payload_size,
    )
    .await
    .unwrap();
    settle().await;

    // broker -> node2.
    let delivered = node2
        .receive(None, Some(STEP_TIMEOUT))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.source, "node1");
    assert_eq!(delivered.destination, "node2");
    assert_eq!(delivered.payload_obj.bytes(), Some(&b"hi"[..]));
    assert_eq!(delivered.payload_size, 2);

    // EXIT stops the daemon cleanly.
    node1.exit().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon should stop after EXIT")
        .expect("daemon task should not panic");
    assert!(result.is_ok());
}

#[tokio::test]
async fn source_filtered_fetch() {
    let (addr, _daemon) = start_broker(test_config()).await;

    let mut app_a = AppClient::connect("A", addr).await.unwrap();
    let mut app_b = AppClient::connect("B", addr).await.unwrap();
    let mut sim = SimClient::connect("sim1", addr).await.unwrap();

    // Arrival order A1, B1, A2, B2; the pauses pin the interleaving.
    app_a.send("X", b"A1").await.unwrap();
    settle().await;
    app_b.send("X", b"B1").await.unwrap();
    settle().await;
    app_a.send("X", b"A2").await.unwrap();
    settle().await;
    app_b.send("X", b"B2").await.unwrap();
    settle().await;

    let b1 = sim
        .fetch(Some("B"), Some(STEP_TIMEOUT))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(b1.payload_obj.bytes(), Some(&b"B1"[..]));

    let a1 = sim.fetch(None, Some(STEP_TIMEOUT)).await.unwrap().unwrap();
    assert_eq!(a1.payload_obj.bytes(), Some(&b"A1"[..]));

    let a2 = sim
        .fetch(Some("A"), Some(STEP_TIMEOUT))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a2.payload_obj.bytes(), Some(&b"A2"[..]));

    let b2 = sim.fetch(None, Some(STEP_TIMEOUT)).await.unwrap().unwrap();
    assert_eq!(b2.payload_obj.bytes(), Some(&b"B2"[..]));

    // Buffer drained.
    assert!(sim.fetch(None, Some(STEP_TIMEOUT)).await.unwrap().is_none());
}

#[tokio::test]
async fn no_message_on_empty_buffer() {
    let (addr, _daemon) = start_broker(test_config()).await;

    let mut node2 = AppClient::connect("node2", addr).await.unwrap();
    let empty = node2
        .receive(Some("node2"), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(empty.is_none());
}

#[tokio::test]
async fn push_mode_forwards_send_to_sim() {
    let config = BrokerConfig {
        system_mode: SystemMode::Push,
        simulator_mode: SimulatorMode::SystemWide,
        ..test_config()
    };
    let (addr, _daemon) = start_broker(config).await;

    let mut sim = SimClient::connect("sim1", addr).await.unwrap();
    let mut node1 = AppClient::connect("node1", addr).await.unwrap();
    assert_eq!(sim.config().system_mode, SystemMode::Push);

    node1.send("node2", b"x").await.unwrap();

    // No FETCH request goes out in PUSH mode; the FORWARD frame just
    // arrives on the sim's RECV channel with the metadata preserved.
    let entry = sim.fetch(None, Some(STEP_TIMEOUT)).await.unwrap().unwrap();
    assert_eq!(entry.source, "node1");
    assert_eq!(entry.destination, "node2");
    assert_eq!(entry.payload_obj.bytes(), Some(&b"x"[..]));
}

#[tokio::test]
async fn push_mode_forwards_post_to_app() {
    let config = BrokerConfig {
        system_mode: SystemMode::Push,
        simulator_mode: SimulatorMode::SystemWide,
        ..test_config()
    };
    let (addr, _daemon) = start_broker(config).await;

    let mut sim = SimClient::connect("sim1", addr).await.unwrap();
    let mut node2 = AppClient::connect("node2", addr).await.unwrap();

    sim.post("node1", "node2", PayloadObj::Inline(b"y".to_vec()), 1)
        .await
        .unwrap();

    let delivered = node2
        .receive(None, Some(STEP_TIMEOUT))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.source, "node1");
    assert_eq!(delivered.destination, "node2");
    assert_eq!(delivered.payload_obj.bytes(), Some(&b"y"[..]));
}

#[tokio::test]
async fn offload_round_trip() {
    let config = BrokerConfig {
        use_store: true,
        store_address: "127.0.0.1".to_owned(),
        store_port: 6379,
        ..test_config()
    };
    let (addr, _daemon) = start_broker(config).await;

    let store = Arc::new(MemoryStore::new("scenario"));
    let mut node1 = AppClient::connect_with_store("node1", addr, store.clone())
        .await
        .unwrap();
    let mut node2 = AppClient::connect_with_store("node2", addr, store.clone())
        .await
        .unwrap();
    let mut sim = SimClient::connect_with_store("sim1", addr, store.clone())
        .await
        .unwrap();

    // The SEND puts the payload in the store; only the key travels.
    let key = node1.send("node2", b"big").await.unwrap().unwrap();
    assert!(store.contains(&key));
    settle().await;

    // FETCH peeks: bytes come in, the key stays live for the POST.
    let entry = sim.fetch(None, Some(STEP_TIMEOUT)).await.unwrap().unwrap();
    assert_eq!(entry.payload_obj.key(), Some(key.as_str()));
    assert_eq!(entry.payload_obj.bytes(), Some(&b"big"[..]));
    assert!(store.contains(&key), "fetch must not drain the store");

    sim.post(
        &entry.source,
        &entry.destination,
        entry.payload_obj.clone(),
        entry.payload_size,
    )
    .await
    .unwrap();
    settle().await;

    // RECEIVE takes: delivery is final, the key is gone.
    let delivered = node2
        .receive(None, Some(STEP_TIMEOUT))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivered.payload_obj.bytes(), Some(&b"big"[..]));
    assert_eq!(delivered.payload_size, 3);
    assert!(!store.contains(&key), "receive must drain the store");
    assert!(store.is_empty());
}

#[tokio::test]
async fn system_wide_mode_rejects_second_sim() {
    let (addr, _daemon) = start_broker(test_config()).await;

    let _sim1 = SimClient::connect("sim1", addr).await.unwrap();
    let second = SimClient::connect("sim2", addr).await;
    assert!(matches!(second, Err(ClientError::InitRejected)));
}

#[tokio::test]
async fn per_node_sims_route_by_source() {
    let config = BrokerConfig {
        simulator_mode: SimulatorMode::PerNode,
        ..test_config()
    };
    let (addr, _daemon) = start_broker(config).await;

    let mut node1 = AppClient::connect("node1", addr).await.unwrap();
    let mut node2 = AppClient::connect("node2", addr).await.unwrap();
    let mut sim1 = SimClient::connect("node1", addr).await.unwrap();
    let mut sim2 = SimClient::connect("node2", addr).await.unwrap();

    node1.send("node2", b"from-1").await.unwrap();
    node2.send("node1", b"from-2").await.unwrap();
    settle().await;

    // A per-node sim asking for any source is pinned to its own node.
    let seen_by_sim2 = sim2
        .fetch(Some("node1"), Some(STEP_TIMEOUT))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen_by_sim2.source, "node2");

    let seen_by_sim1 = sim1
        .fetch(Some("node1"), Some(STEP_TIMEOUT))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen_by_sim1.source, "node1");
}

#[tokio::test]
async fn dropped_post_reaches_no_receiver() {
    let (addr, _daemon) = start_broker(test_config()).await;

    let mut node2 = AppClient::connect("node2", addr).await.unwrap();
    let mut sim = SimClient::connect("sim1", addr).await.unwrap();

    sim.post_dropped("node1", "node2").await.unwrap();
    settle().await;

    let nothing = node2
        .receive(None, Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(nothing.is_none());
}

#[tokio::test]
async fn same_identifier_app_and_sim_coexist() {
    let config = BrokerConfig {
        simulator_mode: SimulatorMode::PerNode,
        ..test_config()
    };
    let (addr, _daemon) = start_broker(config).await;

    // An app and a sim may share an identifier; originator kind keeps them
    // apart in the registry.
    let mut app = AppClient::connect("node1", addr).await.unwrap();
    let mut sim = SimClient::connect("node1", addr).await.unwrap();

    app.send("node2", b"p").await.unwrap();
    settle().await;

    let entry = sim.fetch(None, Some(STEP_TIMEOUT)).await.unwrap().unwrap();
    assert_eq!(entry.source, "node1");
    assert_eq!(entry.destination, "node2");
}
