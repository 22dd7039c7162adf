//! Two-node gossip tests over localhost TCP.
//!
//! Each node gets a minimal in-memory environment. Objects carry
//! trivial-difficulty proof of work; the nodes run with matching
//! relaxed network parameters so acceptance checks still execute.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitmsg_network::environment::NetworkEnvironment;
use bitmsg_network::handler::TcpNetworkHandler;
use bitmsg_protocol::object::ObjectMessage;
use bitmsg_protocol::payload::ObjectPayload;
use bitmsg_protocol::pow::{initial_hash, pow_target, pow_value};
use bitmsg_protocol::unix_time_now;
use bitmsg_protocol::wire::{CustomMessage, NetworkAddress};
use bitmsg_types::config::NetworkParameters;
use bitmsg_types::{InventoryVector, Result};

// ---------------------------------------------------------------------------
// Test environment
// ---------------------------------------------------------------------------

struct MemoryEnvironment {
    nonce: u64,
    objects: Mutex<HashMap<InventoryVector, ObjectMessage>>,
    received: AtomicUsize,
}

impl MemoryEnvironment {
    fn new(nonce: u64) -> Arc<Self> {
        Arc::new(Self {
            nonce,
            objects: Mutex::new(HashMap::new()),
            received: AtomicUsize::new(0),
        })
    }

    fn insert(&self, object: ObjectMessage) {
        let iv = object.inventory_vector();
        self.objects.lock().expect("lock").insert(iv, object);
    }

    fn inventory_set(&self) -> Vec<InventoryVector> {
        let mut ivs: Vec<_> = self.objects.lock().expect("lock").keys().copied().collect();
        ivs.sort();
        ivs
    }
}

impl NetworkEnvironment for MemoryEnvironment {
    fn streams(&self) -> Vec<u64> {
        vec![1]
    }

    fn client_nonce(&self) -> u64 {
        self.nonce
    }

    fn inventory(&self, _streams: &[u64]) -> Vec<InventoryVector> {
        self.objects.lock().expect("lock").keys().copied().collect()
    }

    fn get_object(&self, iv: &InventoryVector) -> Option<ObjectMessage> {
        self.objects.lock().expect("lock").get(iv).cloned()
    }

    fn store_object(&self, object: &ObjectMessage) -> Result<bool> {
        let iv = object.inventory_vector();
        let mut objects = self.objects.lock().expect("lock");
        if objects.contains_key(&iv) {
            return Ok(false);
        }
        objects.insert(iv, object.clone());
        Ok(true)
    }

    fn known_peers(&self, _limit: usize, _streams: &[u64]) -> Vec<NetworkAddress> {
        Vec::new()
    }

    fn offer_peers(&self, _peers: Vec<NetworkAddress>) {}

    fn receive_object(&self, _object: ObjectMessage) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    fn custom_response(&self, request: CustomMessage) -> Option<CustomMessage> {
        (request.command == "echo").then(|| CustomMessage {
            command: "echo".into(),
            data: request.data,
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn relaxed_params() -> NetworkParameters {
    NetworkParameters {
        port: 0,
        nonce_trials_per_byte: 2,
        extra_bytes: 2,
        connection_ttl_secs: 30,
        ..Default::default()
    }
}

/// A generic object with valid trivial-difficulty proof of work.
fn stamped_object(marker: u8) -> ObjectMessage {
    let mut object = ObjectMessage {
        nonce: None,
        expires_time: unix_time_now() + 300,
        object_type: 99,
        version: 1,
        stream: 1,
        payload: ObjectPayload::Generic(vec![marker; 8]),
    };
    let payload = object.bytes_without_nonce();
    let target = pow_target(payload.len(), 300, 2, 2);
    let hash = initial_hash(&object);
    let mut nonce = 0u64;
    while pow_value(&nonce.to_be_bytes(), &hash) > target {
        nonce += 1;
    }
    object.nonce = Some(nonce.to_be_bytes());
    object
}

async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disjoint_inventories_converge() {
    let env_a = MemoryEnvironment::new(1);
    let env_b = MemoryEnvironment::new(2);
    for marker in 0..3 {
        env_a.insert(stamped_object(marker));
    }
    for marker in 10..15 {
        env_b.insert(stamped_object(marker));
    }

    let listener = Arc::new(TcpNetworkHandler::new(relaxed_params()));
    let port = listener
        .start(env_a.clone() as Arc<dyn NetworkEnvironment>)
        .await
        .expect("start");

    let dialer = TcpNetworkHandler::new(relaxed_params());
    dialer
        .synchronize(
            env_b.clone() as Arc<dyn NetworkEnvironment>,
            "127.0.0.1",
            port,
            Duration::from_secs(10),
        )
        .await
        .expect("synchronize");

    let converged = wait_until(
        || env_a.inventory_set() == env_b.inventory_set(),
        Duration::from_secs(10),
    )
    .await;
    assert!(converged, "inventories did not converge");
    assert_eq!(env_a.inventory_set().len(), 8);
    // Each side dispatched exactly the objects it was missing.
    assert_eq!(env_a.received.load(Ordering::Relaxed), 5);
    assert_eq!(env_b.received.load(Ordering::Relaxed), 3);

    listener.stop();
}

#[tokio::test]
async fn self_connection_is_dropped() {
    let env = MemoryEnvironment::new(7);
    env.insert(stamped_object(1));

    let listener = Arc::new(TcpNetworkHandler::new(relaxed_params()));
    let port = listener
        .start(env.clone() as Arc<dyn NetworkEnvironment>)
        .await
        .expect("start");

    // Same environment on both ends means the same client nonce.
    let dialer = TcpNetworkHandler::new(relaxed_params());
    dialer
        .synchronize(
            env.clone() as Arc<dyn NetworkEnvironment>,
            "127.0.0.1",
            port,
            Duration::from_secs(2),
        )
        .await
        .expect("synchronize");

    // Nothing was dispatched: the handshake never completed.
    assert_eq!(env.received.load(Ordering::Relaxed), 0);
    listener.stop();
}

#[tokio::test]
async fn custom_request_roundtrip() {
    let env = MemoryEnvironment::new(11);
    let listener = Arc::new(TcpNetworkHandler::new(relaxed_params()));
    let port = listener
        .start(env.clone() as Arc<dyn NetworkEnvironment>)
        .await
        .expect("start");

    let dialer = TcpNetworkHandler::new(relaxed_params());
    let reply = dialer
        .send_custom(
            "127.0.0.1",
            port,
            CustomMessage {
                command: "echo".into(),
                data: vec![1, 2, 3],
            },
            Duration::from_secs(5),
        )
        .await
        .expect("custom exchange");
    assert_eq!(reply.command, "echo");
    assert_eq!(reply.data, vec![1, 2, 3]);

    listener.stop();
}
