//! Full end-to-end exchange between two nodes over localhost TCP.
//!
//! Alice knows Bob only by his address string. Her message triggers
//! the whole machinery: getpubkey flood, Bob's pubkey answer, msg
//! build, proof of work, flood, and delivery on Bob's side. Trivial
//! difficulty keeps it quick; generous timeouts keep it stable.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitmsg_node::node::Node;
use bitmsg_node::ports::MessageListener;
use bitmsg_protocol::plaintext::Plaintext;
use bitmsg_types::config::NetworkParameters;
use bitmsg_types::MessageStatus;

fn relaxed_params() -> NetworkParameters {
    NetworkParameters {
        port: 0,
        nonce_trials_per_byte: 2,
        extra_bytes: 2,
        msg_ttl_secs: 300,
        pubkey_ttl_secs: 600,
        connection_ttl_secs: 60,
        ..Default::default()
    }
}

struct RecordingListener {
    received: Mutex<Vec<Plaintext>>,
}

impl RecordingListener {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
        })
    }

    fn subjects(&self) -> Vec<String> {
        self.received
            .lock()
            .expect("lock")
            .iter()
            .filter_map(|p| p.subject())
            .collect()
    }
}

impl MessageListener for RecordingListener {
    fn receive(&self, plaintext: &Plaintext) {
        self.received.lock().expect("lock").push(plaintext.clone());
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread")]
async fn message_travels_between_two_nodes() {
    let bob_listener = RecordingListener::new();

    let alice = Node::builder(relaxed_params()).build();
    let bob = Node::builder(relaxed_params())
        .listener(bob_listener.clone())
        .build();

    alice.startup().await.expect("alice startup");
    bob.startup().await.expect("bob startup");
    let alice_port = alice.local_port().expect("alice port");

    let alice_id = alice.create_identity(1).expect("alice identity");
    let bob_id = bob.create_identity(1).expect("bob identity");
    alice.add_contact(bob_id.as_str()).expect("contact");

    bob.connect("127.0.0.1", alice_port).await.expect("connect");
    // Give the handshake a moment before traffic starts flowing.
    tokio::time::sleep(Duration::from_millis(300)).await;

    alice
        .send(alice_id.as_str(), bob_id.as_str(), "over the wire", "hello bob")
        .await
        .expect("send");

    // The pubkey round-trip and the message itself all ride the same
    // gossip connection.
    let delivered = wait_until(
        || bob_listener.subjects().contains(&"over the wire".to_owned()),
        Duration::from_secs(30),
    )
    .await;
    assert!(delivered, "bob never received the message");

    let sent = wait_until(
        || {
            !alice
                .context()
                .messages
                .find_by_status(MessageStatus::Sent)
                .is_empty()
        },
        Duration::from_secs(10),
    )
    .await;
    assert!(sent, "alice's message never reached Sent");

    alice.shutdown().await;
    bob.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn broadcast_reaches_a_subscriber() {
    let sub_listener = RecordingListener::new();

    let publisher = Node::builder(relaxed_params()).build();
    let subscriber = Node::builder(relaxed_params())
        .listener(sub_listener.clone())
        .build();

    publisher.startup().await.expect("publisher startup");
    subscriber.startup().await.expect("subscriber startup");
    let port = publisher.local_port().expect("port");

    let publisher_id = publisher.create_identity(1).expect("identity");
    subscriber
        .add_subscription(publisher_id.as_str())
        .expect("subscribe");

    subscriber.connect("127.0.0.1", port).await.expect("connect");
    tokio::time::sleep(Duration::from_millis(300)).await;

    publisher
        .broadcast(publisher_id.as_str(), "breaking", "broadcast body")
        .await
        .expect("broadcast");

    let delivered = wait_until(
        || sub_listener.subjects().contains(&"breaking".to_owned()),
        Duration::from_secs(30),
    )
    .await;
    assert!(delivered, "subscriber never received the broadcast");

    publisher.shutdown().await;
    subscriber.shutdown().await;
}
