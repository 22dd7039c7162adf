//! Pipeline tests against in-memory ports, no sockets.
//!
//! Objects "arrive" by calling the dispatcher directly, which is
//! exactly what the gossip layer does after storing one. Proof of
//! work runs with trivial difficulty so the tests stay fast.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitmsg_node::dispatch;
use bitmsg_node::node::Node;
use bitmsg_node::ports::MessageListener;
use bitmsg_protocol::object::ObjectMessage;
use bitmsg_protocol::payload::ObjectPayload;
use bitmsg_protocol::plaintext::Plaintext;
use bitmsg_protocol::unix_time_now;
use bitmsg_types::config::NetworkParameters;
use bitmsg_types::{LabelType, MessageStatus, ObjectType};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn relaxed_params() -> NetworkParameters {
    NetworkParameters {
        nonce_trials_per_byte: 2,
        extra_bytes: 2,
        msg_ttl_secs: 300,
        pubkey_ttl_secs: 600,
        ..Default::default()
    }
}

fn offline_node() -> Node {
    Node::builder(relaxed_params()).without_network().build()
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

    fn count(&self) -> usize {
        self.received.lock().expect("lock").len()
    }
}

impl MessageListener for RecordingListener {
    fn receive(&self, plaintext: &Plaintext) {
        self.received.lock().expect("lock").push(plaintext.clone());
    }
}

// ---------------------------------------------------------------------------
// S5: the outbound status machine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn msg_walks_pubkey_requested_to_sent() {
    let node = offline_node();
    let sender = node.create_identity(1).expect("identity");

    // The recipient exists elsewhere; we only know the address string.
    let other = offline_node();
    let recipient = other.create_identity(1).expect("identity");
    node.add_contact(recipient.as_str()).expect("contact");

    node.send(sender.as_str(), recipient.as_str(), "hello", "world")
        .await
        .expect("send");

    // Recipient pubkey unknown: the message waits, a getpubkey floods.
    let waiting = node
        .context()
        .messages
        .find_by_status(MessageStatus::PubkeyRequested);
    assert_eq!(waiting.len(), 1);
    let ivs = node.context().inventory.inventory(&[1]);
    let kinds: Vec<ObjectType> = ivs
        .iter()
        .filter_map(|iv| node.context().inventory.get_object(iv))
        .map(|o| o.object_kind())
        .collect();
    assert!(kinds.contains(&ObjectType::GetPubkey));

    // The matching pubkey arrives from the network.
    let expires = unix_time_now() + 600;
    let pubkey_object = ObjectMessage::pubkey(&recipient, 1, expires).expect("pubkey");
    dispatch::receive_object(node.context(), pubkey_object).await;

    // PubkeyRequested → DoingProofOfWork → Sent, synchronously here
    // because dispatch awaited the proof of work.
    let sent = node.context().messages.find_by_status(MessageStatus::Sent);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].iv.is_some());
    assert!(node
        .context()
        .messages
        .find_by_status(MessageStatus::PubkeyRequested)
        .is_empty());

    // The msg object is in the inventory and decryptable by the
    // recipient.
    let msg_object = node
        .context()
        .inventory
        .inventory(&[1])
        .into_iter()
        .filter_map(|iv| node.context().inventory.get_object(&iv))
        .find(|o| o.object_kind() == ObjectType::Msg)
        .expect("msg object");
    let ObjectPayload::Msg(encrypted) = &msg_object.payload else {
        panic!("expected msg payload");
    };
    let plaintext = encrypted
        .decrypt(
            recipient
                .private_key()
                .expect("identity")
                .private_encryption_key(),
        )
        .expect("decrypt");
    assert_eq!(plaintext.subject().as_deref(), Some("hello"));
}

#[tokio::test]
async fn known_pubkey_skips_the_request() {
    let node = offline_node();
    let sender = node.create_identity(1).expect("identity");
    // A local identity for the recipient means its pubkey is already
    // in the repository.
    let recipient = node.create_identity(1).expect("identity");

    node.send(sender.as_str(), recipient.as_str(), "direct", "path")
        .await
        .expect("send");

    assert_eq!(
        node.context()
            .messages
            .find_by_status(MessageStatus::Sent)
            .len(),
        1
    );
    assert!(node
        .context()
        .messages
        .find_by_status(MessageStatus::PubkeyRequested)
        .is_empty());
}

// ---------------------------------------------------------------------------
// Inbound delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inbound_msg_is_delivered_with_labels() {
    let listener = RecordingListener::new();
    let receiver = Node::builder(relaxed_params())
        .without_network()
        .listener(listener.clone())
        .build();
    let me = receiver.create_identity(1).expect("identity");

    // A remote sender who somehow knows our pubkey builds the object.
    let sender_node = offline_node();
    let sender = sender_node.create_identity(1).expect("identity");
    let mut me_as_contact: bitmsg_protocol::address::BitmessageAddress =
        me.as_str().parse().expect("parse");
    me_as_contact
        .attach_pubkey(me.pubkey().expect("pubkey").clone())
        .expect("attach");
    let mut draft = Plaintext::msg(sender.clone(), me_as_contact, "ping", "content");
    let object = ObjectMessage::msg(&mut draft, unix_time_now() + 300).expect("build");

    dispatch::receive_object(receiver.context(), object).await;

    assert_eq!(listener.count(), 1);
    let received = receiver
        .context()
        .messages
        .find_by_status(MessageStatus::Received);
    assert_eq!(received.len(), 1);
    let kinds: Vec<Option<LabelType>> = received[0].labels.iter().map(|l| l.kind).collect();
    assert!(kinds.contains(&Some(LabelType::Inbox)));
    assert!(kinds.contains(&Some(LabelType::Unread)));
    // The sender became a contact, pubkey included.
    assert!(receiver
        .context()
        .addresses
        .find_contact(&sender.ripe()[..])
        .map(|c| c.pubkey().is_some())
        .unwrap_or(false));
}

#[tokio::test]
async fn subscribed_broadcast_is_delivered() {
    let listener = RecordingListener::new();
    let subscriber = Node::builder(relaxed_params())
        .without_network()
        .listener(listener.clone())
        .build();

    let sender_node = offline_node();
    let sender = sender_node.create_identity(1).expect("identity");
    subscriber.add_subscription(sender.as_str()).expect("subscribe");

    let mut draft = Plaintext::broadcast(sender.clone(), "news", "for subscribers");
    let object = ObjectMessage::broadcast(&mut draft, unix_time_now() + 300).expect("build");
    dispatch::receive_object(subscriber.context(), object).await;

    assert_eq!(listener.count(), 1);
    let received = subscriber
        .context()
        .messages
        .find_by_status(MessageStatus::Received);
    assert_eq!(received.len(), 1);
    let kinds: Vec<Option<LabelType>> = received[0].labels.iter().map(|l| l.kind).collect();
    assert!(kinds.contains(&Some(LabelType::Broadcast)));
}

#[tokio::test]
async fn unsubscribed_broadcast_is_ignored() {
    let listener = RecordingListener::new();
    let bystander = Node::builder(relaxed_params())
        .without_network()
        .listener(listener.clone())
        .build();

    let sender_node = offline_node();
    let sender = sender_node.create_identity(1).expect("identity");
    let mut draft = Plaintext::broadcast(sender, "noise", "not for us");
    let object = ObjectMessage::broadcast(&mut draft, unix_time_now() + 300).expect("build");
    dispatch::receive_object(bystander.context(), object).await;

    assert_eq!(listener.count(), 0);
}

// ---------------------------------------------------------------------------
// Acknowledgements
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ack_payload_marks_message_acknowledged() {
    let node = offline_node();
    let sender = node.create_identity(1).expect("identity");
    let recipient = node.create_identity(1).expect("identity");

    node.send(sender.as_str(), recipient.as_str(), "s", "b")
        .await
        .expect("send");
    let sent = node.context().messages.find_by_status(MessageStatus::Sent);
    let ack_data = sent[0].ack_data.clone().expect("ack data");

    // The recipient floods the ack payload back as an object.
    let ack_object = ObjectMessage {
        nonce: Some([0u8; 8]),
        expires_time: unix_time_now() + 300,
        object_type: 42,
        version: 1,
        stream: 1,
        payload: ObjectPayload::Generic(ack_data),
    };
    dispatch::receive_object(node.context(), ack_object).await;

    assert_eq!(
        node.context()
            .messages
            .find_by_status(MessageStatus::AckReceived)
            .len(),
        1
    );
}

// ---------------------------------------------------------------------------
// Pubkey answering and its rate limit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn getpubkey_is_answered_once_per_ttl() {
    let node = offline_node();
    let identity = node.create_identity(1).expect("identity");

    let request = ObjectMessage::getpubkey(&identity, unix_time_now() + 300);
    dispatch::receive_object(node.context(), request.clone()).await;

    let pubkey_count = |node: &Node| {
        node.context()
            .inventory
            .inventory(&[1])
            .into_iter()
            .filter_map(|iv| node.context().inventory.get_object(&iv))
            .filter(|o| o.object_kind() == ObjectType::Pubkey)
            .count()
    };
    assert_eq!(pubkey_count(&node), 1);

    // A second request within the pubkey TTL is not answered again.
    let mut second = request;
    second.expires_time += 1;
    dispatch::receive_object(node.context(), second).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pubkey_count(&node), 1);
}
