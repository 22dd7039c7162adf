//! The abstract interfaces the node core consumes.
//!
//! Persistence, peer knowledge, and application callbacks are all
//! somebody else's concern; the core only requires that save/load
//! round-trips are byte-exact for signed preimages. Every port is a
//! small object-safe trait taken as `Arc<dyn …>`.

use bitmsg_protocol::address::BitmessageAddress;
use bitmsg_protocol::object::ObjectMessage;
use bitmsg_protocol::plaintext::Plaintext;
use bitmsg_protocol::wire::{CustomMessage, NetworkAddress};
use bitmsg_types::{InventoryVector, Label, LabelType, MessageStatus, Result};

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// The set of unexpired network objects this node holds.
pub trait Inventory: Send + Sync {
    /// All inventory vectors on the given streams.
    fn inventory(&self, streams: &[u64]) -> Vec<InventoryVector>;

    /// Fetches one object.
    fn get_object(&self, iv: &InventoryVector) -> Option<ObjectMessage>;

    /// Stores an object. Returns `false` if the inventory vector was
    /// already present; concurrent duplicate stores must resolve to
    /// exactly one `true`.
    fn store_object(&self, object: &ObjectMessage) -> Result<bool>;

    /// Evicts expired objects, returning how many were removed.
    fn cleanup(&self, now: i64) -> Result<usize>;
}

// ---------------------------------------------------------------------------
// NodeRegistry
// ---------------------------------------------------------------------------

/// Known peers per stream, with last-seen times.
pub trait NodeRegistry: Send + Sync {
    /// Up to `limit` known peers serving the given streams.
    fn known_addresses(&self, limit: usize, streams: &[u64]) -> Vec<NetworkAddress>;

    /// Merges peer addresses learned from gossip.
    fn offer_addresses(&self, addresses: Vec<NetworkAddress>);
}

// ---------------------------------------------------------------------------
// AddressRepository
// ---------------------------------------------------------------------------

/// Identities, contacts, and subscriptions.
pub trait AddressRepository: Send + Sync {
    /// Addresses with a private key.
    fn identities(&self) -> Vec<BitmessageAddress>;

    /// Addresses marked as broadcast subscriptions.
    fn subscriptions(&self) -> Vec<BitmessageAddress>;

    /// Addresses without a private key.
    fn contacts(&self) -> Vec<BitmessageAddress>;

    /// Looks up an identity by 20-byte RIPE or 32-byte tag.
    fn find_identity(&self, ripe_or_tag: &[u8]) -> Option<BitmessageAddress>;

    /// Looks up a contact by 20-byte RIPE or 32-byte tag.
    fn find_contact(&self, ripe_or_tag: &[u8]) -> Option<BitmessageAddress>;

    /// Looks up any stored address by its string form.
    fn get_address(&self, address: &str) -> Option<BitmessageAddress>;

    /// Creates or replaces an address.
    fn save(&self, address: &BitmessageAddress) -> Result<()>;

    /// Removes an address.
    fn remove(&self, address: &BitmessageAddress) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MessageRepository
// ---------------------------------------------------------------------------

/// Plaintext storage and label bookkeeping.
pub trait MessageRepository: Send + Sync {
    /// The labels of the given kinds, creating well-known ones on
    /// demand.
    fn labels(&self, kinds: &[LabelType]) -> Vec<Label>;

    /// All messages in the given status.
    fn find_by_status(&self, status: MessageStatus) -> Vec<Plaintext>;

    /// Messages in the given status addressed to `recipient`.
    fn find_by_status_and_recipient(
        &self,
        status: MessageStatus,
        recipient: &BitmessageAddress,
    ) -> Vec<Plaintext>;

    /// All messages carrying the given label.
    fn find_by_label(&self, label: &Label) -> Vec<Plaintext>;

    /// The outbound message whose acknowledgement data matches, if
    /// any.
    fn find_by_ack_data(&self, ack_data: &[u8]) -> Option<Plaintext>;

    /// Creates or updates a message, assigning an id on first save.
    fn save(&self, message: &mut Plaintext) -> Result<()>;

    /// Removes a message.
    fn remove(&self, message: &Plaintext) -> Result<()>;
}

// ---------------------------------------------------------------------------
// ProofOfWorkRepository
// ---------------------------------------------------------------------------

/// A pending proof-of-work computation, persisted so it can resume
/// after a restart.
#[derive(Clone, Debug)]
pub struct PowItem {
    /// The object awaiting its nonce.
    pub object: ObjectMessage,
    /// Difficulty-per-byte in force for this object.
    pub nonce_trials_per_byte: u64,
    /// Flat difficulty addend in force for this object.
    pub extra_bytes: u64,
}

/// Persistent queue of pending proof-of-work items, keyed by the
/// object's initial hash.
pub trait ProofOfWorkRepository: Send + Sync {
    /// Enqueues an item.
    fn put_item(&self, initial_hash: [u8; 64], item: &PowItem) -> Result<()>;

    /// All pending items with their keys.
    fn items(&self) -> Vec<([u8; 64], PowItem)>;

    /// Dequeues an item once its nonce is found.
    fn remove_item(&self, initial_hash: &[u8; 64]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Application callbacks
// ---------------------------------------------------------------------------

/// Delivery notifications to the application. Errors inside the
/// listener are the listener's problem; the pipeline logs and keeps
/// dispatching.
pub trait MessageListener: Send + Sync {
    /// A message or broadcast was received, verified, and stored.
    fn receive(&self, plaintext: &Plaintext);
}

/// Progress notifications for outbound traffic. All methods default
/// to no-ops.
pub trait MessageCallback: Send + Sync {
    /// A proof-of-work search was enqueued for this message.
    fn proof_of_work_started(&self, plaintext: Option<&Plaintext>) {
        let _ = plaintext;
    }

    /// The nonce was found and the object is about to flood.
    fn proof_of_work_completed(&self, plaintext: Option<&Plaintext>) {
        let _ = plaintext;
    }

    /// The object was stored and offered to the network.
    fn message_offered(&self, plaintext: Option<&Plaintext>, iv: InventoryVector) {
        let _ = (plaintext, iv);
    }

    /// The recipient returned the acknowledgement payload.
    fn message_acknowledged(&self, plaintext: &Plaintext) {
        let _ = plaintext;
    }
}

/// Handler for application-defined `custom` frames.
pub trait CustomCommandHandler: Send + Sync {
    /// Answers a request; `None` means unhandled.
    fn handle(&self, request: CustomMessage) -> Option<CustomMessage>;
}

// ---------------------------------------------------------------------------
// NetworkPort
// ---------------------------------------------------------------------------

/// The one thing the pipeline needs from the gossip layer: advertising
/// freshly stamped objects.
pub trait NetworkPort: Send + Sync {
    /// Advertises an inventory vector to connected peers.
    fn offer(&self, iv: InventoryVector);
}

/// No-op implementations for embedding without a network.
pub struct NullPorts;

impl MessageListener for NullPorts {
    fn receive(&self, _plaintext: &Plaintext) {}
}

impl MessageCallback for NullPorts {}

impl NetworkPort for NullPorts {
    fn offer(&self, _iv: InventoryVector) {}
}

impl CustomCommandHandler for NullPorts {
    fn handle(&self, _request: CustomMessage) -> Option<CustomMessage> {
        None
    }
}
