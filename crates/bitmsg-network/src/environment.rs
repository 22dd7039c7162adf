//! The seam between the gossip layer and the node core.
//!
//! Connections are plumbing: they validate, deduplicate, and relay.
//! Everything they need to know about this node — its streams, its
//! inventory, its known peers, what to do with a fresh object —
//! arrives through [`NetworkEnvironment`]. The node crate implements
//! it over its repositories and pipeline; tests implement it over
//! hash maps.

use bitmsg_protocol::object::ObjectMessage;
use bitmsg_protocol::wire::{CustomMessage, NetworkAddress};
use bitmsg_types::{InventoryVector, Result};

/// Node-side services consumed by the gossip layer.
///
/// All methods are quick, in-memory-bound operations; connections call
/// them from their async tasks without further dispatch.
pub trait NetworkEnvironment: Send + Sync + 'static {
    /// Streams this node subscribes to.
    fn streams(&self) -> Vec<u64>;

    /// The per-process random nonce, for self-connection detection.
    fn client_nonce(&self) -> u64;

    /// All unexpired inventory vectors on the given streams.
    fn inventory(&self, streams: &[u64]) -> Vec<InventoryVector>;

    /// Fetches one object, if present.
    fn get_object(&self, iv: &InventoryVector) -> Option<ObjectMessage>;

    /// Stores a validated object. Returns `false` when the inventory
    /// already held it; concurrent duplicate stores must resolve to
    /// exactly one `true`.
    fn store_object(&self, object: &ObjectMessage) -> Result<bool>;

    /// The subset of `ivs` this node does not hold yet.
    fn missing(&self, ivs: &[InventoryVector]) -> Vec<InventoryVector> {
        ivs.iter()
            .filter(|iv| self.get_object(iv).is_none())
            .copied()
            .collect()
    }

    /// Up to `limit` known peers on the given streams.
    fn known_peers(&self, limit: usize, streams: &[u64]) -> Vec<NetworkAddress>;

    /// Feeds peer addresses learned from `addr` gossip to the registry.
    fn offer_peers(&self, peers: Vec<NetworkAddress>);

    /// Hands a freshly stored object to the receive pipeline. Called
    /// at most once per inventory vector.
    fn receive_object(&self, object: ObjectMessage);

    /// Answers an application-defined request. `None` means the
    /// command is not handled.
    fn custom_response(&self, request: CustomMessage) -> Option<CustomMessage> {
        let _ = request;
        None
    }
}
