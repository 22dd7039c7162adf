//! In-memory port implementations.
//!
//! Used by the tests and by embedders that do not need persistence.
//! Each store is a mutex around a plain collection; the contention
//! profile of a single node never makes these locks interesting.

use std::collections::HashMap;
use std::sync::Mutex;

use bitmsg_protocol::address::BitmessageAddress;
use bitmsg_protocol::object::ObjectMessage;
use bitmsg_protocol::plaintext::Plaintext;
use bitmsg_protocol::wire::NetworkAddress;
use bitmsg_types::{BmError, InventoryVector, Label, LabelType, MessageStatus, Result};

use crate::ports::{
    AddressRepository, Inventory, MessageRepository, NodeRegistry, PowItem,
    ProofOfWorkRepository,
};

fn poisoned() -> BmError {
    BmError::Storage {
        reason: "store lock poisoned".into(),
    }
}

// ---------------------------------------------------------------------------
// MemoryInventory
// ---------------------------------------------------------------------------

/// Inventory over a hash map.
#[derive(Default)]
pub struct MemoryInventory {
    objects: Mutex<HashMap<InventoryVector, ObjectMessage>>,
}

impl MemoryInventory {
    /// Creates an empty inventory.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inventory for MemoryInventory {
    fn inventory(&self, streams: &[u64]) -> Vec<InventoryVector> {
        self.objects
            .lock()
            .map(|objects| {
                objects
                    .iter()
                    .filter(|(_, o)| streams.contains(&o.stream))
                    .map(|(iv, _)| *iv)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn get_object(&self, iv: &InventoryVector) -> Option<ObjectMessage> {
        self.objects.lock().ok()?.get(iv).cloned()
    }

    fn store_object(&self, object: &ObjectMessage) -> Result<bool> {
        let iv = object.inventory_vector();
        let mut objects = self.objects.lock().map_err(|_| poisoned())?;
        if objects.contains_key(&iv) {
            return Ok(false);
        }
        objects.insert(iv, object.clone());
        Ok(true)
    }

    fn cleanup(&self, now: i64) -> Result<usize> {
        let mut objects = self.objects.lock().map_err(|_| poisoned())?;
        let before = objects.len();
        objects.retain(|_, o| o.expires_time > now);
        Ok(before - objects.len())
    }
}

// ---------------------------------------------------------------------------
// MemoryNodeRegistry
// ---------------------------------------------------------------------------

/// Peer registry over a hash map keyed by endpoint.
#[derive(Default)]
pub struct MemoryNodeRegistry {
    peers: Mutex<HashMap<([u8; 16], u16), NetworkAddress>>,
}

impl MemoryNodeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeRegistry for MemoryNodeRegistry {
    fn known_addresses(&self, limit: usize, streams: &[u64]) -> Vec<NetworkAddress> {
        let Ok(peers) = self.peers.lock() else {
            return Vec::new();
        };
        let mut known: Vec<NetworkAddress> = peers
            .values()
            .filter(|p| streams.contains(&p.stream))
            .copied()
            .collect();
        // Freshest first.
        known.sort_by_key(|p| std::cmp::Reverse(p.time));
        known.truncate(limit);
        known
    }

    fn offer_addresses(&self, addresses: Vec<NetworkAddress>) {
        let Ok(mut peers) = self.peers.lock() else {
            return;
        };
        for address in addresses {
            let key = (address.ip, address.port);
            let entry = peers.entry(key).or_insert(address);
            if address.time > entry.time {
                *entry = address;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryAddressRepository
// ---------------------------------------------------------------------------

/// Address book over a hash map keyed by address string.
#[derive(Default)]
pub struct MemoryAddressRepository {
    addresses: Mutex<HashMap<String, BitmessageAddress>>,
}

impl MemoryAddressRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    fn filtered(&self, predicate: impl Fn(&BitmessageAddress) -> bool) -> Vec<BitmessageAddress> {
        self.addresses
            .lock()
            .map(|addresses| addresses.values().filter(|a| predicate(a)).cloned().collect())
            .unwrap_or_default()
    }

    fn find(
        &self,
        ripe_or_tag: &[u8],
        predicate: impl Fn(&BitmessageAddress) -> bool,
    ) -> Option<BitmessageAddress> {
        let addresses = self.addresses.lock().ok()?;
        addresses
            .values()
            .filter(|a| predicate(a))
            .find(|a| match ripe_or_tag.len() {
                20 => a.ripe()[..] == *ripe_or_tag,
                32 => a.tag()[..] == *ripe_or_tag,
                _ => false,
            })
            .cloned()
    }
}

impl AddressRepository for MemoryAddressRepository {
    fn identities(&self) -> Vec<BitmessageAddress> {
        self.filtered(|a| a.is_identity())
    }

    fn subscriptions(&self) -> Vec<BitmessageAddress> {
        self.filtered(|a| a.is_subscribed())
    }

    fn contacts(&self) -> Vec<BitmessageAddress> {
        self.filtered(|a| !a.is_identity())
    }

    fn find_identity(&self, ripe_or_tag: &[u8]) -> Option<BitmessageAddress> {
        self.find(ripe_or_tag, |a| a.is_identity())
    }

    fn find_contact(&self, ripe_or_tag: &[u8]) -> Option<BitmessageAddress> {
        self.find(ripe_or_tag, |a| !a.is_identity())
    }

    fn get_address(&self, address: &str) -> Option<BitmessageAddress> {
        self.addresses.lock().ok()?.get(address).cloned()
    }

    fn save(&self, address: &BitmessageAddress) -> Result<()> {
        let mut addresses = self.addresses.lock().map_err(|_| poisoned())?;
        addresses.insert(address.as_str().to_owned(), address.clone());
        Ok(())
    }

    fn remove(&self, address: &BitmessageAddress) -> Result<()> {
        let mut addresses = self.addresses.lock().map_err(|_| poisoned())?;
        addresses.remove(address.as_str());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryMessageRepository
// ---------------------------------------------------------------------------

/// Message store over a vector, with lazily created well-known labels.
pub struct MemoryMessageRepository {
    messages: Mutex<Vec<Plaintext>>,
    labels: Mutex<Vec<Label>>,
    next_id: Mutex<u64>,
}

impl MemoryMessageRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            labels: Mutex::new(Vec::new()),
            next_id: Mutex::new(1),
        }
    }
}

impl Default for MemoryMessageRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRepository for MemoryMessageRepository {
    fn labels(&self, kinds: &[LabelType]) -> Vec<Label> {
        let Ok(mut labels) = self.labels.lock() else {
            return Vec::new();
        };
        kinds
            .iter()
            .map(|kind| {
                if let Some(existing) = labels.iter().find(|l| l.kind == Some(*kind)) {
                    existing.clone()
                } else {
                    let label = Label::of(labels.len() as i64 + 1, *kind);
                    labels.push(label.clone());
                    label
                }
            })
            .collect()
    }

    fn find_by_status(&self, status: MessageStatus) -> Vec<Plaintext> {
        self.messages
            .lock()
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m.status == status)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn find_by_status_and_recipient(
        &self,
        status: MessageStatus,
        recipient: &BitmessageAddress,
    ) -> Vec<Plaintext> {
        self.messages
            .lock()
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| {
                        m.status == status
                            && m.to.as_ref().map(|to| to.as_str()) == Some(recipient.as_str())
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn find_by_label(&self, label: &Label) -> Vec<Plaintext> {
        self.messages
            .lock()
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| m.labels.iter().any(|l| l.id == label.id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn find_by_ack_data(&self, ack_data: &[u8]) -> Option<Plaintext> {
        let messages = self.messages.lock().ok()?;
        messages
            .iter()
            .find(|m| m.ack_data.as_deref() == Some(ack_data))
            .cloned()
    }

    fn save(&self, message: &mut Plaintext) -> Result<()> {
        let mut messages = self.messages.lock().map_err(|_| poisoned())?;
        if message.id.is_none() {
            let mut next_id = self.next_id.lock().map_err(|_| poisoned())?;
            message.id = Some(*next_id);
            *next_id += 1;
        }
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => messages.push(message.clone()),
        }
        Ok(())
    }

    fn remove(&self, message: &Plaintext) -> Result<()> {
        let mut messages = self.messages.lock().map_err(|_| poisoned())?;
        messages.retain(|m| m.id != message.id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryPowRepository
// ---------------------------------------------------------------------------

/// Pending proof-of-work queue over a hash map.
#[derive(Default)]
pub struct MemoryPowRepository {
    items: Mutex<HashMap<[u8; 64], PowItem>>,
}

impl MemoryPowRepository {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProofOfWorkRepository for MemoryPowRepository {
    fn put_item(&self, initial_hash: [u8; 64], item: &PowItem) -> Result<()> {
        let mut items = self.items.lock().map_err(|_| poisoned())?;
        items.insert(initial_hash, item.clone());
        Ok(())
    }

    fn items(&self) -> Vec<([u8; 64], PowItem)> {
        self.items
            .lock()
            .map(|items| items.iter().map(|(k, v)| (*k, v.clone())).collect())
            .unwrap_or_default()
    }

    fn remove_item(&self, initial_hash: &[u8; 64]) -> Result<()> {
        let mut items = self.items.lock().map_err(|_| poisoned())?;
        items.remove(initial_hash);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
