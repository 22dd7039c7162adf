//! Collaborator wiring and outbound operations.
//!
//! [`Context`] threads every port explicitly — no hidden process-wide
//! state. The only global coordination anywhere in the workspace is
//! the proof-of-work admission semaphore inside the engine, which
//! guards a genuine resource limit.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use bitmsg_crypto::random::random_nonce;
use bitmsg_protocol::address::BitmessageAddress;
use bitmsg_protocol::object::ObjectMessage;
use bitmsg_protocol::plaintext::{Plaintext, PlaintextKind};
use bitmsg_protocol::unix_time_now;
use bitmsg_types::config::NetworkParameters;
use bitmsg_types::{BmError, MessageStatus, Result};

use crate::ports::{
    AddressRepository, CustomCommandHandler, Inventory, MessageCallback, MessageListener,
    MessageRepository, NetworkPort, NodeRegistry, ProofOfWorkRepository,
};
use crate::pow_service::ProofOfWorkService;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything the pipeline needs, injected once at construction.
pub struct Context {
    /// Object storage.
    pub inventory: Arc<dyn Inventory>,
    /// Known peers.
    pub node_registry: Arc<dyn NodeRegistry>,
    /// Identities, contacts, subscriptions.
    pub addresses: Arc<dyn AddressRepository>,
    /// Plaintext storage.
    pub messages: Arc<dyn MessageRepository>,
    /// Pending proof-of-work persistence.
    pub pow_repository: Arc<dyn ProofOfWorkRepository>,
    /// Application delivery callback.
    pub listener: Arc<dyn MessageListener>,
    /// Outbound progress callback.
    pub callback: Arc<dyn MessageCallback>,
    /// Application-defined frame handler.
    pub custom_handler: Arc<dyn CustomCommandHandler>,
    /// The gossip layer.
    pub network: Arc<dyn NetworkPort>,
    /// Operational parameters.
    pub params: NetworkParameters,
    /// The proof-of-work queue and engine.
    pub pow: ProofOfWorkService,

    client_nonce: u64,
    streams: Mutex<BTreeSet<u64>>,
    pubkey_sent: Mutex<HashMap<String, i64>>,
}

impl Context {
    /// Wires a context. The stream set is seeded from stored
    /// identities and subscriptions, falling back to stream 1.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inventory: Arc<dyn Inventory>,
        node_registry: Arc<dyn NodeRegistry>,
        addresses: Arc<dyn AddressRepository>,
        messages: Arc<dyn MessageRepository>,
        pow_repository: Arc<dyn ProofOfWorkRepository>,
        listener: Arc<dyn MessageListener>,
        callback: Arc<dyn MessageCallback>,
        custom_handler: Arc<dyn CustomCommandHandler>,
        network: Arc<dyn NetworkPort>,
        params: NetworkParameters,
    ) -> Self {
        let mut streams = BTreeSet::new();
        for address in addresses.identities() {
            streams.insert(address.stream());
        }
        for address in addresses.subscriptions() {
            streams.insert(address.stream());
        }
        if streams.is_empty() {
            streams.insert(1);
        }
        Self {
            inventory,
            node_registry,
            addresses,
            messages,
            pow_repository,
            listener,
            callback,
            custom_handler,
            network,
            params,
            pow: ProofOfWorkService::new(),
            client_nonce: random_nonce(),
            streams: Mutex::new(streams),
            pubkey_sent: Mutex::new(HashMap::new()),
        }
    }

    /// The per-process random nonce used in version handshakes.
    pub fn client_nonce(&self) -> u64 {
        self.client_nonce
    }

    /// Streams this node subscribes to.
    pub fn streams(&self) -> Vec<u64> {
        self.streams
            .lock()
            .map(|streams| streams.iter().copied().collect())
            .unwrap_or_else(|_| vec![1])
    }

    /// Subscribes to a stream, e.g. when a new identity is created.
    pub fn add_stream(&self, stream: u64) {
        if let Ok(mut streams) = self.streams.lock() {
            streams.insert(stream);
        }
    }

    // -----------------------------------------------------------------
    // Outbound operations
    // -----------------------------------------------------------------

    /// Entry point for sending a msg: either the recipient's pubkey is
    /// known and the message goes straight to proof of work, or a
    /// `getpubkey` is flooded and the message waits in
    /// `PubkeyRequested`.
    pub async fn send(&self, mut plaintext: Plaintext) -> Result<()> {
        if plaintext.kind != PlaintextKind::Msg {
            return self.broadcast(plaintext).await;
        }
        let to = plaintext.to.clone().ok_or_else(|| BmError::Crypto {
            reason: "msg has no recipient".into(),
        })?;
        // The repository may know more about the recipient than the
        // caller's copy, in particular its pubkey.
        let to = self.addresses.get_address(to.as_str()).unwrap_or(to);
        if to.pubkey().is_none() {
            tracing::info!(recipient = %to, "pubkey unknown, requesting");
            plaintext.status = MessageStatus::PubkeyRequested;
            self.messages.save(&mut plaintext)?;
            self.addresses.save(&to)?;
            self.request_pubkey(&to).await
        } else {
            plaintext.to = Some(to);
            self.send_msg(plaintext).await
        }
    }

    /// Signs, encrypts, stamps, stores, and floods a msg whose
    /// recipient pubkey is known, walking the status machine from
    /// `DoingProofOfWork` to `Sent`.
    pub async fn send_msg(&self, mut plaintext: Plaintext) -> Result<()> {
        let to = plaintext.to.clone().ok_or_else(|| BmError::Crypto {
            reason: "msg has no recipient".into(),
        })?;
        let pubkey = to.pubkey().ok_or_else(|| BmError::Crypto {
            reason: "recipient pubkey unknown".into(),
        })?;
        // The recipient may demand more work than the network minimum,
        // never less.
        let nonce_trials = pubkey
            .nonce_trials_per_byte()
            .max(self.params.nonce_trials_per_byte);
        let extra_bytes = pubkey.extra_bytes().max(self.params.extra_bytes);

        plaintext.status = MessageStatus::DoingProofOfWork;
        self.messages.save(&mut plaintext)?;
        self.callback.proof_of_work_started(Some(&plaintext));

        let expires = unix_time_now() + self.params.msg_ttl_secs as i64;
        let object = ObjectMessage::msg(&mut plaintext, expires)?;
        // The signature is now part of the plaintext.
        self.messages.save(&mut plaintext)?;

        let stamped = self
            .pow
            .do_proof_of_work(self, object, nonce_trials, extra_bytes)
            .await?;
        self.callback.proof_of_work_completed(Some(&plaintext));

        plaintext.status = MessageStatus::Sent;
        plaintext.iv = Some(stamped.inventory_vector());
        self.messages.save(&mut plaintext)?;
        self.callback
            .message_offered(Some(&plaintext), stamped.inventory_vector());
        Ok(())
    }

    /// Signs, encrypts, stamps, stores, and floods a broadcast. No
    /// pubkey lookup: the encryption key is derived from the sender's
    /// own address.
    pub async fn broadcast(&self, mut plaintext: Plaintext) -> Result<()> {
        plaintext.status = MessageStatus::DoingProofOfWork;
        self.messages.save(&mut plaintext)?;
        self.callback.proof_of_work_started(Some(&plaintext));

        let expires = unix_time_now() + self.params.msg_ttl_secs as i64;
        let object = ObjectMessage::broadcast(&mut plaintext, expires)?;
        self.messages.save(&mut plaintext)?;

        let stamped = self
            .pow
            .do_proof_of_work(
                self,
                object,
                self.params.nonce_trials_per_byte,
                self.params.extra_bytes,
            )
            .await?;
        self.callback.proof_of_work_completed(Some(&plaintext));

        plaintext.status = MessageStatus::Sent;
        plaintext.iv = Some(stamped.inventory_vector());
        self.messages.save(&mut plaintext)?;
        self.callback
            .message_offered(Some(&plaintext), stamped.inventory_vector());
        Ok(())
    }

    /// Publishes an identity's pubkey on the given stream, unless the
    /// same identity's pubkey already went out within the pubkey TTL.
    pub async fn send_pubkey(
        &self,
        identity: &BitmessageAddress,
        target_stream: u64,
    ) -> Result<()> {
        let now = unix_time_now();
        if let Ok(mut sent) = self.pubkey_sent.lock() {
            if let Some(&last) = sent.get(identity.as_str()) {
                if now - last < self.params.pubkey_ttl_secs as i64 {
                    tracing::debug!(
                        identity = %identity,
                        "pubkey already sent recently, not repeating"
                    );
                    return Ok(());
                }
            }
            sent.insert(identity.as_str().to_owned(), now);
        }

        let expires = now + self.params.pubkey_ttl_secs as i64;
        let object = ObjectMessage::pubkey(identity, target_stream, expires)?;
        self.callback.proof_of_work_started(None);
        self.pow
            .do_proof_of_work(
                self,
                object,
                self.params.nonce_trials_per_byte,
                self.params.extra_bytes,
            )
            .await?;
        tracing::info!(identity = %identity, stream = target_stream, "pubkey published");
        Ok(())
    }

    /// Floods a `getpubkey` request for a contact.
    pub async fn request_pubkey(&self, contact: &BitmessageAddress) -> Result<()> {
        let expires = unix_time_now() + self.params.pubkey_ttl_secs as i64;
        let object = ObjectMessage::getpubkey(contact, expires);
        self.callback.proof_of_work_started(None);
        self.pow
            .do_proof_of_work(
                self,
                object,
                self.params.nonce_trials_per_byte,
                self.params.extra_bytes,
            )
            .await?;
        tracing::info!(contact = %contact, "pubkey requested");
        Ok(())
    }
}
