//! The public node facade.
//!
//! [`Node`] bundles a [`Context`] with an optional TCP gossip layer.
//! Ports default to the in-memory implementations; embedders swap in
//! their own through the builder.

use std::sync::Arc;
use std::time::Duration;

use bitmsg_network::environment::NetworkEnvironment;
use bitmsg_network::handler::TcpNetworkHandler;
use bitmsg_protocol::address::BitmessageAddress;
use bitmsg_protocol::object::ObjectMessage;
use bitmsg_protocol::plaintext::Plaintext;
use bitmsg_protocol::privkey::PrivateKey;
use bitmsg_protocol::unix_time_now;
use bitmsg_protocol::wire::{CustomMessage, NetworkAddress};
use bitmsg_types::config::NetworkParameters;
use bitmsg_types::{BmError, InventoryVector, Result};

use crate::context::Context;
use crate::dispatch;
use crate::memory::{
    MemoryAddressRepository, MemoryInventory, MemoryMessageRepository, MemoryNodeRegistry,
    MemoryPowRepository,
};
use crate::ports::{
    AddressRepository, CustomCommandHandler, Inventory, MessageCallback, MessageListener,
    MessageRepository, NetworkPort, NodeRegistry, NullPorts, ProofOfWorkRepository,
};
use crate::pow_service::ProofOfWorkService;

// ---------------------------------------------------------------------------
// NetworkPort for the TCP handler
// ---------------------------------------------------------------------------

impl NetworkPort for TcpNetworkHandler {
    fn offer(&self, iv: InventoryVector) {
        TcpNetworkHandler::offer(self, iv);
    }
}

// ---------------------------------------------------------------------------
// NodeEnvironment
// ---------------------------------------------------------------------------

/// Adapts a [`Context`] to what the gossip layer expects.
struct NodeEnvironment {
    ctx: Arc<Context>,
}

impl NetworkEnvironment for NodeEnvironment {
    fn streams(&self) -> Vec<u64> {
        self.ctx.streams()
    }

    fn client_nonce(&self) -> u64 {
        self.ctx.client_nonce()
    }

    fn inventory(&self, streams: &[u64]) -> Vec<bitmsg_types::InventoryVector> {
        self.ctx.inventory.inventory(streams)
    }

    fn get_object(&self, iv: &bitmsg_types::InventoryVector) -> Option<ObjectMessage> {
        self.ctx.inventory.get_object(iv)
    }

    fn store_object(&self, object: &ObjectMessage) -> Result<bool> {
        self.ctx.inventory.store_object(object)
    }

    fn known_peers(&self, limit: usize, streams: &[u64]) -> Vec<NetworkAddress> {
        self.ctx.node_registry.known_addresses(limit, streams)
    }

    fn offer_peers(&self, peers: Vec<NetworkAddress>) {
        self.ctx.node_registry.offer_addresses(peers);
    }

    fn receive_object(&self, object: ObjectMessage) {
        let ctx = Arc::clone(&self.ctx);
        tokio::spawn(async move {
            dispatch::receive_object(&ctx, object).await;
        });
    }

    fn custom_response(&self, request: CustomMessage) -> Option<CustomMessage> {
        self.ctx.custom_handler.handle(request)
    }
}

// ---------------------------------------------------------------------------
// NodeBuilder
// ---------------------------------------------------------------------------

/// Assembles a [`Node`], defaulting every port to its in-memory
/// implementation and the callbacks to no-ops.
pub struct NodeBuilder {
    params: NetworkParameters,
    inventory: Arc<dyn Inventory>,
    node_registry: Arc<dyn NodeRegistry>,
    addresses: Arc<dyn AddressRepository>,
    messages: Arc<dyn MessageRepository>,
    pow_repository: Arc<dyn ProofOfWorkRepository>,
    listener: Arc<dyn MessageListener>,
    callback: Arc<dyn MessageCallback>,
    custom_handler: Arc<dyn CustomCommandHandler>,
    networked: bool,
}

impl NodeBuilder {
    /// Starts from defaults: in-memory ports, no-op callbacks, TCP
    /// networking enabled.
    pub fn new(params: NetworkParameters) -> Self {
        Self {
            params,
            inventory: Arc::new(MemoryInventory::new()),
            node_registry: Arc::new(MemoryNodeRegistry::new()),
            addresses: Arc::new(MemoryAddressRepository::new()),
            messages: Arc::new(MemoryMessageRepository::new()),
            pow_repository: Arc::new(MemoryPowRepository::new()),
            listener: Arc::new(NullPorts),
            callback: Arc::new(NullPorts),
            custom_handler: Arc::new(NullPorts),
            networked: true,
        }
    }

    /// Swaps the inventory port.
    pub fn inventory(mut self, inventory: Arc<dyn Inventory>) -> Self {
        self.inventory = inventory;
        self
    }

    /// Swaps the peer registry port.
    pub fn node_registry(mut self, node_registry: Arc<dyn NodeRegistry>) -> Self {
        self.node_registry = node_registry;
        self
    }

    /// Swaps the address repository port.
    pub fn addresses(mut self, addresses: Arc<dyn AddressRepository>) -> Self {
        self.addresses = addresses;
        self
    }

    /// Swaps the message repository port.
    pub fn messages(mut self, messages: Arc<dyn MessageRepository>) -> Self {
        self.messages = messages;
        self
    }

    /// Swaps the proof-of-work queue port.
    pub fn pow_repository(mut self, pow_repository: Arc<dyn ProofOfWorkRepository>) -> Self {
        self.pow_repository = pow_repository;
        self
    }

    /// Sets the application delivery listener.
    pub fn listener(mut self, listener: Arc<dyn MessageListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Sets the outbound progress callback.
    pub fn callback(mut self, callback: Arc<dyn MessageCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Sets the handler for application-defined frames.
    pub fn custom_handler(mut self, custom_handler: Arc<dyn CustomCommandHandler>) -> Self {
        self.custom_handler = custom_handler;
        self
    }

    /// Disables the TCP gossip layer; offers become no-ops. Useful
    /// for tests and for embedders that drive dispatch directly.
    pub fn without_network(mut self) -> Self {
        self.networked = false;
        self
    }

    /// Wires everything together.
    pub fn build(self) -> Node {
        let handler = self
            .networked
            .then(|| Arc::new(TcpNetworkHandler::new(self.params.clone())));
        let network: Arc<dyn NetworkPort> = match &handler {
            Some(handler) => Arc::clone(handler) as Arc<dyn NetworkPort>,
            None => Arc::new(NullPorts),
        };
        let ctx = Arc::new(Context::new(
            self.inventory,
            self.node_registry,
            self.addresses,
            self.messages,
            self.pow_repository,
            self.listener,
            self.callback,
            self.custom_handler,
            network,
            self.params,
        ));
        Node {
            ctx,
            handler,
            maintenance: std::sync::Mutex::new(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// How often expired objects are evicted from the inventory.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// A running (or runnable) node.
pub struct Node {
    ctx: Arc<Context>,
    handler: Option<Arc<TcpNetworkHandler>>,
    maintenance: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Node {
    /// Builder with default ports.
    pub fn builder(params: NetworkParameters) -> NodeBuilder {
        NodeBuilder::new(params)
    }

    /// The wired context, for port implementations and tests.
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    fn environment(&self) -> Arc<dyn NetworkEnvironment> {
        Arc::new(NodeEnvironment {
            ctx: Arc::clone(&self.ctx),
        })
    }

    /// Starts the listener (when networking is enabled), resumes
    /// pending proof-of-work computations, and begins periodic
    /// inventory eviction.
    pub async fn startup(&self) -> Result<()> {
        if let Some(handler) = &self.handler {
            handler.start(self.environment()).await?;
        }
        ProofOfWorkService::resume(&self.ctx);

        let ctx = Arc::clone(&self.ctx);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match ctx.inventory.cleanup(unix_time_now()) {
                    Ok(0) => {}
                    Ok(evicted) => tracing::debug!(evicted, "expired objects evicted"),
                    Err(e) => tracing::warn!(error = %e, "inventory cleanup failed"),
                }
            }
        });
        if let Ok(mut maintenance) = self.maintenance.lock() {
            *maintenance = Some(task);
        }
        Ok(())
    }

    /// Cancels proof-of-work, stops maintenance, and tears the
    /// network down.
    pub async fn shutdown(&self) {
        self.ctx.pow.shutdown();
        if let Ok(mut maintenance) = self.maintenance.lock() {
            if let Some(task) = maintenance.take() {
                task.abort();
            }
        }
        if let Some(handler) = &self.handler {
            handler.stop();
        }
    }

    /// The actually bound listener port, once started.
    pub fn local_port(&self) -> Option<u16> {
        self.handler.as_ref().and_then(|h| h.local_port())
    }

    /// Dials a peer into the gossip pool.
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        let handler = self.handler.as_ref().ok_or_else(|| BmError::Io {
            reason: "node built without networking".into(),
        })?;
        handler.connect(self.environment(), host, port).await
    }

    /// One-shot inventory exchange with a trusted peer.
    pub async fn synchronize(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        let handler = self.handler.as_ref().ok_or_else(|| BmError::Io {
            reason: "node built without networking".into(),
        })?;
        handler
            .synchronize(self.environment(), host, port, timeout)
            .await
    }

    /// Creates and stores a fresh v4 identity on the given stream.
    pub fn create_identity(&self, stream: u64) -> Result<BitmessageAddress> {
        let key = PrivateKey::new_random(
            4,
            stream,
            self.ctx.params.nonce_trials_per_byte,
            self.ctx.params.extra_bytes,
        )?;
        let identity = BitmessageAddress::from_private_key(key)?;
        self.ctx.addresses.save(&identity)?;
        self.ctx.add_stream(stream);
        tracing::info!(identity = %identity, "identity created");
        Ok(identity)
    }

    /// Stores a contact known only by its address string.
    pub fn add_contact(&self, address: &str) -> Result<BitmessageAddress> {
        let contact: BitmessageAddress = address.parse()?;
        self.ctx.addresses.save(&contact)?;
        Ok(contact)
    }

    /// Subscribes to a sender's broadcasts.
    pub fn add_subscription(&self, address: &str) -> Result<BitmessageAddress> {
        let mut subscription: BitmessageAddress = address.parse()?;
        subscription.set_subscribed(true);
        self.ctx.addresses.save(&subscription)?;
        self.ctx.add_stream(subscription.stream());
        Ok(subscription)
    }

    /// Sends a msg from one of our identities.
    pub async fn send(&self, from: &str, to: &str, subject: &str, body: &str) -> Result<()> {
        let from = self
            .ctx
            .addresses
            .get_address(from)
            .filter(|a| a.is_identity())
            .ok_or_else(|| BmError::InvalidAddress {
                reason: format!("{from} is not one of our identities"),
            })?;
        let to = self
            .ctx
            .addresses
            .get_address(to)
            .map_or_else(|| to.parse(), Ok)?;
        let plaintext = Plaintext::msg(from, to, subject, body);
        self.ctx.send(plaintext).await
    }

    /// Sends a broadcast from one of our identities.
    pub async fn broadcast(&self, from: &str, subject: &str, body: &str) -> Result<()> {
        let from = self
            .ctx
            .addresses
            .get_address(from)
            .filter(|a| a.is_identity())
            .ok_or_else(|| BmError::InvalidAddress {
                reason: format!("{from} is not one of our identities"),
            })?;
        let plaintext = Plaintext::broadcast(from, subject, body);
        self.ctx.broadcast(plaintext).await
    }

    /// Evicts expired objects from the inventory.
    pub fn cleanup(&self) -> Result<usize> {
        self.ctx.inventory.cleanup(unix_time_now())
    }
}
