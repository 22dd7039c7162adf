//! The per-connection protocol state machine.
//!
//! Every connection progresses through
//!
//! ```text
//! Connecting → VersionSent → Verified → Active → Disconnected
//! ```
//!
//! A `version` is rejected — and the peer dropped — for our own nonce
//! (self-connect), a protocol below 3, no shared stream, or a clock
//! skew above one hour. After both sides have exchanged `verack` the
//! connection is active: peers and inventory are advertised, `getdata`
//! is served, and incoming objects are validated, stored, dispatched,
//! and flooded onward.
//!
//! Framing violations and proof-of-work failures disconnect the peer;
//! unparseable payloads are logged and skipped; objects that are
//! merely expired, foreign-stream, or already known are dropped
//! silently.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use bitmsg_protocol::object::ObjectMessage;
use bitmsg_protocol::pow::check_proof_of_work;
use bitmsg_protocol::unix_time_now;
use bitmsg_protocol::wire::{
    parse_frame_header, verify_checksum, write_frame, NetworkAddress, NetworkPayload,
    VersionPayload, HEADER_LENGTH, MAX_INV_ENTRIES, PROTOCOL_VERSION, SERVICE_NODE_NETWORK,
};
use bitmsg_types::config::{NetworkParameters, DAY, HOUR};
use bitmsg_types::{BmError, InventoryVector, Result};

use crate::environment::NetworkEnvironment;

/// Maximum tolerated clock skew in the version handshake.
const MAX_CLOCK_SKEW_SECS: i64 = 3600;

/// Objects expired longer than this are rejected.
const EXPIRY_GRACE_SECS: i64 = 3 * HOUR as i64;

/// Objects claiming to live longer than the longest legitimate TTL
/// plus grace are rejected as far-future.
const MAX_FUTURE_SECS: i64 = 28 * DAY as i64 + 3 * HOUR as i64 + 300;

/// A fresh object is offered to at most this many other connections.
const FLOOD_FANOUT: usize = 8;

/// Checks an object's expiry against the acceptance window.
///
/// An object expired for longer than the grace period is
/// [`BmError::Expired`]; one claiming to outlive the longest
/// legitimate TTL plus skew allowance is [`BmError::FarFuture`]. Both
/// are dropped silently by the caller.
pub fn check_expiry(expires_time: i64, now: i64) -> Result<()> {
    if expires_time <= now - EXPIRY_GRACE_SECS {
        return Err(BmError::Expired { expires_time });
    }
    if expires_time > now + MAX_FUTURE_SECS {
        return Err(BmError::FarFuture { expires_time });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ConnectionMode / ConnectionState
// ---------------------------------------------------------------------------

/// How a connection came to exist, which decides who speaks first and
/// when it ends.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionMode {
    /// Accepted by our listener; the peer sends `version` first.
    Server,
    /// Dialed by us; we send `version` first and stay connected.
    Client,
    /// Dialed by us for a one-shot synchronization; disconnects once
    /// both inventories are exchanged.
    Sync,
}

/// Protocol phase of a connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// Socket is up, nothing exchanged yet.
    Connecting,
    /// Our `version` is out.
    VersionSent,
    /// The peer's `version` passed validation.
    Verified,
    /// Both sides acknowledged; gossip is flowing.
    Active,
    /// Torn down.
    Disconnected,
}

/// What the handler should do after processing one frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Flow {
    Continue,
    Disconnect,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Shared view of all live connections, used for flooding.
pub struct Registry {
    connections: Mutex<Vec<ConnectionHandle>>,
    next_id: AtomicU64,
}

/// A live connection's writer channel plus its activity flag.
#[derive(Clone)]
struct ConnectionHandle {
    id: u64,
    tx: mpsc::UnboundedSender<NetworkPayload>,
    active: Arc<AtomicBool>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.connections.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn register(&self, tx: mpsc::UnboundedSender<NetworkPayload>, active: Arc<AtomicBool>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut connections) = self.connections.lock() {
            connections.push(ConnectionHandle { id, tx, active });
        }
        id
    }

    fn deregister(&self, id: u64) {
        if let Ok(mut connections) = self.connections.lock() {
            connections.retain(|c| c.id != id);
        }
    }

    /// Advertises one inventory vector to up to [`FLOOD_FANOUT`] random
    /// active connections, excluding the one it arrived on.
    pub fn offer(&self, exclude: Option<u64>, iv: InventoryVector) {
        let Ok(connections) = self.connections.lock() else {
            return;
        };
        let mut eligible: Vec<&ConnectionHandle> = connections
            .iter()
            .filter(|c| c.active.load(Ordering::Relaxed) && Some(c.id) != exclude)
            .collect();
        eligible.shuffle(&mut rand::thread_rng());
        for handle in eligible.into_iter().take(FLOOD_FANOUT) {
            let _ = handle.tx.send(NetworkPayload::Inv(vec![iv]));
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Frame I/O
// ---------------------------------------------------------------------------

async fn read_frame(reader: &mut OwnedReadHalf) -> Result<NetworkPayload> {
    let mut header_bytes = [0u8; HEADER_LENGTH];
    reader.read_exact(&mut header_bytes).await?;
    let header = parse_frame_header(&header_bytes)?;
    let mut payload = vec![0u8; header.length];
    reader.read_exact(&mut payload).await?;
    verify_checksum(&header, &payload)?;
    NetworkPayload::parse(&header.command, &payload)
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<NetworkPayload>,
) {
    while let Some(payload) = rx.recv().await {
        let mut frame = Vec::new();
        write_frame(&mut frame, &payload);
        if writer.write_all(&frame).await.is_err() {
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Runs one connection to completion. Registered for flooding while
/// alive; deregistered on any exit path.
pub async fn run_connection(
    stream: TcpStream,
    mode: ConnectionMode,
    env: Arc<dyn NetworkEnvironment>,
    params: NetworkParameters,
    registry: Arc<Registry>,
) {
    let peer_addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::debug!(error = %e, "connection lost before start");
            return;
        }
    };
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let active = Arc::new(AtomicBool::new(false));
    let id = registry.register(tx.clone(), active.clone());
    let writer = tokio::spawn(write_loop(write_half, rx));
    // Deregisters even when this future is cancelled (sync timeout,
    // handler shutdown).
    let teardown = Teardown {
        registry: Arc::clone(&registry),
        id,
        writer: Some(writer),
    };

    let connection = Connection {
        mode,
        env,
        params,
        registry: registry.clone(),
        id,
        tx,
        active,
        peer_addr,
        state: ConnectionState::Connecting,
        verack_sent: false,
        verack_received: false,
        common_streams: Vec::new(),
        requested: HashSet::new(),
        peer_inv_received: false,
    };

    match connection.read_loop(read_half).await {
        Ok(()) => tracing::debug!(peer = %peer_addr, "connection closed"),
        Err(e) => tracing::debug!(peer = %peer_addr, error = %e, "connection dropped"),
    }
    teardown.finish().await;
}

struct Teardown {
    registry: Arc<Registry>,
    id: u64,
    writer: Option<tokio::task::JoinHandle<()>>,
}

impl Teardown {
    /// Normal exit: let the writer drain its queue before the socket
    /// goes away. The connection's own sender is already dropped at
    /// this point, so deregistering releases the last one and the
    /// writer ends after flushing.
    async fn finish(mut self) {
        self.registry.deregister(self.id);
        if let Some(writer) = self.writer.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), writer).await;
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

struct Connection {
    mode: ConnectionMode,
    env: Arc<dyn NetworkEnvironment>,
    params: NetworkParameters,
    registry: Arc<Registry>,
    id: u64,
    tx: mpsc::UnboundedSender<NetworkPayload>,
    active: Arc<AtomicBool>,
    peer_addr: SocketAddr,
    state: ConnectionState,
    verack_sent: bool,
    verack_received: bool,
    common_streams: Vec<u64>,
    requested: HashSet<InventoryVector>,
    peer_inv_received: bool,
}

impl Connection {
    async fn read_loop(mut self, mut reader: OwnedReadHalf) -> Result<()> {
        if matches!(self.mode, ConnectionMode::Client | ConnectionMode::Sync) {
            self.send_version();
        }
        let idle = Duration::from_secs(self.params.connection_ttl_secs);
        loop {
            let payload = match tokio::time::timeout(idle, read_frame(&mut reader)).await {
                Err(_) => {
                    tracing::debug!(peer = %self.peer_addr, "idle timeout");
                    break;
                }
                Ok(Err(e @ BmError::Decode { .. })) => {
                    // Well-framed garbage: skip the frame, keep the peer.
                    tracing::warn!(peer = %self.peer_addr, error = %e, "unparseable frame");
                    continue;
                }
                Ok(Err(e)) => {
                    self.state = ConnectionState::Disconnected;
                    return Err(e);
                }
                Ok(Ok(payload)) => payload,
            };
            if self.handle(payload) == Flow::Disconnect {
                break;
            }
            if self.mode == ConnectionMode::Sync && self.sync_finished() {
                tracing::debug!(peer = %self.peer_addr, "synchronization complete");
                break;
            }
        }
        self.state = ConnectionState::Disconnected;
        self.active.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn send(&self, payload: NetworkPayload) {
        let _ = self.tx.send(payload);
    }

    fn send_version(&mut self) {
        let version = VersionPayload {
            protocol_version: PROTOCOL_VERSION,
            services: SERVICE_NODE_NETWORK,
            timestamp: unix_time_now(),
            addr_recv: NetworkAddress::from_socket_addr(self.peer_addr, 0, 0),
            addr_from: NetworkAddress {
                time: 0,
                stream: 0,
                services: SERVICE_NODE_NETWORK,
                ip: [0u8; 16],
                port: self.params.port,
            },
            nonce: self.env.client_nonce(),
            user_agent: self.params.user_agent.clone(),
            streams: self.env.streams(),
        };
        self.send(NetworkPayload::Version(version));
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::VersionSent;
        }
    }

    fn handle(&mut self, payload: NetworkPayload) -> Flow {
        match payload {
            NetworkPayload::Version(version) => self.handle_version(version),
            NetworkPayload::Verack => {
                self.verack_received = true;
                self.maybe_activate();
                Flow::Continue
            }
            NetworkPayload::Addr(entries) => {
                if self.state == ConnectionState::Active {
                    self.env.offer_peers(entries);
                }
                Flow::Continue
            }
            NetworkPayload::Inv(ivs) => {
                if self.state == ConnectionState::Active {
                    self.handle_inv(ivs);
                }
                Flow::Continue
            }
            NetworkPayload::GetData(ivs) => {
                if self.state == ConnectionState::Active {
                    for iv in ivs {
                        if let Some(object) = self.env.get_object(&iv) {
                            self.send(NetworkPayload::Object(object));
                        }
                    }
                }
                Flow::Continue
            }
            NetworkPayload::Object(object) => self.handle_object(object),
            NetworkPayload::Custom(request) => {
                match self.env.custom_response(request) {
                    Some(response) => self.send(NetworkPayload::Custom(response)),
                    None => tracing::debug!(peer = %self.peer_addr, "unhandled custom command"),
                }
                Flow::Continue
            }
        }
    }

    fn handle_version(&mut self, version: VersionPayload) -> Flow {
        if version.nonce == self.env.client_nonce() {
            tracing::debug!(peer = %self.peer_addr, "connected to self, dropping");
            return Flow::Disconnect;
        }
        if version.protocol_version < PROTOCOL_VERSION {
            tracing::debug!(
                peer = %self.peer_addr,
                protocol = version.protocol_version,
                "peer protocol too old"
            );
            return Flow::Disconnect;
        }
        let ours = self.env.streams();
        let common: Vec<u64> = version
            .streams
            .iter()
            .copied()
            .filter(|s| ours.contains(s))
            .collect();
        if common.is_empty() {
            tracing::debug!(peer = %self.peer_addr, "no shared stream");
            return Flow::Disconnect;
        }
        let skew = unix_time_now() - version.timestamp;
        if skew.abs() > MAX_CLOCK_SKEW_SECS {
            tracing::warn!(peer = %self.peer_addr, skew, "peer clock too far off");
            return Flow::Disconnect;
        }

        self.common_streams = common;
        if self.mode == ConnectionMode::Server && self.state == ConnectionState::Connecting {
            self.send_version();
        }
        self.send(NetworkPayload::Verack);
        self.verack_sent = true;
        self.state = ConnectionState::Verified;
        tracing::debug!(
            peer = %self.peer_addr,
            agent = %version.user_agent,
            "handshake verified"
        );
        self.maybe_activate();
        Flow::Continue
    }

    fn maybe_activate(&mut self) {
        if self.state != ConnectionState::Verified || !self.verack_received || !self.verack_sent {
            return;
        }
        self.state = ConnectionState::Active;
        self.active.store(true, Ordering::Relaxed);
        tracing::info!(peer = %self.peer_addr, streams = ?self.common_streams, "connection active");

        let peers = self.env.known_peers(1000, &self.common_streams);
        if !peers.is_empty() {
            self.send(NetworkPayload::Addr(peers));
        }
        // Advertise everything we hold, even if that is nothing: an
        // empty inv lets a synchronizing peer finish immediately.
        let inventory = self.env.inventory(&self.common_streams);
        for chunk in inventory.chunks(MAX_INV_ENTRIES) {
            self.send(NetworkPayload::Inv(chunk.to_vec()));
        }
        if inventory.is_empty() {
            self.send(NetworkPayload::Inv(Vec::new()));
        }
    }

    fn handle_inv(&mut self, ivs: Vec<InventoryVector>) {
        self.peer_inv_received = true;
        let wanted: Vec<InventoryVector> = self
            .env
            .missing(&ivs)
            .into_iter()
            .filter(|iv| !self.requested.contains(iv))
            .collect();
        tracing::debug!(
            peer = %self.peer_addr,
            offered = ivs.len(),
            wanted = wanted.len(),
            "inventory advertised"
        );
        if wanted.is_empty() {
            return;
        }
        self.requested.extend(wanted.iter().copied());
        self.send(NetworkPayload::GetData(wanted));
    }

    fn handle_object(&mut self, object: ObjectMessage) -> Flow {
        let iv = object.inventory_vector();
        if !self.requested.remove(&iv) {
            tracing::debug!(peer = %self.peer_addr, %iv, "unsolicited object");
        }
        if !self.env.streams().contains(&object.stream) {
            return Flow::Continue;
        }
        let now = unix_time_now();
        if check_expiry(object.expires_time, now).is_err() {
            return Flow::Continue;
        }
        if let Err(e) = check_proof_of_work(
            &object,
            now,
            self.params.nonce_trials_per_byte,
            self.params.extra_bytes,
        ) {
            tracing::warn!(peer = %self.peer_addr, %iv, error = %e, "object failed proof of work");
            return Flow::Disconnect;
        }

        match self.env.store_object(&object) {
            Ok(true) => {
                tracing::debug!(peer = %self.peer_addr, %iv, "object stored");
                self.registry.offer(Some(self.id), iv);
                self.env.receive_object(object);
            }
            Ok(false) => {
                // Lost a concurrent race or a duplicate advertisement;
                // either way somebody else already dispatched it.
            }
            Err(e) => {
                tracing::warn!(%iv, error = %e, "failed to store object");
            }
        }
        Flow::Continue
    }

    fn sync_finished(&self) -> bool {
        self.state == ConnectionState::Active && self.peer_inv_received && self.requested.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_window_boundaries() {
        let now = 1_700_000_000;
        // Exactly three hours past expiry is rejected.
        assert!(matches!(
            check_expiry(now - EXPIRY_GRACE_SECS, now),
            Err(BmError::Expired { .. })
        ));
        assert!(check_expiry(now - EXPIRY_GRACE_SECS + 1, now).is_ok());
        // A short while into the future is fine.
        assert!(check_expiry(now + 300, now).is_ok());
        // Beyond the longest legitimate lifetime is not.
        assert!(check_expiry(now + MAX_FUTURE_SECS, now).is_ok());
        assert!(matches!(
            check_expiry(now + MAX_FUTURE_SECS + 1, now),
            Err(BmError::FarFuture { .. })
        ));
    }

    #[test]
    fn registry_register_deregister() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.register(tx, Arc::new(AtomicBool::new(true)));
        assert_eq!(registry.count(), 1);
        registry.deregister(id);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn offer_skips_inactive_and_excluded() {
        let registry = Registry::new();
        let (active_tx, mut active_rx) = mpsc::unbounded_channel();
        let (inactive_tx, mut inactive_rx) = mpsc::unbounded_channel();
        let (excluded_tx, mut excluded_rx) = mpsc::unbounded_channel();

        let _ = registry.register(active_tx, Arc::new(AtomicBool::new(true)));
        let _ = registry.register(inactive_tx, Arc::new(AtomicBool::new(false)));
        let excluded = registry.register(excluded_tx, Arc::new(AtomicBool::new(true)));

        registry.offer(Some(excluded), InventoryVector::new([1u8; 32]));

        assert!(active_rx.try_recv().is_ok());
        assert!(inactive_rx.try_recv().is_err());
        assert!(excluded_rx.try_recv().is_err());
    }
}
