//! Listener lifecycle, outbound dials, and one-shot operations.
//!
//! [`TcpNetworkHandler`] owns the accept loop and the set of live
//! connections. The node layer starts it with its
//! [`NetworkEnvironment`], offers freshly stamped objects through it,
//! and may run a bounded [`TcpNetworkHandler::synchronize`] against a
//! single trusted peer instead of listening.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use bitmsg_protocol::wire::{
    parse_frame_header, verify_checksum, write_frame, CustomMessage, NetworkPayload,
    HEADER_LENGTH,
};
use bitmsg_types::config::NetworkParameters;
use bitmsg_types::{BmError, InventoryVector, Result};

use crate::connection::{run_connection, ConnectionMode, Registry};
use crate::environment::NetworkEnvironment;

type TaskList = Arc<Mutex<Vec<JoinHandle<()>>>>;

// ---------------------------------------------------------------------------
// TcpNetworkHandler
// ---------------------------------------------------------------------------

/// The gossip layer's front door.
pub struct TcpNetworkHandler {
    params: NetworkParameters,
    registry: Arc<Registry>,
    running: AtomicBool,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    connection_tasks: TaskList,
    local_port: Mutex<Option<u16>>,
}

fn track(tasks: &TaskList, task: JoinHandle<()>) {
    if let Ok(mut tasks) = tasks.lock() {
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }
}

impl TcpNetworkHandler {
    /// Creates a stopped handler.
    pub fn new(params: NetworkParameters) -> Self {
        Self {
            params,
            registry: Arc::new(Registry::new()),
            running: AtomicBool::new(false),
            listener_task: Mutex::new(None),
            connection_tasks: Arc::new(Mutex::new(Vec::new())),
            local_port: Mutex::new(None),
        }
    }

    /// Binds the listener and starts accepting peers.
    ///
    /// Returns the actually bound port (useful when the configured
    /// port is 0).
    ///
    /// # Errors
    ///
    /// [`BmError::Io`] if the bind fails or the handler is already
    /// running.
    pub async fn start(&self, env: Arc<dyn NetworkEnvironment>) -> Result<u16> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BmError::Io {
                reason: "network handler already running".into(),
            });
        }
        let listener = TcpListener::bind(("0.0.0.0", self.params.port)).await?;
        let port = listener.local_addr()?.port();
        if let Ok(mut local_port) = self.local_port.lock() {
            *local_port = Some(port);
        }
        tracing::info!(port, "listening");

        let registry = Arc::clone(&self.registry);
        let tasks = Arc::clone(&self.connection_tasks);
        let params = self.params.clone();
        let task = tokio::spawn(async move {
            loop {
                let (socket, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                if registry.count() >= params.connection_limit {
                    tracing::debug!(%peer, "connection limit reached, rejecting");
                    drop(socket);
                    continue;
                }
                tracing::debug!(%peer, "inbound connection");
                let connection = tokio::spawn(run_connection(
                    socket,
                    ConnectionMode::Server,
                    Arc::clone(&env),
                    params.clone(),
                    Arc::clone(&registry),
                ));
                track(&tasks, connection);
            }
        });
        if let Ok(mut listener_task) = self.listener_task.lock() {
            *listener_task = Some(task);
        }
        Ok(port)
    }

    /// Dials a peer and keeps the connection in the gossip pool.
    ///
    /// # Errors
    ///
    /// [`BmError::Io`] if the dial fails.
    pub async fn connect(
        &self,
        env: Arc<dyn NetworkEnvironment>,
        host: &str,
        port: u16,
    ) -> Result<()> {
        let socket = TcpStream::connect((host, port)).await?;
        let connection = tokio::spawn(run_connection(
            socket,
            ConnectionMode::Client,
            env,
            self.params.clone(),
            Arc::clone(&self.registry),
        ));
        track(&self.connection_tasks, connection);
        Ok(())
    }

    /// Advertises one inventory vector to up to 8 random active
    /// connections.
    pub fn offer(&self, iv: InventoryVector) {
        self.registry.offer(None, iv);
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.registry.count()
    }

    /// The port the listener actually bound, once started.
    pub fn local_port(&self) -> Option<u16> {
        self.local_port.lock().ok().and_then(|p| *p)
    }

    /// Connects to one peer, completes the handshake, exchanges
    /// inventories, and returns when the exchange is exhausted or the
    /// timeout elapses — whichever comes first.
    ///
    /// # Errors
    ///
    /// [`BmError::Io`] if the dial fails. A timeout is a normal
    /// completion, not an error.
    pub async fn synchronize(
        &self,
        env: Arc<dyn NetworkEnvironment>,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<()> {
        let socket = TcpStream::connect((host, port)).await?;
        let run = run_connection(
            socket,
            ConnectionMode::Sync,
            env,
            self.params.clone(),
            Arc::clone(&self.registry),
        );
        if tokio::time::timeout(timeout, run).await.is_err() {
            tracing::debug!(host, port, "synchronization timed out");
        }
        Ok(())
    }

    /// Sends an application-defined request to a peer and waits for
    /// the reply, outside of any handshake.
    ///
    /// # Errors
    ///
    /// [`BmError::Io`] on dial or socket failure,
    /// [`BmError::MalformedWire`] on a bad reply frame,
    /// [`BmError::Decode`] if the reply is not a custom message,
    /// [`BmError::Cancelled`] on timeout.
    pub async fn send_custom(
        &self,
        host: &str,
        port: u16,
        request: CustomMessage,
        timeout: Duration,
    ) -> Result<CustomMessage> {
        let exchange = async {
            let mut socket = TcpStream::connect((host, port)).await?;
            let mut frame = Vec::new();
            write_frame(&mut frame, &NetworkPayload::Custom(request));
            tokio::io::AsyncWriteExt::write_all(&mut socket, &frame).await?;

            let mut header_bytes = [0u8; HEADER_LENGTH];
            socket.read_exact(&mut header_bytes).await?;
            let header = parse_frame_header(&header_bytes)?;
            let mut payload = vec![0u8; header.length];
            socket.read_exact(&mut payload).await?;
            verify_checksum(&header, &payload)?;
            match NetworkPayload::parse(&header.command, &payload)? {
                NetworkPayload::Custom(response) => Ok(response),
                other => Err(BmError::Decode {
                    reason: format!("expected custom reply, got {:?}", other),
                }),
            }
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| BmError::Cancelled)?
    }

    /// Stops the listener and tears down every connection.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Ok(mut listener_task) = self.listener_task.lock() {
            if let Some(task) = listener_task.take() {
                task.abort();
            }
        }
        if let Ok(mut tasks) = self.connection_tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        tracing::info!("network handler stopped");
    }
}

impl Drop for TcpNetworkHandler {
    fn drop(&mut self) {
        self.stop();
    }
}
