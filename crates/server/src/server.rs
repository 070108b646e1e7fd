//! Content WebSocket server.
//!
//! Listens on a TCP port, upgrades incoming connections to WebSocket and
//! serves any number of clients at once.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use pigeon_protocol::constants::WS_MAX_MESSAGE_SIZE;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::connection::{self, ClientConnection, ClientMeta, Sender};
use crate::handler::Handler;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Largest accepted text or binary message.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            max_message_size: WS_MAX_MESSAGE_SIZE,
        }
    }
}

/// The content WebSocket server.
///
/// Every accepted socket gets a fresh connection id; the provided
/// [`Handler`] sees it through [`Sender::connection_id`].
pub struct ContentServer<H: Handler> {
    config: ServerConfig,
    handler: Arc<H>,
    connections: Mutex<HashMap<u64, ClientConnection>>,
    next_connection_id: AtomicU64,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<H: Handler> ContentServer<H> {
    /// Creates a new server with the given handler.
    pub fn new(config: ServerConfig, handler: H) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler: Arc::new(handler),
            connections: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Number of live client connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Returns the sender for a connection, if it is still open.
    pub async fn sender(&self, connection_id: u64) -> Option<Sender> {
        self.connections
            .lock()
            .await
            .get(&connection_id)
            .map(|c| c.sender())
    }

    /// Closes one client connection.
    pub async fn disconnect(&self, connection_id: u64) {
        if let Some(conn) = self.connections.lock().await.get(&connection_id) {
            conn.close();
        }
    }

    /// Gracefully shuts down the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("content server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    for conn in self.connections.lock().await.values() {
                        conn.close();
                    }
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Upgrades one TCP connection and serves it until it closes.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);
        ws_config.max_frame_size = Some(self.config.max_message_size);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        tracing::info!(%peer_addr, connection = connection_id, "WebSocket connection established");

        let meta = ClientMeta {
            connection_id,
            remote_addr: peer_addr.to_string(),
        };

        let (conn, reader) = connection::spawn_connection(
            ws_stream,
            meta,
            Arc::clone(&self.handler),
            self.config.max_message_size,
            self.cancel.clone(),
        );
        self.connections.lock().await.insert(connection_id, conn);

        if let Err(e) = reader.await {
            tracing::error!(connection = connection_id, "read pump task failed: {e}");
        }
        self.connections.lock().await.remove(&connection_id);
        Ok(())
    }
}
