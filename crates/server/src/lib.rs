//! WebSocket server for Pigeon content clients.
//!
//! Accepts any number of client connections over WebSocket, dispatches
//! JSON and binary messages to a [`Handler`] trait, and manages each
//! connection's lifecycle (ping/pong, graceful shutdown).

mod connection;
mod handler;
mod server;

pub use connection::{ClientConnection, ClientMeta, SendError, Sender};
pub use handler::{Handler, HandlerFuture};
pub use server::{ContentServer, ServerConfig};

/// Per-connection send buffer capacity.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the content server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
