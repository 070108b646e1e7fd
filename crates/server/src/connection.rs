//! Client connection management: read/write pumps, ping/pong, send buffering.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use pigeon_protocol::binary::{BinaryMessage, parse_binary_message};
use pigeon_protocol::constants::{
    MessageType, WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_NOT_IMPLEMENTED, WS_PING_PERIOD,
    WS_PONG_WAIT,
};
use pigeon_protocol::envelope::Message;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::SEND_BUFFER_SIZE;
use crate::handler::Handler;

/// Metadata about a connected client.
#[derive(Debug, Clone)]
pub struct ClientMeta {
    pub connection_id: u64,
    pub remote_addr: String,
}

/// Handle for sending messages to one client.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    connection_id: u64,
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Connection this sender belongs to.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Sends a protocol [`Message`] as JSON text.
    ///
    /// Returns `Err` if the buffer is full or the client disconnected.
    pub fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg).map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!(connection = self.connection_id, "send buffer full or closed, dropping message");
            SendError
        })
    }

    /// Sends an error response for the given request message.
    pub fn send_error(&self, req: &Message, code: i32, message: &str) -> Result<(), SendError> {
        self.send_msg(req.reply_error(code, message))
    }

    /// Sends a raw binary frame.
    pub fn send_binary(&self, data: Vec<u8>) -> Result<(), SendError> {
        self.tx
            .try_send(WsMessage::Binary(data.into()))
            .map_err(|_| SendError)
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Active connection to a client.
///
/// Owns the read/write pump tasks and provides a [`Sender`] for
/// asynchronous message delivery.
pub struct ClientConnection {
    pub meta: ClientMeta,
    sender: Sender,
    cancel: CancellationToken,
}

impl ClientConnection {
    /// Returns a cloneable [`Sender`] for this connection.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Signals both pumps to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Runs the read and write pumps for a WebSocket connection.
///
/// Returns the [`ClientConnection`] handle and the read pump task, which
/// completes after [`Handler::on_disconnected`] has run.
pub fn spawn_connection<S, H>(
    ws_stream: S,
    meta: ClientMeta,
    handler: Arc<H>,
    max_message_size: usize,
    server_cancel: CancellationToken,
) -> (ClientConnection, JoinHandle<()>)
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender {
        connection_id: meta.connection_id,
        tx,
    };

    let conn = ClientConnection {
        meta: meta.clone(),
        sender: sender.clone(),
        cancel: cancel.clone(),
    };

    let (ws_sink, ws_stream) = ws_stream.split();

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    let read_cancel = cancel.clone();
    let reader = tokio::spawn(async move {
        handler.on_connected(sender.clone()).await;
        read_pump(
            ws_stream,
            sender.clone(),
            &handler,
            max_message_size,
            read_cancel.clone(),
        )
        .await;
        // When the read pump exits, stop the write pump too.
        read_cancel.cancel();
        handler.on_disconnected(sender).await;
        tracing::info!(connection = meta.connection_id, remote = %meta.remote_addr, "client disconnected");
    });

    (conn, reader)
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break, // Channel closed.
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: reads WS frames and dispatches to the handler.
async fn read_pump<S, H>(
    mut stream: S,
    sender: Sender,
    handler: &Arc<H>,
    max_message_size: usize,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let mut pong_deadline = tokio::time::interval(WS_PONG_WAIT);
    pong_deadline.reset();
    let mut got_pong = true;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = pong_deadline.tick() => {
                if !got_pong {
                    tracing::warn!(connection = sender.connection_id, "pong timeout, closing connection");
                    break;
                }
                got_pong = false;
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(ws_msg)) => {
                        // Any traffic proves the peer is alive.
                        got_pong = true;
                        match ws_msg {
                            WsMessage::Text(text) => {
                                if text.len() > max_message_size {
                                    tracing::error!("message exceeds max size ({} > {})", text.len(), max_message_size);
                                    continue;
                                }
                                dispatch_text(handler, &sender, &text).await;
                            }
                            WsMessage::Binary(data) => {
                                if data.len() > max_message_size {
                                    tracing::error!("binary message exceeds max size ({} > {})", data.len(), max_message_size);
                                    continue;
                                }
                                dispatch_binary(handler, &sender, &data).await;
                            }
                            WsMessage::Pong(_) => {
                                pong_deadline.reset();
                            }
                            WsMessage::Ping(data) => {
                                let _ = sender.tx.try_send(WsMessage::Pong(data));
                            }
                            WsMessage::Close(_) => {
                                tracing::info!(connection = sender.connection_id, "received close frame");
                                break;
                            }
                            WsMessage::Frame(_) => {} // Raw frames ignored.
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(connection = sender.connection_id, "read pump error: {e}");
                        break;
                    }
                    None => break, // Stream ended.
                }
            }
        }
    }
}

/// Dispatches a text (JSON) message to the appropriate handler method.
async fn dispatch_text<H: Handler>(handler: &Arc<H>, sender: &Sender, text: &str) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("invalid message JSON: {e}");
            let _ = sender.send_msg(Message::error("", WS_ERR_CODE_BAD_REQUEST, "invalid input"));
            return;
        }
    };

    let s = sender.clone();
    match msg.msg_type {
        MessageType::Hello => handler.on_hello(s, msg).await,
        MessageType::Ping => handler.on_ping(s, msg).await,
        MessageType::RequestUpload => handler.on_request_upload(s, msg).await,
        MessageType::StartUpload => handler.on_start_upload(s, msg).await,
        MessageType::Upload => handler.on_upload(s, msg).await,
        MessageType::StartDownload => handler.on_start_download(s, msg).await,
        MessageType::DownloadAck => handler.on_download_ack(s, msg).await,
        _ => {
            tracing::warn!(msg_type = ?msg.msg_type, "unhandled message type");
            let _ = sender.send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "unknown message type");
        }
    }
}

/// Dispatches a binary WebSocket frame to the appropriate handler method.
async fn dispatch_binary<H: Handler>(handler: &Arc<H>, sender: &Sender, data: &[u8]) {
    match parse_binary_message(data) {
        Ok(BinaryMessage::Upload { header, data }) => {
            handler.on_binary_upload(sender.clone(), header, data).await;
        }
        Ok(BinaryMessage::Download { header, .. }) => {
            tracing::warn!(download_id = header.download_id, "client sent a download frame, ignoring");
        }
        Err(e) => {
            tracing::error!("failed to parse binary message: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_error_display() {
        let err = SendError;
        assert!(err.to_string().contains("buffer full"));
    }

    #[tokio::test]
    async fn sender_reports_connection_state() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = Sender {
            connection_id: 3,
            tx,
        };
        assert_eq!(sender.connection_id(), 3);
        assert!(sender.is_connected());

        let ping = Message::new::<()>("p1", MessageType::Ping, None).unwrap();
        sender.send_error(&ping, 400, "nope").unwrap();
        match rx.recv().await.unwrap() {
            WsMessage::Text(text) => {
                let reply: Message = serde_json::from_str(&text).unwrap();
                assert_eq!(reply.id, "p1");
                assert_eq!(reply.error.unwrap().message, "nope");
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        drop(rx);
        assert!(!sender.is_connected());
        assert!(sender.send_binary(vec![1, 2]).is_err());
    }
}
