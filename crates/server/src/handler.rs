//! Handler trait for processing client messages.
//!
//! Implementors provide the content logic while the server framework
//! handles connection management, routing and the binary frame format.

use std::future::Future;
use std::pin::Pin;

use pigeon_protocol::binary::UploadFrameHeader;
use pigeon_protocol::constants::{MessageType, WS_ERR_CODE_NOT_IMPLEMENTED};
use pigeon_protocol::envelope::Message;

use crate::connection::Sender;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling WebSocket messages from a client.
///
/// Messages from one connection are dispatched in arrival order and each
/// call is awaited before the next frame is read, so upload chunks are
/// applied in the order the client sent them.
///
/// Default implementations reply with "not implemented" so handlers only
/// need to override the message types they care about.
pub trait Handler: Send + Sync + 'static {
    /// Called right after the WebSocket upgrade, before any message.
    fn on_connected(&self, sender: Sender) -> HandlerFuture<'_> {
        let _ = sender;
        Box::pin(async {})
    }

    /// Called for `hello`. The handler decides whether the client is
    /// authorized for content operations.
    fn on_hello(&self, sender: Sender, msg: Message) -> HandlerFuture<'_>;

    /// Called for `ping`.
    fn on_ping(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Ok(reply) = msg.reply_as(MessageType::Pong, Option::<&()>::None) {
                let _ = sender.send_msg(reply);
            }
        })
    }

    /// Called for `requestUpload`.
    fn on_request_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `startUpload`.
    fn on_start_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for a JSON `upload` carrying a base64 chunk.
    fn on_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for a binary `upload` frame.
    fn on_binary_upload(
        &self,
        sender: Sender,
        header: UploadFrameHeader,
        data: Vec<u8>,
    ) -> HandlerFuture<'_> {
        let _ = (sender, data);
        Box::pin(async move {
            tracing::warn!(upload_id = header.upload_id, "binary upload received but handler not implemented");
        })
    }

    /// Called for `startDownload`.
    fn on_start_download(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `downloadAck`.
    fn on_download_ack(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called once when the connection is gone (cleanup hook).
    fn on_disconnected(&self, sender: Sender) -> HandlerFuture<'_> {
        let _ = sender;
        Box::pin(async {})
    }
}

fn not_implemented<'a>(sender: Sender, msg: Message) -> HandlerFuture<'a> {
    Box::pin(async move {
        let _ = sender.send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
    })
}
