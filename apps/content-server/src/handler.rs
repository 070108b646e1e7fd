//! Routes client events to the content manager.

use std::sync::Arc;

use pigeon_content::{
    ChunkOutcome, ContentError, ContentManager, Notifier, NotifyError, UploadCompletion,
};
use pigeon_protocol::binary::UploadFrameHeader;
use pigeon_protocol::constants::{MessageType, WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_UNAUTHORIZED};
use pigeon_protocol::envelope::Message;
use pigeon_protocol::messages::{
    DownloadAckRequest, DownloadFailure, HelloRequest, HelloResponse, RequestUploadRequest,
    RequestUploadResponse, StartDownloadRequest, StartUploadRequest, StartUploadResponse,
    UploadFailure, UploadRequest, UploadResponse,
};
use pigeon_server::{Handler, HandlerFuture, Sender};
use serde::Serialize;

use crate::session::SessionTable;

/// Pushes download traffic through a client's WebSocket sender.
struct ClientNotifier(Sender);

impl Notifier for ClientNotifier {
    fn send_msg(&self, msg: Message) -> Result<(), NotifyError> {
        self.0.send_msg(msg).map_err(|_| NotifyError)
    }

    fn send_binary(&self, frame: Vec<u8>) -> Result<(), NotifyError> {
        self.0.send_binary(frame).map_err(|_| NotifyError)
    }
}

/// Content server message handler.
pub struct ContentHandler {
    manager: Arc<ContentManager>,
    sessions: SessionTable,
}

impl ContentHandler {
    pub fn new(manager: Arc<ContentManager>, sessions: SessionTable) -> Self {
        Self { manager, sessions }
    }

    /// Checks authorization and decodes the payload, replying on failure.
    fn accept<T: for<'de> serde::Deserialize<'de>>(
        &self,
        sender: &Sender,
        msg: &Message,
    ) -> Option<T> {
        if let Err(e) = self.sessions.authorize(sender.connection_id(), msg, true) {
            let _ = sender.send_error(msg, e.code(), &e.to_string());
            return None;
        }
        match msg.parse_payload::<T>() {
            Ok(Some(req)) => Some(req),
            Ok(None) => {
                let _ = sender.send_error(msg, WS_ERR_CODE_BAD_REQUEST, "no argument");
                None
            }
            Err(e) => {
                tracing::debug!(event = msg.msg_type.as_str(), "invalid payload: {e}");
                let err = ContentError::InvalidInput;
                let _ = sender.send_error(msg, err.code(), &err.to_string());
                None
            }
        }
    }

    /// Applies one upload chunk and answers with its `upload` reply.
    async fn apply_chunk(&self, sender: &Sender, reply_id: &str, upload_id: u64, data: &[u8]) {
        let reply = match self
            .manager
            .upload_chunk(sender.connection_id(), upload_id, data)
            .await
        {
            ChunkOutcome::Ignored => return,
            ChunkOutcome::Acked { ack, .. } => Message::success(
                reply_id,
                MessageType::Upload,
                Some(&UploadResponse { upload_id, ack }),
            ),
            ChunkOutcome::Rejected(e) => upload_failure(reply_id, upload_id, None, &e),
            ChunkOutcome::WriteFailed { ack, error } => {
                upload_failure(reply_id, upload_id, Some(ack), &error)
            }
        };
        send(sender, reply);
    }
}

fn upload_failure(
    reply_id: &str,
    upload_id: u64,
    ack: Option<u64>,
    error: &ContentError,
) -> Result<Message, serde_json::Error> {
    Message::failure(
        reply_id,
        MessageType::Upload,
        error.code(),
        error.to_string(),
        Some(&UploadFailure { upload_id, ack }),
    )
}

fn reply<T: Serialize>(sender: &Sender, msg: &Message, payload: &T) {
    send(sender, msg.reply(Some(payload)));
}

fn reply_failure<T: Serialize>(sender: &Sender, msg: &Message, error: &ContentError, payload: &T) {
    send(
        sender,
        msg.reply_failure(error.code(), error.to_string(), Some(payload)),
    );
}

fn send(sender: &Sender, msg: Result<Message, serde_json::Error>) {
    match msg {
        Ok(msg) => {
            let _ = sender.send_msg(msg);
        }
        Err(e) => tracing::error!("failed to build reply: {e}"),
    }
}

/// Logs the final outcome of a client upload.
fn log_completion(connection: u64) -> UploadCompletion {
    Box::new(move |result| match result {
        Ok(name) => tracing::info!(connection, content = %name, "content stored"),
        Err(e) => tracing::info!(connection, "upload abandoned: {e}"),
    })
}

impl Handler for ContentHandler {
    fn on_hello(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let token = match msg.parse_payload::<HelloRequest>() {
                Ok(req) => req.map(|r| r.token).unwrap_or_default(),
                Err(e) => {
                    tracing::debug!("invalid hello payload: {e}");
                    let _ = sender.send_error(&msg, WS_ERR_CODE_BAD_REQUEST, "invalid input");
                    return;
                }
            };

            let connection_id = sender.connection_id();
            if !self.sessions.hello(connection_id, &token) {
                tracing::warn!(connection = connection_id, "hello rejected");
                let _ = sender.send_error(&msg, WS_ERR_CODE_UNAUTHORIZED, "authorization failed");
                return;
            }

            tracing::info!(connection = connection_id, "client authorized");
            reply(&sender, &msg, &HelloResponse { connection_id });
        })
    }

    fn on_request_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = self.accept::<RequestUploadRequest>(&sender, &msg) else {
                return;
            };

            let connection = sender.connection_id();
            match self
                .manager
                .enroll_upload(connection, &req.category, Some(log_completion(connection)))
                .await
            {
                Ok(upload_id) => reply(&sender, &msg, &RequestUploadResponse { upload_id }),
                Err(e) => {
                    let _ = sender.send_error(&msg, e.code(), &e.to_string());
                }
            }
        })
    }

    fn on_start_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = self.accept::<StartUploadRequest>(&sender, &msg) else {
                return;
            };

            match self
                .manager
                .start_upload(sender.connection_id(), req.upload_id, req.size, &req.extension)
                .await
            {
                Ok(content_name) => reply(
                    &sender,
                    &msg,
                    &StartUploadResponse {
                        upload_id: req.upload_id,
                        content_name,
                    },
                ),
                Err(e) => reply_failure(
                    &sender,
                    &msg,
                    &e,
                    &UploadFailure {
                        upload_id: req.upload_id,
                        ack: None,
                    },
                ),
            }
        })
    }

    fn on_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = self.accept::<UploadRequest>(&sender, &msg) else {
                return;
            };
            self.apply_chunk(&sender, &msg.id, req.upload_id, &req.buffer)
                .await;
        })
    }

    fn on_binary_upload(
        &self,
        sender: Sender,
        header: UploadFrameHeader,
        data: Vec<u8>,
    ) -> HandlerFuture<'_> {
        Box::pin(async move {
            if !self.sessions.is_authorized(sender.connection_id()) {
                tracing::warn!(connection = sender.connection_id(), "unauthorized binary upload");
                send(
                    &sender,
                    upload_failure(&header.id, header.upload_id, None, &ContentError::Unauthorized),
                );
                return;
            }
            self.apply_chunk(&sender, &header.id, header.upload_id, &data)
                .await;
        })
    }

    fn on_start_download(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = self.accept::<StartDownloadRequest>(&sender, &msg) else {
                return;
            };

            let notifier: Arc<dyn Notifier> = Arc::new(ClientNotifier(sender.clone()));
            // On success the manager has already replied ahead of the first chunk.
            if let Err(e) = self
                .manager
                .start_download(sender.connection_id(), notifier, &msg.id, &req)
                .await
            {
                let _ = sender.send_error(&msg, e.code(), &e.to_string());
            }
        })
    }

    fn on_download_ack(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let Some(req) = self.accept::<DownloadAckRequest>(&sender, &msg) else {
                return;
            };

            if let Err(e) = self
                .manager
                .download_ack(sender.connection_id(), req.download_id, req.ack)
                .await
            {
                reply_failure(
                    &sender,
                    &msg,
                    &e,
                    &DownloadFailure {
                        download_id: req.download_id,
                        send_id: None,
                    },
                );
            }
        })
    }

    fn on_disconnected(&self, sender: Sender) -> HandlerFuture<'_> {
        Box::pin(async move {
            let connection = sender.connection_id();
            self.sessions.remove(connection);
            self.manager.cancel_connection(connection).await;
        })
    }
}
