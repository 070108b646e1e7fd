//! Outbound seams: pushing messages to a client and post-processing uploads.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use pigeon_protocol::Message;

/// The client's outbound queue is gone.
#[derive(Debug, thiserror::Error)]
#[error("client channel closed")]
pub struct NotifyError;

/// Pushes messages to the connection that owns a download.
///
/// Implemented by the WebSocket layer; downloads hold one per job so the
/// pump can deliver chunks without a reply to answer.
pub trait Notifier: Send + Sync + 'static {
    fn send_msg(&self, msg: Message) -> Result<(), NotifyError>;

    fn send_binary(&self, frame: Vec<u8>) -> Result<(), NotifyError>;
}

pub type ThumbnailResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Boxed future returned by [`ThumbnailProcessor::process`].
pub type ThumbnailFuture<'a> = Pin<Box<dyn Future<Output = ThumbnailResult> + Send + 'a>>;

/// Post-processing step run after an upload in a thumbnail-enabled category
/// has been fully written. Failures are logged and never fail the upload.
pub trait ThumbnailProcessor: Send + Sync + 'static {
    fn process<'a>(&'a self, path: &'a Path, content_name: &'a str) -> ThumbnailFuture<'a>;
}

/// Processor that produces nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoThumbnails;

impl ThumbnailProcessor for NoThumbnails {
    fn process<'a>(&'a self, path: &'a Path, content_name: &'a str) -> ThumbnailFuture<'a> {
        Box::pin(async move {
            tracing::debug!(content = content_name, path = %path.display(), "thumbnail generation disabled");
            Ok(())
        })
    }
}
