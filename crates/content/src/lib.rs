//! Chunked, flow-controlled content transfer.
//!
//! A [`ContentManager`] tracks upload and download jobs for every client
//! connection:
//!
//! - Uploads reserve a slot with [`ContentManager::enroll_upload`], fix size
//!   and extension with [`ContentManager::start_upload`], then stream bytes
//!   through [`ContentManager::upload_chunk`]. Each accepted chunk is acked
//!   with the running byte count.
//! - Downloads open stored content with [`ContentManager::start_download`]
//!   and are pushed to the client in chunks, never more than one window
//!   ahead of the last [`ContentManager::download_ack`].
//!
//! Every job carries an inactivity [`Watchdog`]; a job that stops making
//! progress fails with [`ContentError::Timeout`]. Partial uploads are
//! deleted on failure.

mod config;
mod download;
mod error;
mod job;
mod manager;
mod notify;
mod policy;
mod registry;
mod upload;
mod validation;
mod watchdog;

use std::time::Duration;

pub use config::TransferConfig;
pub use download::{DownloadProgress, DownloadState};
pub use error::ContentError;
pub use job::{ConnectionId, OwnedJobs};
pub use manager::ContentManager;
pub use notify::{
    NoThumbnails, Notifier, NotifyError, ThumbnailFuture, ThumbnailProcessor, ThumbnailResult,
};
pub use policy::{CategoryPolicy, CategoryRule, WILDCARD_EXTENSION, default_categories};
pub use registry::JobRegistry;
pub use upload::{ChunkOutcome, UploadCompletion, UploadProgress, UploadState};
pub use validation::{content_extension, validate_content_name, validate_extension};
pub use watchdog::Watchdog;

/// Bytes read per download chunk (2 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// Unacknowledged bytes allowed in flight per download (2 MiB).
pub const DEFAULT_WINDOW_SIZE: u64 = 2 * 1024 * 1024;

/// Inactivity timeout for both job kinds.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(5);
