//! Upload jobs: slot reservation, file creation and chunk writes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::job::ConnectionId;
use crate::manager::{ContentManager, JobKind, UploadHandle};
use crate::validation::validate_extension;
use crate::watchdog::Watchdog;
use crate::ContentError;

/// Called exactly once when an upload job finishes, with the stored content
/// name on success. Runs while the job is locked, so it must not block.
pub type UploadCompletion = Box<dyn FnOnce(Result<String, ContentError>) + Send + 'static>;

/// Lifecycle of an upload job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Slot reserved, waiting for `startUpload`.
    Reserved,
    /// File created, no bytes written yet.
    Pending,
    /// At least one chunk written.
    Active,
    Done,
    Failed,
}

/// Result of feeding one chunk to an upload.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// No job with that id. Nothing is sent back.
    Ignored,
    /// Chunk accepted; `ack` is the running byte count.
    Acked { ack: u64, completed: bool },
    /// Chunk refused; the job is unchanged.
    Rejected(ContentError),
    /// Storage write failed; the job has been failed.
    WriteFailed { ack: u64, error: ContentError },
}

/// Point-in-time view of an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadProgress {
    pub id: u64,
    pub owner: ConnectionId,
    pub category: String,
    pub state: UploadState,
    pub size: u64,
    pub written: u64,
    pub left: u64,
    pub content_name: Option<String>,
}

pub(crate) struct UploadJob {
    category: String,
    thumbnails: bool,
    state: UploadState,
    finished: bool,
    size: u64,
    left: u64,
    written: u64,
    file: Option<File>,
    path: Option<PathBuf>,
    content_name: Option<String>,
    completion: Option<UploadCompletion>,
    watchdog: Option<Watchdog>,
}

impl UploadJob {
    fn reserved(category: &str, thumbnails: bool, completion: Option<UploadCompletion>) -> Self {
        Self {
            category: category.to_string(),
            thumbnails,
            state: UploadState::Reserved,
            finished: false,
            size: 0,
            left: 0,
            written: 0,
            file: None,
            path: None,
            content_name: None,
            completion,
            watchdog: None,
        }
    }

    fn is_closed(&self) -> bool {
        self.finished || matches!(self.state, UploadState::Done | UploadState::Failed)
    }

    fn ack(&self) -> u64 {
        self.size - self.left
    }

    fn rearm(&self) {
        if let Some(watchdog) = &self.watchdog {
            watchdog.rearm();
        }
    }
}

impl ContentManager {
    /// Reserves an upload slot in `category` for `owner`.
    ///
    /// The inactivity timer starts now, so a slot that never sees
    /// `startUpload` is reclaimed.
    pub async fn enroll_upload(
        &self,
        owner: ConnectionId,
        category: &str,
        completion: Option<UploadCompletion>,
    ) -> Result<u64, ContentError> {
        let rule = self
            .policy
            .rule(category)
            .ok_or(ContentError::InvalidCategory)?;

        let id = self.allocate_upload_id();
        let handle = UploadHandle::new(
            id,
            owner,
            UploadJob::reserved(category, rule.thumbnails, completion),
        );

        // Armed before registration so a concurrent finish always sees it.
        handle.lock().await.watchdog = Some(self.upload_watchdog(&handle));

        if !self.uploads.lock().await.add(id, Arc::clone(&handle)) {
            tracing::error!(upload_id = id, "upload id already registered");
            return Err(ContentError::DuplicateId);
        }
        self.track(owner, JobKind::Upload, id).await;

        tracing::info!(upload_id = id, connection = owner, category, "upload slot reserved");
        Ok(id)
    }

    /// Fixes size and extension of a reserved upload and creates its file.
    ///
    /// Returns the generated content name. Validation failures leave the
    /// slot reserved so the client may retry.
    pub async fn start_upload(
        &self,
        owner: ConnectionId,
        upload_id: u64,
        size: u64,
        extension: &str,
    ) -> Result<String, ContentError> {
        let handle = self
            .upload_handle(upload_id)
            .await
            .ok_or(ContentError::InvalidId)?;
        if handle.owner != owner {
            return Err(ContentError::Unauthorized);
        }

        let mut job = handle.lock().await;
        if job.is_closed() || job.state != UploadState::Reserved {
            return Err(ContentError::UploadClosed);
        }

        let rule = self
            .policy
            .rule(&job.category)
            .ok_or(ContentError::InvalidCategory)?;
        validate_extension(extension)?;
        rule.check_upload(extension, size)?;

        let dir = self.policy.dir_of(rule);
        let content_name = format!("{}.{}", random_name(), extension);
        let path = dir.join(&content_name);

        let file = match create_exclusive(&dir, &path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::error!(upload_id, path = %path.display(), "failed to create content file: {e}");
                let kind = e.kind();
                self.finish_upload_locked(&handle, &mut job, Some(ContentError::Io(e)))
                    .await;
                return Err(ContentError::Io(kind.into()));
            }
        };

        job.size = size;
        job.left = size;
        job.written = 0;
        job.file = Some(file);
        job.path = Some(path);
        job.content_name = Some(content_name.clone());
        job.state = UploadState::Pending;
        job.rearm();

        tracing::info!(upload_id, size, content = %content_name, "upload started");

        if size == 0 {
            self.complete_upload(&handle, &mut job).await;
        }
        Ok(content_name)
    }

    /// Writes one chunk. Bytes past the declared size are dropped.
    pub async fn upload_chunk(
        &self,
        owner: ConnectionId,
        upload_id: u64,
        data: &[u8],
    ) -> ChunkOutcome {
        let Some(handle) = self.upload_handle(upload_id).await else {
            tracing::debug!(upload_id, "chunk for unknown upload ignored");
            return ChunkOutcome::Ignored;
        };

        let mut job = handle.lock().await;
        if job.is_closed() || handle.is_cancelled() {
            return ChunkOutcome::Rejected(ContentError::UploadClosed);
        }
        if handle.owner != owner {
            return ChunkOutcome::Rejected(ContentError::Unauthorized);
        }
        if job.file.is_none() {
            return ChunkOutcome::Rejected(ContentError::ProtocolOrderViolation);
        }
        if job.left == 0 {
            return ChunkOutcome::Rejected(ContentError::UploadClosed);
        }

        let valid = usize::try_from(job.left).map_or(data.len(), |left| left.min(data.len()));
        if valid < data.len() {
            tracing::debug!(upload_id, offered = data.len(), valid, "chunk truncated to declared size");
        }

        let written = {
            let Some(file) = job.file.as_mut() else {
                return ChunkOutcome::Rejected(ContentError::ProtocolOrderViolation);
            };
            tokio::select! {
                biased;
                _ = handle.cancelled() => None,
                result = write_chunk(file, &data[..valid]) => Some(result),
            }
        };

        let Some(written) = written else {
            // Finishing concurrently; it takes over once the lock is released.
            return ChunkOutcome::Rejected(ContentError::UploadClosed);
        };

        job.rearm();

        if let Err(e) = written {
            tracing::error!(upload_id, "content write failed: {e}");
            let ack = job.ack();
            let kind = e.kind();
            self.finish_upload_locked(&handle, &mut job, Some(ContentError::Io(e)))
                .await;
            return ChunkOutcome::WriteFailed {
                ack,
                error: ContentError::Io(kind.into()),
            };
        }

        job.left -= valid as u64;
        job.written += valid as u64;
        job.state = UploadState::Active;
        let ack = job.ack();
        tracing::debug!(upload_id, ack, size = job.size, "chunk written");

        let completed = job.written == job.size;
        if completed {
            self.complete_upload(&handle, &mut job).await;
        }
        ChunkOutcome::Acked { ack, completed }
    }

    /// Snapshot of a live upload.
    pub async fn upload_progress(&self, upload_id: u64) -> Option<UploadProgress> {
        let handle = self.upload_handle(upload_id).await?;
        let job = handle.lock().await;
        Some(UploadProgress {
            id: handle.id,
            owner: handle.owner,
            category: job.category.clone(),
            state: job.state,
            size: job.size,
            written: job.written,
            left: job.left,
            content_name: job.content_name.clone(),
        })
    }

    /// Finishes an upload. Returns `false` if it was already finished.
    pub(crate) async fn finish_upload(
        &self,
        handle: &Arc<UploadHandle>,
        error: Option<ContentError>,
    ) -> bool {
        handle.cancel();
        let mut job = handle.lock().await;
        self.finish_upload_locked(handle, &mut job, error).await
    }

    /// Fails an upload whose connection went away.
    ///
    /// A fully written upload still in post-processing is left running; its
    /// thumbnail task finishes it with success.
    pub(crate) async fn abandon_upload(&self, handle: &Arc<UploadHandle>) -> bool {
        let mut job = handle.lock().await;
        if job.state == UploadState::Done {
            tracing::debug!(upload_id = handle.id, "owner left during post-processing");
            return false;
        }
        self.finish_upload_locked(handle, &mut job, Some(ContentError::Disconnected))
            .await
    }

    async fn finish_upload_locked(
        &self,
        handle: &Arc<UploadHandle>,
        job: &mut UploadJob,
        error: Option<ContentError>,
    ) -> bool {
        if job.finished {
            return false;
        }
        // Every byte is on disk once the job is done; the content stays.
        let error = match error {
            Some(e) if job.state == UploadState::Done => {
                tracing::debug!(upload_id = handle.id, "content already stored, ignoring: {e}");
                None
            }
            other => other,
        };
        job.finished = true;
        handle.cancel();
        job.state = if error.is_some() {
            UploadState::Failed
        } else {
            UploadState::Done
        };
        job.watchdog = None;

        self.uploads.lock().await.remove(handle.id);
        self.untrack(handle.owner, JobKind::Upload, handle.id).await;

        if let Some(mut file) = job.file.take() {
            if let Err(e) = file.flush().await {
                tracing::warn!(upload_id = handle.id, "flush on close failed: {e}");
            }
        }

        if let (Some(_), Some(path)) = (&error, &job.path) {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {
                    tracing::info!(upload_id = handle.id, path = %path.display(), "removed partial content")
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(upload_id = handle.id, path = %path.display(), "failed to remove partial content: {e}")
                }
            }
        }

        let outcome = match (error, job.content_name.clone()) {
            (Some(e), _) => {
                tracing::warn!(upload_id = handle.id, "upload failed: {e}");
                Err(e)
            }
            (None, Some(name)) => {
                tracing::info!(upload_id = handle.id, content = %name, size = job.size, "upload finished");
                Ok(name)
            }
            (None, None) => Err(ContentError::ProtocolOrderViolation),
        };

        if let Some(completion) = job.completion.take() {
            completion(outcome);
        }
        true
    }

    /// Marks a fully written upload done and runs post-processing.
    async fn complete_upload(&self, handle: &Arc<UploadHandle>, job: &mut UploadJob) {
        job.state = UploadState::Done;
        job.watchdog = None;
        if let Some(mut file) = job.file.take() {
            if let Err(e) = file.flush().await {
                tracing::warn!(upload_id = handle.id, "flush on close failed: {e}");
            }
        }

        let (Some(path), Some(name)) = (job.path.clone(), job.content_name.clone()) else {
            self.finish_upload_locked(handle, job, None).await;
            return;
        };
        if !job.thumbnails {
            self.finish_upload_locked(handle, job, None).await;
            return;
        }

        let manager = self.this.clone();
        let processor = Arc::clone(&self.thumbnails);
        let handle = Arc::clone(handle);
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = handle.cancelled() => return,
                result = processor.process(&path, &name) => result,
            };
            match result {
                Ok(()) => tracing::debug!(upload_id = handle.id, content = %name, "thumbnail processed"),
                Err(e) => tracing::warn!(upload_id = handle.id, content = %name, "thumbnail failed: {e}"),
            }
            if let Some(manager) = manager.upgrade() {
                manager.finish_upload(&handle, None).await;
            }
        });
    }

    fn upload_watchdog(&self, handle: &Arc<UploadHandle>) -> Watchdog {
        let manager = self.this.clone();
        let job = Arc::downgrade(handle);
        Watchdog::arm(self.config.upload_timeout, move || async move {
            let (Some(manager), Some(job)) = (manager.upgrade(), job.upgrade()) else {
                return;
            };
            tracing::warn!(upload_id = job.id, "upload timed out");
            manager.finish_upload(&job, Some(ContentError::Timeout)).await;
        })
    }
}

/// 8 random bytes, hex encoded.
fn random_name() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Creates `path`, failing if it already exists. Creates `dir` if missing.
async fn create_exclusive(dir: &Path, path: &Path) -> std::io::Result<File> {
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("{} is not a directory", dir.display()),
            ));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(dir).await?;
        }
        Err(e) => return Err(e),
    }

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}

async fn write_chunk(file: &mut File, data: &[u8]) -> std::io::Result<()> {
    file.write_all(data).await?;
    file.flush().await
}
