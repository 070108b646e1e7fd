//! Download jobs and the windowed chunk pump.

use std::sync::Arc;

use pigeon_protocol::constants::WS_ERR_CODE_INTERNAL;
use pigeon_protocol::messages::{DownloadFailure, StartDownloadRequest, StartDownloadResponse};
use pigeon_protocol::{DownloadFrameHeader, Message, MessageType, encode_binary_message};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::job::ConnectionId;
use crate::manager::{ContentManager, DownloadHandle, JobKind};
use crate::notify::Notifier;
use crate::validation::{content_extension, validate_content_name};
use crate::watchdog::Watchdog;
use crate::ContentError;

/// Lifecycle of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    /// File open, nothing sent yet.
    Opened,
    Sending,
    Done,
    Failed,
}

/// Point-in-time view of a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    pub id: u64,
    pub owner: ConnectionId,
    pub send_id: u64,
    pub state: DownloadState,
    pub size: u64,
    pub send_cursor: u64,
    pub ack_cursor: u64,
}

pub(crate) struct DownloadJob {
    content_name: String,
    send_id: u64,
    size: u64,
    send_cursor: u64,
    ack_cursor: u64,
    window: u64,
    chunk_size: usize,
    state: DownloadState,
    finished: bool,
    pump_scheduled: bool,
    file: Option<File>,
    watchdog: Option<Watchdog>,
    notifier: Arc<dyn Notifier>,
}

impl DownloadJob {
    /// More data remains and the client is at most one window behind.
    fn window_open(&self) -> bool {
        self.send_cursor < self.size && self.send_cursor <= self.ack_cursor + self.window
    }

    fn rearm(&self) {
        if let Some(watchdog) = &self.watchdog {
            watchdog.rearm();
        }
    }

    /// Pushes an unsolicited `download` failure to the client.
    fn push_failure(&self, download_id: u64, code: i32, message: &str) {
        let failure = DownloadFailure {
            download_id,
            send_id: Some(self.send_id),
        };
        match Message::failure(
            uuid::Uuid::new_v4().to_string(),
            MessageType::Download,
            code,
            message,
            Some(&failure),
        ) {
            Ok(msg) => {
                let _ = self.notifier.send_msg(msg);
            }
            Err(e) => tracing::error!(download_id, "failed to encode download failure: {e}"),
        }
    }
}

/// Pushed when storage fails mid-download.
const READ_FAILURE_MESSAGE: &str = "file error";

enum PumpStep {
    Continue,
    Stop,
}

impl ContentManager {
    /// Opens a stored content and starts streaming it to `notifier`.
    ///
    /// On success the reply to `request_id` is pushed through `notifier`
    /// before the first chunk, and the same response is returned. Errors are
    /// returned without anything being sent.
    pub async fn start_download(
        &self,
        owner: ConnectionId,
        notifier: Arc<dyn Notifier>,
        request_id: &str,
        request: &StartDownloadRequest,
    ) -> Result<StartDownloadResponse, ContentError> {
        let rule = self
            .policy
            .rule(&request.category)
            .ok_or(ContentError::InvalidCategory)?;
        validate_content_name(&request.content_name)?;
        if let Some(ext) = content_extension(&request.content_name) {
            if !rule.allows_extension(ext) {
                return Err(ContentError::InvalidExtension);
            }
        }

        let path = self.policy.dir_of(rule).join(&request.content_name);
        let (file, size) = match open_content(&path).await {
            Ok(opened) => opened,
            Err(e) => {
                tracing::debug!(path = %path.display(), "content unavailable: {e}");
                return Err(ContentError::ContentUnavailable);
            }
        };

        let id = self.allocate_download_id();
        let handle = DownloadHandle::new(
            id,
            owner,
            DownloadJob {
                content_name: request.content_name.clone(),
                send_id: request.send_id,
                size,
                send_cursor: 0,
                ack_cursor: 0,
                window: self.config.window_size,
                chunk_size: self.config.chunk_size,
                state: DownloadState::Opened,
                finished: false,
                pump_scheduled: false,
                file: Some(file),
                watchdog: None,
                notifier,
            },
        );

        if !self.downloads.lock().await.add(id, Arc::clone(&handle)) {
            tracing::error!(download_id = id, "download id already registered");
            return Err(ContentError::DuplicateId);
        }
        self.track(owner, JobKind::Download, id).await;

        let response = StartDownloadResponse {
            download_id: id,
            send_id: request.send_id,
            size,
        };

        let mut job = handle.lock().await;
        if job.finished {
            // The owner went away between registration and now.
            return Err(ContentError::Disconnected);
        }

        let reply = match Message::success(request_id, MessageType::StartDownload, Some(&response)) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(download_id = id, "failed to encode download reply: {e}");
                self.finish_download_locked(&handle, &mut job, Some(ContentError::Io(std::io::Error::other(e))))
                    .await;
                return Err(ContentError::Io(std::io::ErrorKind::InvalidData.into()));
            }
        };
        if job.notifier.send_msg(reply).is_err() {
            self.finish_download_locked(&handle, &mut job, Some(ContentError::Disconnected))
                .await;
            return Err(ContentError::Disconnected);
        }

        tracing::info!(
            download_id = id,
            connection = owner,
            content = %request.content_name,
            size,
            "download started"
        );

        if size == 0 {
            self.finish_download_locked(&handle, &mut job, None).await;
            return Ok(response);
        }

        job.watchdog = Some(self.download_watchdog(&handle));
        self.schedule_pump(&handle, &mut job);
        Ok(response)
    }

    /// Records how far the client has consumed a download.
    ///
    /// Acks never move backwards and never pass what was actually sent.
    pub async fn download_ack(
        &self,
        owner: ConnectionId,
        download_id: u64,
        ack: u64,
    ) -> Result<(), ContentError> {
        let handle = self
            .download_handle(download_id)
            .await
            .ok_or(ContentError::InvalidId)?;
        if handle.owner != owner {
            return Err(ContentError::Unauthorized);
        }

        let mut job = handle.lock().await;
        if job.finished {
            return Err(ContentError::InvalidId);
        }

        let acked = ack.min(job.send_cursor);
        job.ack_cursor = job.ack_cursor.max(acked);
        job.rearm();
        tracing::debug!(download_id, ack = job.ack_cursor, size = job.size, "download acked");

        if job.ack_cursor >= job.size {
            self.finish_download_locked(&handle, &mut job, None).await;
        } else {
            self.schedule_pump(&handle, &mut job);
        }
        Ok(())
    }

    /// Snapshot of a live download.
    pub async fn download_progress(&self, download_id: u64) -> Option<DownloadProgress> {
        let handle = self.download_handle(download_id).await?;
        let job = handle.lock().await;
        Some(DownloadProgress {
            id: handle.id,
            owner: handle.owner,
            send_id: job.send_id,
            state: job.state,
            size: job.size,
            send_cursor: job.send_cursor,
            ack_cursor: job.ack_cursor,
        })
    }

    /// Finishes a download. Returns `false` if it was already finished.
    pub(crate) async fn finish_download(
        &self,
        handle: &Arc<DownloadHandle>,
        error: Option<ContentError>,
    ) -> bool {
        handle.cancel();
        let mut job = handle.lock().await;
        self.finish_download_locked(handle, &mut job, error).await
    }

    async fn finish_download_locked(
        &self,
        handle: &Arc<DownloadHandle>,
        job: &mut DownloadJob,
        error: Option<ContentError>,
    ) -> bool {
        if job.finished {
            return false;
        }
        job.finished = true;
        handle.cancel();
        job.state = if error.is_some() {
            DownloadState::Failed
        } else {
            DownloadState::Done
        };
        job.watchdog = None;
        job.file = None;

        self.downloads.lock().await.remove(handle.id);
        self.untrack(handle.owner, JobKind::Download, handle.id).await;

        match error {
            Some(e) => tracing::warn!(
                download_id = handle.id,
                content = %job.content_name,
                sent = job.send_cursor,
                "download failed: {e}"
            ),
            None => tracing::info!(
                download_id = handle.id,
                content = %job.content_name,
                size = job.size,
                "download finished"
            ),
        }
        true
    }

    /// Starts a pump task unless one is already running or the window is shut.
    fn schedule_pump(&self, handle: &Arc<DownloadHandle>, job: &mut DownloadJob) {
        if job.finished || job.pump_scheduled || !job.window_open() {
            return;
        }
        let Some(manager) = self.this.upgrade() else {
            return;
        };
        job.pump_scheduled = true;
        let handle = Arc::clone(handle);
        tokio::spawn(async move { manager.run_pump(handle).await });
    }

    /// Sends one chunk per iteration, yielding in between so acks and other
    /// jobs get the lock.
    async fn run_pump(&self, handle: Arc<DownloadHandle>) {
        loop {
            let mut job = handle.lock().await;
            if job.finished || !job.window_open() {
                job.pump_scheduled = false;
                return;
            }
            if let PumpStep::Stop = self.pump_unit(&handle, &mut job).await {
                job.pump_scheduled = false;
                return;
            }
            drop(job);
            tokio::task::yield_now().await;
        }
    }

    async fn pump_unit(&self, handle: &Arc<DownloadHandle>, job: &mut DownloadJob) -> PumpStep {
        job.state = DownloadState::Sending;
        // Never read past the size advertised in the reply, even if the
        // file has grown since.
        let remaining = job.size - job.send_cursor;
        if remaining == 0 {
            return PumpStep::Stop;
        }
        let len = usize::try_from(remaining).map_or(job.chunk_size, |r| r.min(job.chunk_size));
        let mut buf = vec![0u8; len];

        let read = {
            let Some(file) = job.file.as_mut() else {
                return PumpStep::Stop;
            };
            tokio::select! {
                biased;
                _ = handle.cancelled() => return PumpStep::Stop,
                read = read_full(file, &mut buf) => read,
            }
        };

        let n = match read {
            Ok(0) => {
                tracing::debug!(download_id = handle.id, "end of content");
                self.finish_download_locked(handle, job, None).await;
                return PumpStep::Stop;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::error!(download_id = handle.id, "content read failed: {e}");
                job.push_failure(handle.id, WS_ERR_CODE_INTERNAL, READ_FAILURE_MESSAGE);
                self.finish_download_locked(handle, job, Some(ContentError::Io(e)))
                    .await;
                return PumpStep::Stop;
            }
        };

        let offset = job.send_cursor;
        let header = DownloadFrameHeader::new(
            uuid::Uuid::new_v4().to_string(),
            handle.id,
            job.send_id,
            job.size,
            offset,
        );
        let frame = match encode_binary_message(&header, &buf[..n]) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(download_id = handle.id, "failed to encode chunk: {e}");
                job.push_failure(handle.id, WS_ERR_CODE_INTERNAL, "server error");
                self.finish_download_locked(
                    handle,
                    job,
                    Some(ContentError::Io(std::io::ErrorKind::InvalidData.into())),
                )
                .await;
                return PumpStep::Stop;
            }
        };

        if job.notifier.send_binary(frame).is_err() {
            self.finish_download_locked(handle, job, Some(ContentError::Disconnected))
                .await;
            return PumpStep::Stop;
        }

        job.send_cursor += n as u64;
        job.rearm();
        tracing::debug!(download_id = handle.id, offset, len = n, size = job.size, "chunk sent");
        PumpStep::Continue
    }

    fn download_watchdog(&self, handle: &Arc<DownloadHandle>) -> Watchdog {
        let manager = self.this.clone();
        let job = Arc::downgrade(handle);
        Watchdog::arm(self.config.download_timeout, move || async move {
            let (Some(manager), Some(job)) = (manager.upgrade(), job.upgrade()) else {
                return;
            };
            tracing::warn!(download_id = job.id, "download timed out");
            job.cancel();
            let mut state = job.lock().await;
            if !state.finished {
                let timeout = ContentError::Timeout;
                state.push_failure(job.id, timeout.code(), &timeout.to_string());
            }
            manager
                .finish_download_locked(&job, &mut state, Some(ContentError::Timeout))
                .await;
        })
    }
}

/// Opens a regular file and returns it with its length.
async fn open_content(path: &std::path::Path) -> std::io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a regular file",
        ));
    }
    Ok((file, meta.len()))
}

/// Fills `buf` unless the end of the file comes first.
async fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::notify::{NoThumbnails, NotifyError};
    use crate::policy::CategoryPolicy;
    use pigeon_protocol::{BinaryMessage, parse_binary_message};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    const OWNER: ConnectionId = 7;
    const MIB: usize = 1024 * 1024;

    /// Collects everything pushed to the client.
    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<Message>>,
        frames: Mutex<Vec<Vec<u8>>>,
        closed: std::sync::atomic::AtomicBool,
    }

    impl RecordingNotifier {
        fn chunks(&self) -> Vec<(DownloadFrameHeader, usize)> {
            self.frames
                .lock()
                .unwrap()
                .iter()
                .map(|frame| match parse_binary_message(frame).unwrap() {
                    BinaryMessage::Download { header, data } => (header, data.len()),
                    other => panic!("unexpected frame: {other:?}"),
                })
                .collect()
        }

        fn sent_bytes(&self) -> usize {
            self.chunks().iter().map(|(_, len)| len).sum()
        }
    }

    impl Notifier for RecordingNotifier {
        fn send_msg(&self, msg: Message) -> Result<(), NotifyError> {
            if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(NotifyError);
            }
            self.messages.lock().unwrap().push(msg);
            Ok(())
        }

        fn send_binary(&self, frame: Vec<u8>) -> Result<(), NotifyError> {
            if self.closed.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(NotifyError);
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    fn manager_in(root: &Path, timeout: Duration) -> Arc<ContentManager> {
        ContentManager::new(
            TransferConfig {
                chunk_size: 2 * MIB,
                window_size: 2 * MIB as u64,
                upload_timeout: timeout,
                download_timeout: timeout,
            },
            CategoryPolicy::with_defaults(root),
            Arc::new(NoThumbnails),
        )
    }

    async fn store(root: &Path, dir: &str, name: &str, len: usize) -> Vec<u8> {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let dir = root.join(dir);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join(name), &data).await.unwrap();
        data
    }

    fn request(name: &str, category: &str) -> StartDownloadRequest {
        StartDownloadRequest {
            content_name: name.into(),
            category: category.into(),
            send_id: 55,
        }
    }

    /// Waits until the pump has pushed `bytes` in total and gone idle.
    async fn wait_for_sent(notifier: &RecordingNotifier, bytes: usize) {
        for _ in 0..200 {
            if notifier.sent_bytes() >= bytes {
                tokio::time::sleep(Duration::from_millis(30)).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pump never sent {bytes} bytes");
    }

    #[tokio::test]
    async fn window_stalls_and_resumes_on_ack() {
        let tmp = tempfile::tempdir().unwrap();
        let data = store(tmp.path(), "binaryContents", "big.bin", 5 * MIB).await;
        let manager = manager_in(tmp.path(), Duration::from_secs(5));
        let notifier = Arc::new(RecordingNotifier::default());

        let resp = manager
            .start_download(OWNER, notifier.clone(), "req-1", &request("big.bin", "binary"))
            .await
            .unwrap();
        assert_eq!(resp.size, data.len() as u64);
        assert_eq!(resp.send_id, 55);

        {
            let messages = notifier.messages.lock().unwrap();
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].id, "req-1");
            assert!(messages[0].is_success());
        }

        wait_for_sent(&notifier, 4 * MIB).await;
        assert_eq!(notifier.sent_bytes(), 4 * MIB);
        let progress = manager.download_progress(resp.download_id).await.unwrap();
        assert_eq!(progress.send_cursor, 4 * MIB as u64);
        assert_eq!(progress.state, DownloadState::Sending);

        manager
            .download_ack(OWNER, resp.download_id, 2 * MIB as u64)
            .await
            .unwrap();
        wait_for_sent(&notifier, 5 * MIB).await;

        let chunks = notifier.chunks();
        assert_eq!(chunks.len(), 3);
        let offsets: Vec<u64> = chunks.iter().map(|(h, _)| h.offset).collect();
        assert_eq!(offsets, vec![0, 2 * MIB as u64, 4 * MIB as u64]);
        assert!(chunks.iter().all(|(h, _)| h.send_id == 55 && h.size == data.len() as u64));

        manager
            .download_ack(OWNER, resp.download_id, 5 * MIB as u64)
            .await
            .unwrap();
        assert_eq!(manager.download_count().await, 0);
        assert!(manager.download_progress(resp.download_id).await.is_none());
    }

    #[tokio::test]
    async fn chunks_reassemble_to_file() {
        let tmp = tempfile::tempdir().unwrap();
        let data = store(tmp.path(), "imageContents", "pic.png", MIB + 17).await;
        let manager = manager_in(tmp.path(), Duration::from_secs(5));
        let notifier = Arc::new(RecordingNotifier::default());

        let resp = manager
            .start_download(OWNER, notifier.clone(), "r", &request("pic.png", "image"))
            .await
            .unwrap();
        wait_for_sent(&notifier, data.len()).await;

        let mut received = Vec::new();
        for frame in notifier.frames.lock().unwrap().iter() {
            if let BinaryMessage::Download { data, .. } = parse_binary_message(frame).unwrap() {
                received.extend_from_slice(&data);
            }
        }
        assert_eq!(received, data);

        manager
            .download_ack(OWNER, resp.download_id, data.len() as u64)
            .await
            .unwrap();
        assert_eq!(manager.download_count().await, 0);
    }

    #[tokio::test]
    async fn acks_are_monotonic_and_clamped() {
        let tmp = tempfile::tempdir().unwrap();
        store(tmp.path(), "binaryContents", "big.bin", 5 * MIB).await;
        let manager = manager_in(tmp.path(), Duration::from_secs(5));
        let notifier = Arc::new(RecordingNotifier::default());
        let resp = manager
            .start_download(OWNER, notifier.clone(), "r", &request("big.bin", "binary"))
            .await
            .unwrap();
        wait_for_sent(&notifier, 4 * MIB).await;
        let id = resp.download_id;

        manager.download_ack(OWNER, id, 3 * MIB as u64).await.unwrap();
        manager.download_ack(OWNER, id, MIB as u64).await.unwrap();
        let progress = manager.download_progress(id).await.unwrap();
        assert_eq!(progress.ack_cursor, 3 * MIB as u64);

        wait_for_sent(&notifier, 5 * MIB).await;
        manager.download_ack(OWNER, id, u64::MAX).await.unwrap();
        assert_eq!(manager.download_count().await, 0);
    }

    #[tokio::test]
    async fn ack_never_exceeds_sent_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        store(tmp.path(), "binaryContents", "big.bin", 9 * MIB).await;
        let manager = manager_in(tmp.path(), Duration::from_secs(5));
        let notifier = Arc::new(RecordingNotifier::default());
        let resp = manager
            .start_download(OWNER, notifier.clone(), "r", &request("big.bin", "binary"))
            .await
            .unwrap();
        wait_for_sent(&notifier, 4 * MIB).await;

        // Claims more than was sent; the cursor stops at what went out.
        manager
            .download_ack(OWNER, resp.download_id, 8 * MIB as u64)
            .await
            .unwrap();
        let progress = manager.download_progress(resp.download_id).await.unwrap();
        assert!(progress.ack_cursor <= progress.send_cursor);
        assert!(progress.send_cursor <= progress.ack_cursor + 2 * MIB as u64 + 2 * MIB as u64);
    }

    #[tokio::test]
    async fn ack_validation() {
        let tmp = tempfile::tempdir().unwrap();
        store(tmp.path(), "binaryContents", "big.bin", 5 * MIB).await;
        let manager = manager_in(tmp.path(), Duration::from_secs(5));
        let notifier = Arc::new(RecordingNotifier::default());
        let resp = manager
            .start_download(OWNER, notifier.clone(), "r", &request("big.bin", "binary"))
            .await
            .unwrap();

        assert!(matches!(
            manager.download_ack(OWNER, resp.download_id + 9, 0).await,
            Err(ContentError::InvalidId)
        ));
        assert!(matches!(
            manager.download_ack(OWNER + 1, resp.download_id, 0).await,
            Err(ContentError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn start_validation() {
        let tmp = tempfile::tempdir().unwrap();
        store(tmp.path(), "imageContents", "a.png", 10).await;
        let manager = manager_in(tmp.path(), Duration::from_secs(5));
        let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::default());

        let cases = [
            (request("a.png", "video"), "invalid type"),
            (request("../a.png", "image"), "invalid input"),
            (request("a.gif", "image"), "invalid extension"),
            (request("missing.png", "image"), "content error"),
        ];
        for (req, message) in cases {
            let err = manager
                .start_download(OWNER, Arc::clone(&notifier), "r", &req)
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), message, "{req:?}");
        }
        assert_eq!(manager.download_count().await, 0);
    }

    #[tokio::test]
    async fn directory_is_not_content() {
        let tmp = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(tmp.path().join("binaryContents").join("sub"))
            .await
            .unwrap();
        let manager = manager_in(tmp.path(), Duration::from_secs(5));
        let err = manager
            .start_download(
                OWNER,
                Arc::new(RecordingNotifier::default()),
                "r",
                &request("sub", "binary"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::ContentUnavailable));
    }

    #[tokio::test]
    async fn empty_content_finishes_immediately() {
        let tmp = tempfile::tempdir().unwrap();
        store(tmp.path(), "binaryContents", "empty.txt", 0).await;
        let manager = manager_in(tmp.path(), Duration::from_secs(5));
        let notifier = Arc::new(RecordingNotifier::default());
        let resp = manager
            .start_download(OWNER, notifier.clone(), "r", &request("empty.txt", "binary"))
            .await
            .unwrap();
        assert_eq!(resp.size, 0);
        assert_eq!(manager.download_count().await, 0);
        assert!(notifier.frames.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stalled_download_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        store(tmp.path(), "binaryContents", "big.bin", 5 * MIB).await;
        let manager = manager_in(tmp.path(), Duration::from_millis(200));
        let notifier = Arc::new(RecordingNotifier::default());
        manager
            .start_download(OWNER, notifier.clone(), "r", &request("big.bin", "binary"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(manager.download_count().await, 0);

        let messages = notifier.messages.lock().unwrap();
        let last = messages.last().unwrap();
        assert_eq!(last.msg_type, MessageType::Download);
        assert_eq!(last.error.as_ref().unwrap().message, "timeout");
    }

    #[tokio::test]
    async fn closed_client_fails_download() {
        let tmp = tempfile::tempdir().unwrap();
        store(tmp.path(), "binaryContents", "big.bin", 5 * MIB).await;
        let manager = manager_in(tmp.path(), Duration::from_secs(5));
        let notifier = Arc::new(RecordingNotifier::default());
        notifier
            .closed
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let err = manager
            .start_download(OWNER, notifier.clone(), "r", &request("big.bin", "binary"))
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::Disconnected));
        assert_eq!(manager.download_count().await, 0);
    }

    #[tokio::test]
    async fn disconnect_cancels_downloads() {
        let tmp = tempfile::tempdir().unwrap();
        store(tmp.path(), "binaryContents", "big.bin", 5 * MIB).await;
        let manager = manager_in(tmp.path(), Duration::from_secs(5));
        let notifier = Arc::new(RecordingNotifier::default());
        for _ in 0..2 {
            manager
                .start_download(OWNER, notifier.clone(), "r", &request("big.bin", "binary"))
                .await
                .unwrap();
        }
        assert_eq!(manager.jobs_of(OWNER).await.downloads.len(), 2);

        assert_eq!(manager.cancel_connection(OWNER).await, (0, 2));
        assert_eq!(manager.download_count().await, 0);
        assert!(manager.jobs_of(OWNER).await.is_empty());
    }

    #[tokio::test]
    async fn growing_file_is_cut_at_advertised_size() {
        let tmp = tempfile::tempdir().unwrap();
        store(tmp.path(), "binaryContents", "grow.bin", 1000).await;
        let manager = manager_in(tmp.path(), Duration::from_secs(5));
        let notifier = Arc::new(RecordingNotifier::default());

        let resp = manager
            .start_download(OWNER, notifier.clone(), "r", &request("grow.bin", "binary"))
            .await
            .unwrap();
        assert_eq!(resp.size, 1000);

        // The pump has not run yet on this runtime; the file grows first.
        {
            use std::io::Write;
            let path = tmp.path().join("binaryContents").join("grow.bin");
            let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
            file.write_all(&[7u8; 5000]).unwrap();
        }

        wait_for_sent(&notifier, 1000).await;
        assert_eq!(notifier.sent_bytes(), 1000);
        for (header, len) in notifier.chunks() {
            assert_eq!(header.size, 1000);
            assert!(header.offset + len as u64 <= 1000);
        }
        let progress = manager.download_progress(resp.download_id).await.unwrap();
        assert_eq!(progress.send_cursor, 1000);

        manager.download_ack(OWNER, resp.download_id, 6000).await.unwrap();
        assert_eq!(manager.download_count().await, 0);
    }

    #[tokio::test]
    async fn read_error_pushes_file_error() {
        let tmp = tempfile::tempdir().unwrap();
        store(tmp.path(), "binaryContents", "big.bin", 5 * MIB).await;
        let manager = manager_in(tmp.path(), Duration::from_secs(5));
        let notifier = Arc::new(RecordingNotifier::default());

        let resp = manager
            .start_download(OWNER, notifier.clone(), "r", &request("big.bin", "binary"))
            .await
            .unwrap();

        // Swap in a write-only handle before the pump's first read.
        let handle = manager.download_handle(resp.download_id).await.unwrap();
        {
            let scratch = tmp.path().join("scratch.bin");
            let write_only = std::fs::File::create(scratch).unwrap();
            handle.lock().await.file = Some(File::from_std(write_only));
        }

        for _ in 0..100 {
            if manager.download_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.download_count().await, 0);
        assert!(notifier.frames.lock().unwrap().is_empty());

        let job = handle.lock().await;
        assert_eq!(job.state, DownloadState::Failed);
        assert!(job.file.is_none());
        drop(job);

        let messages = notifier.messages.lock().unwrap();
        let failure = messages.last().unwrap();
        assert_eq!(failure.msg_type, MessageType::Download);
        let error = failure.error.as_ref().unwrap();
        assert_eq!(error.code, 500);
        assert_eq!(error.message, "file error");
        let payload: DownloadFailure = failure.parse_payload().unwrap().unwrap();
        assert_eq!(payload.download_id, resp.download_id);
        assert_eq!(payload.send_id, Some(55));
    }
}
