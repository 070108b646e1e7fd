use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;

use crate::config::TransferConfig;
use crate::download::DownloadJob;
use crate::job::{ConnectionId, JobHandle, OwnedJobs};
use crate::notify::{NoThumbnails, ThumbnailProcessor};
use crate::policy::CategoryPolicy;
use crate::registry::JobRegistry;
use crate::upload::UploadJob;
use crate::ContentError;

pub(crate) type UploadHandle = JobHandle<UploadJob>;
pub(crate) type DownloadHandle = JobHandle<DownloadJob>;

/// Owns every live upload and download job.
///
/// One manager serves all connections. Job state sits behind per-job
/// locks; the registries and the per-connection index are only locked for
/// lookups and membership changes, never across job I/O. Lock order is
/// job, then registry, then connection index.
pub struct ContentManager {
    pub(crate) config: TransferConfig,
    pub(crate) policy: CategoryPolicy,
    pub(crate) thumbnails: Arc<dyn ThumbnailProcessor>,
    pub(crate) uploads: Mutex<JobRegistry<Arc<UploadHandle>>>,
    pub(crate) downloads: Mutex<JobRegistry<Arc<DownloadHandle>>>,
    connections: Mutex<HashMap<ConnectionId, OwnedJobs>>,
    next_upload_id: AtomicU64,
    next_download_id: AtomicU64,
    /// Handed to timers and pump tasks so they never keep the manager alive.
    pub(crate) this: Weak<ContentManager>,
}

impl ContentManager {
    pub fn new(
        config: TransferConfig,
        policy: CategoryPolicy,
        thumbnails: Arc<dyn ThumbnailProcessor>,
    ) -> Arc<Self> {
        let config = config.normalized();
        Arc::new_cyclic(|this| Self {
            config,
            policy,
            thumbnails,
            uploads: Mutex::new(JobRegistry::new()),
            downloads: Mutex::new(JobRegistry::new()),
            connections: Mutex::new(HashMap::new()),
            next_upload_id: AtomicU64::new(1),
            next_download_id: AtomicU64::new(1),
            this: this.clone(),
        })
    }

    /// Default tuning and no thumbnail generation.
    pub fn with_policy(policy: CategoryPolicy) -> Arc<Self> {
        Self::new(TransferConfig::default(), policy, Arc::new(NoThumbnails))
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn policy(&self) -> &CategoryPolicy {
        &self.policy
    }

    pub async fn upload_count(&self) -> usize {
        self.uploads.lock().await.len()
    }

    pub async fn download_count(&self) -> usize {
        self.downloads.lock().await.len()
    }

    /// Live jobs owned by `owner`.
    pub async fn jobs_of(&self, owner: ConnectionId) -> OwnedJobs {
        self.connections
            .lock()
            .await
            .get(&owner)
            .cloned()
            .unwrap_or_default()
    }

    /// Fails every job owned by `owner` with [`ContentError::Disconnected`].
    /// Uploads already fully written are left to finish post-processing.
    ///
    /// Returns the number of uploads and downloads that were cancelled.
    pub async fn cancel_connection(&self, owner: ConnectionId) -> (usize, usize) {
        let Some(owned) = self.connections.lock().await.remove(&owner) else {
            return (0, 0);
        };

        let (uploads, downloads) = self.cancel_jobs(owned.uploads, owned.downloads).await;
        tracing::info!(connection = owner, uploads, downloads, "connection jobs cancelled");
        (uploads, downloads)
    }

    /// Fails every live job, whatever its connection. Used on shutdown.
    pub async fn cancel_all(&self) -> (usize, usize) {
        let upload_ids: Vec<u64> = self.uploads.lock().await.ids().collect();
        let download_ids: Vec<u64> = self.downloads.lock().await.ids().collect();

        let (uploads, downloads) = self.cancel_jobs(upload_ids, download_ids).await;
        if uploads + downloads > 0 {
            tracing::info!(uploads, downloads, "live jobs cancelled");
        }
        (uploads, downloads)
    }

    async fn cancel_jobs(
        &self,
        upload_ids: impl IntoIterator<Item = u64>,
        download_ids: impl IntoIterator<Item = u64>,
    ) -> (usize, usize) {
        let mut uploads = 0;
        for id in upload_ids {
            let Some(handle) = self.upload_handle(id).await else {
                continue;
            };
            if self.abandon_upload(&handle).await {
                uploads += 1;
            }
        }

        let mut downloads = 0;
        for id in download_ids {
            let Some(handle) = self.download_handle(id).await else {
                continue;
            };
            if self.finish_download(&handle, Some(ContentError::Disconnected)).await {
                downloads += 1;
            }
        }
        (uploads, downloads)
    }

    pub(crate) fn allocate_upload_id(&self) -> u64 {
        self.next_upload_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn allocate_download_id(&self) -> u64 {
        self.next_download_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) async fn upload_handle(&self, id: u64) -> Option<Arc<UploadHandle>> {
        self.uploads.lock().await.get(id).cloned()
    }

    pub(crate) async fn download_handle(&self, id: u64) -> Option<Arc<DownloadHandle>> {
        self.downloads.lock().await.get(id).cloned()
    }

    pub(crate) async fn track(&self, owner: ConnectionId, job: JobKind, id: u64) {
        let mut connections = self.connections.lock().await;
        let owned = connections.entry(owner).or_default();
        match job {
            JobKind::Upload => owned.uploads.insert(id),
            JobKind::Download => owned.downloads.insert(id),
        };
    }

    pub(crate) async fn untrack(&self, owner: ConnectionId, job: JobKind, id: u64) {
        let mut connections = self.connections.lock().await;
        if let Some(owned) = connections.get_mut(&owner) {
            match job {
                JobKind::Upload => owned.uploads.remove(&id),
                JobKind::Download => owned.downloads.remove(&id),
            };
            if owned.is_empty() {
                connections.remove(&owner);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobKind {
    Upload,
    Download,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_start_at_one_and_increase() {
        let manager = ContentManager::with_policy(CategoryPolicy::with_defaults("."));
        assert_eq!(manager.allocate_upload_id(), 1);
        assert_eq!(manager.allocate_upload_id(), 2);
        assert_eq!(manager.allocate_download_id(), 1);
    }

    #[tokio::test]
    async fn untrack_drops_empty_connections() {
        let manager = ContentManager::with_policy(CategoryPolicy::with_defaults("."));
        manager.track(3, JobKind::Upload, 10).await;
        manager.track(3, JobKind::Download, 11).await;

        manager.untrack(3, JobKind::Upload, 10).await;
        let owned = manager.jobs_of(3).await;
        assert!(owned.uploads.is_empty());
        assert!(owned.downloads.contains(&11));

        manager.untrack(3, JobKind::Download, 11).await;
        assert!(manager.connections.lock().await.get(&3).is_none());
    }

    #[tokio::test]
    async fn cancel_all_spans_connections() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = ContentManager::with_policy(CategoryPolicy::with_defaults(tmp.path()));
        manager.enroll_upload(1, "binary", None).await.unwrap();
        manager.enroll_upload(2, "image", None).await.unwrap();
        assert_eq!(manager.upload_count().await, 2);

        assert_eq!(manager.cancel_all().await, (2, 0));
        assert_eq!(manager.upload_count().await, 0);
        assert!(manager.jobs_of(1).await.is_empty());
        assert!(manager.jobs_of(2).await.is_empty());
        assert_eq!(manager.cancel_all().await, (0, 0));
    }

    #[tokio::test]
    async fn cancel_unknown_connection_is_noop() {
        let manager = ContentManager::with_policy(CategoryPolicy::with_defaults("."));
        assert_eq!(manager.cancel_connection(42).await, (0, 0));
    }

    #[test]
    fn zero_config_is_normalized() {
        let manager = ContentManager::new(
            TransferConfig {
                chunk_size: 0,
                ..TransferConfig::default()
            },
            CategoryPolicy::with_defaults("."),
            Arc::new(NoThumbnails),
        );
        assert_eq!(manager.config().chunk_size, crate::DEFAULT_CHUNK_SIZE);
    }
}
