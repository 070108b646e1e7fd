use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Identifies the connection that owns a job.
pub type ConnectionId = u64;

/// Shared handle to one job.
///
/// The mutable job state lives behind an async mutex so I/O can run while
/// the state is held. The token is cancelled as soon as the job starts
/// finishing; in-flight steps race against it and back off so the
/// finishing side can take the lock.
pub(crate) struct JobHandle<J> {
    pub(crate) id: u64,
    pub(crate) owner: ConnectionId,
    cancel: CancellationToken,
    state: Mutex<J>,
}

impl<J> JobHandle<J> {
    pub(crate) fn new(id: u64, owner: ConnectionId, state: J) -> Arc<Self> {
        Arc::new(Self {
            id,
            owner,
            cancel: CancellationToken::new(),
            state: Mutex::new(state),
        })
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, J> {
        self.state.lock().await
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Ids of the live jobs a connection owns.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OwnedJobs {
    pub uploads: BTreeSet<u64>,
    pub downloads: BTreeSet<u64>,
}

impl OwnedJobs {
    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty() && self.downloads.is_empty()
    }
}
