//! Transfer tuning knobs.

use std::time::Duration;

use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_JOB_TIMEOUT, DEFAULT_WINDOW_SIZE};

/// Tuning shared by every job of a [`ContentManager`](crate::ContentManager).
#[derive(Debug, Clone, PartialEq)]
pub struct TransferConfig {
    /// Bytes read from storage per download chunk.
    pub chunk_size: usize,
    /// Unacknowledged bytes a download may have in flight before it stalls.
    pub window_size: u64,
    /// Inactivity timeout for uploads.
    pub upload_timeout: Duration,
    /// Inactivity timeout for downloads.
    pub download_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            window_size: DEFAULT_WINDOW_SIZE,
            upload_timeout: DEFAULT_JOB_TIMEOUT,
            download_timeout: DEFAULT_JOB_TIMEOUT,
        }
    }
}

impl TransferConfig {
    /// Replaces zero values with the defaults.
    pub fn normalized(mut self) -> Self {
        if self.chunk_size == 0 {
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.window_size == 0 {
            self.window_size = DEFAULT_WINDOW_SIZE;
        }
        if self.upload_timeout.is_zero() {
            self.upload_timeout = DEFAULT_JOB_TIMEOUT;
        }
        if self.download_timeout.is_zero() {
            self.download_timeout = DEFAULT_JOB_TIMEOUT;
        }
        self
    }
}
