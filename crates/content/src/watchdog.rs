//! Per-job inactivity timer.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Single-shot timer that fires once no progress was reported for `timeout`.
///
/// One background task per watchdog sleeps until the current deadline.
/// [`rearm`](Self::rearm) only moves the deadline, so frequent progress
/// reports do not spawn anything. Dropping the watchdog stops it.
pub struct Watchdog {
    deadline: watch::Sender<Instant>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Watchdog {
    /// Starts the timer. `on_expire` runs at most once, on the timer task.
    pub fn arm<F, Fut>(timeout: Duration, on_expire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, mut rx) = watch::channel(Instant::now() + timeout);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                let deadline = *rx.borrow_and_update();
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => return,

                    changed = rx.changed() => {
                        if changed.is_err() {
                            // Watchdog dropped.
                            return;
                        }
                    }

                    _ = tokio::time::sleep_until(deadline) => {
                        on_expire().await;
                        return;
                    }
                }
            }
        });

        Self {
            deadline: tx,
            timeout,
            cancel,
        }
    }

    /// Pushes the deadline to `timeout` from now.
    pub fn rearm(&self) {
        let _ = self.deadline.send(Instant::now() + self.timeout);
    }

    /// Stops the timer without firing.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
