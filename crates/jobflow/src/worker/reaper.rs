use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::jobs::Store;

/// Periodic sweep that rescues jobs stuck in `running` past the worst-case
/// acceptable handler wall time. A stuck row usually means a crashed worker
/// or a hung external call; resetting it to pending puts it back in front
/// of any available dispatcher. Re-queueing is not a retry: `retry_count`
/// stays untouched.
pub struct Reaper {
    store: Arc<Store>,
    interval: Duration,
    max_run_duration: Duration,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Reaper {
    pub fn new(store: Arc<Store>, interval: Duration, max_run_duration: Duration) -> Self {
        Self {
            store,
            interval,
            max_run_duration,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let store = self.store.clone();
        let cancel = self.cancel.clone();
        let interval = self.interval;
        let max_run = self.max_run_duration;

        *task = Some(tokio::spawn(async move {
            debug!(?interval, ?max_run, "stuck-job reaper starting");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match store.reap_stuck_jobs(max_run).await {
                    Ok(0) => {}
                    Ok(count) => warn!(count, "re-queued stuck jobs"),
                    Err(err) => error!(%err, "reaping stuck jobs failed"),
                }
            }

            debug!("stuck-job reaper stopped");
        }));
    }

    /// Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(%err, "reaper task panicked");
            }
        }
    }
}
