use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::jobs::{Job, Store};
use crate::metrics::MetricsSink;
use crate::worker::registry::Registry;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub num_workers: usize,
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 5,
            poll_interval: Duration::from_secs(2),
            batch_size: 10,
        }
    }
}

/// Lifecycle owner of the dispatcher and worker tasks.
///
/// One dispatcher polls the store and claims eligible jobs in batches; the
/// claimed jobs flow through a bounded channel to a fixed set of workers.
/// The channel capacity equals the batch size, so a full complement of busy
/// workers blocks the dispatcher mid-batch instead of letting claimed work
/// accumulate in memory: that blocking is the intended back-pressure.
pub struct Pool {
    store: Arc<Store>,
    registry: Arc<Registry>,
    metrics: Arc<MetricsSink>,
    config: PoolConfig,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<Registry>,
        metrics: Arc<MetricsSink>,
        config: PoolConfig,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
            config,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The pool-wide shutdown signal. Handlers receive a clone and are
    /// expected to forward it into any downstream I/O they perform.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn the workers and the dispatcher. Non-blocking.
    pub async fn start(&self) {
        let capacity = self.config.batch_size.max(1) as usize;
        let (job_tx, job_rx) = mpsc::channel::<Job>(capacity);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            warn!("worker pool already started");
            return;
        }

        info!(workers = self.config.num_workers, "worker pool starting");

        for worker_id in 1..=self.config.num_workers {
            let worker = WorkerLoop {
                id: worker_id,
                store: self.store.clone(),
                registry: self.registry.clone(),
                metrics: self.metrics.clone(),
                cancel: self.cancel.clone(),
            };
            let rx = job_rx.clone();
            tasks.push(tokio::spawn(async move { worker.run(rx).await }));
        }

        let dispatcher = Dispatcher {
            store: self.store.clone(),
            cancel: self.cancel.clone(),
            poll_interval: self.config.poll_interval,
            batch_size: self.config.batch_size,
        };
        tasks.push(tokio::spawn(async move { dispatcher.run(job_tx).await }));
    }

    /// Graceful shutdown: stop claiming, drain the channel, wait for every
    /// worker to return. Idempotent; later calls return once the first
    /// drain has finished.
    pub async fn stop(&self) {
        self.cancel.cancel();

        // The lock is held across the join so a concurrent second caller
        // does not return before the drain has finished.
        let mut tasks = self.tasks.lock().await;
        if tasks.is_empty() {
            return;
        }

        info!("worker pool shutting down");
        for handle in tasks.drain(..) {
            if let Err(err) = handle.await {
                error!(%err, "pool task panicked");
            }
        }
        info!("worker pool stopped");
    }
}

struct Dispatcher {
    store: Arc<Store>,
    cancel: CancellationToken,
    poll_interval: Duration,
    batch_size: i64,
}

impl Dispatcher {
    /// Poll-claim-publish loop. Owns the only sender, so returning from
    /// here closes the channel: that closure is the signal to workers that
    /// no more jobs will arrive.
    async fn run(self, job_tx: mpsc::Sender<Job>) {
        debug!(interval = ?self.poll_interval, "dispatcher starting");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // Cancellation drops an in-flight claim, rolling the
            // transaction back; store errors must not kill the loop either
            // way, the next tick simply tries again.
            let jobs = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = self.store.claim_pending(self.batch_size) => match res {
                    Ok(jobs) => jobs,
                    Err(err) if err.is_transient() => {
                        warn!(%err, "claim skipped, database unavailable");
                        continue;
                    }
                    Err(err) => {
                        error!(%err, "claiming pending jobs failed");
                        continue;
                    }
                }
            };

            if !jobs.is_empty() {
                debug!(count = jobs.len(), "dispatching claimed jobs");
            }

            for job in jobs {
                // A send blocked on full buffer is back-pressure working as
                // intended. If shutdown fires mid-send, the claimed row
                // stays running and the reaper re-queues it later.
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        debug!("dispatcher interrupted mid-batch");
                        return;
                    }
                    res = job_tx.send(job) => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
            }
        }

        debug!("dispatcher stopped");
    }
}

struct WorkerLoop {
    id: usize,
    store: Arc<Store>,
    registry: Arc<Registry>,
    metrics: Arc<MetricsSink>,
    cancel: CancellationToken,
}

impl WorkerLoop {
    /// Consume jobs until the channel closes, then exit.
    async fn run(self, job_rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
        debug!(worker = self.id, "worker started");

        loop {
            // Holding the mutex across recv serializes waiters; whichever
            // worker wakes first takes the job.
            let job = {
                let mut rx = job_rx.lock().await;
                rx.recv().await
            };

            match job {
                Some(job) => self.process(job).await,
                None => break,
            }
        }

        debug!(worker = self.id, "worker stopped");
    }

    async fn process(&self, job: Job) {
        debug!(worker = self.id, job_id = job.id, job_type = %job.job_type, "picked up job");

        let Some((handler, limiter)) = self.registry.get(&job.job_type) else {
            // A missing handler is a configuration error, not a transient
            // one: fail terminally instead of burning retries.
            warn!(job_id = job.id, job_type = %job.job_type, "no handler registered");
            let msg = format!("no handler registered for job type: {}", job.job_type);
            if let Err(err) = self.store.mark_failed(job.id, &msg).await {
                error!(job_id = job.id, %err, "recording missing-handler failure failed");
            }
            self.metrics.record_failed(Duration::ZERO);
            return;
        };

        if limiter.acquire(&self.cancel).await.is_err() {
            let err = self
                .store
                .handle_failure(job.id, "shutdown while waiting for rate limit")
                .await;
            if let Err(err) = err {
                error!(job_id = job.id, %err, "recording rate-limit cancellation failed");
            }
            return;
        }

        self.metrics.worker_busy();
        let started = Instant::now();
        let result = handler.handle(&self.cancel, &job).await;
        let elapsed = started.elapsed();
        self.metrics.worker_idle();

        match result {
            Ok(()) => {
                debug!(worker = self.id, job_id = job.id, ?elapsed, "job completed");
                // A lost completion write is corrected by the reaper: the
                // job re-runs and handler idempotency absorbs the duplicate.
                if let Err(err) = self.store.mark_completed(job.id).await {
                    error!(job_id = job.id, %err, "CRITICAL: completion write failed");
                }
                self.metrics.record_completed(elapsed);
            }
            Err(handler_err) => {
                warn!(
                    worker = self.id,
                    job_id = job.id,
                    retry_count = job.retry_count,
                    error = %handler_err,
                    "job handler failed"
                );
                if let Err(err) = self
                    .store
                    .handle_failure(job.id, &handler_err.to_string())
                    .await
                {
                    error!(job_id = job.id, %err, "CRITICAL: failure write failed");
                }
                self.metrics.record_failed(elapsed);
            }
        }
    }
}
