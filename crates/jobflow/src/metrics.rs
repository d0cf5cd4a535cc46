use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use crate::jobs::JobStats;

/// Process-wide execution counters, shared by the pool and the metrics
/// endpoint. Queue-depth gauges come from the store at scrape time; only
/// what the database cannot see lives here.
#[derive(Debug, Default)]
pub struct MetricsSink {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    handler_millis: AtomicU64,
    busy_workers: AtomicI64,
}

impl MetricsSink {
    pub fn record_completed(&self, duration: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.handler_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_failed(&self, duration: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        self.handler_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn worker_busy(&self) {
        self.busy_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_idle(&self) {
        self.busy_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn busy_workers(&self) -> i64 {
        self.busy_workers.load(Ordering::Relaxed)
    }

    /// Minimal Prometheus text format, no extra crate needed.
    pub fn render_prometheus(&self, stats: &JobStats) -> String {
        format!(
            concat!(
                "# HELP jobflow_jobs_pending Jobs waiting to be claimed\n",
                "# TYPE jobflow_jobs_pending gauge\n",
                "jobflow_jobs_pending {}\n",
                "# HELP jobflow_jobs_running Jobs currently claimed\n",
                "# TYPE jobflow_jobs_running gauge\n",
                "jobflow_jobs_running {}\n",
                "# HELP jobflow_jobs_completed_total Jobs finished successfully by this process\n",
                "# TYPE jobflow_jobs_completed_total counter\n",
                "jobflow_jobs_completed_total {}\n",
                "# HELP jobflow_jobs_failed_total Job executions that returned an error in this process\n",
                "# TYPE jobflow_jobs_failed_total counter\n",
                "jobflow_jobs_failed_total {}\n",
                "# HELP jobflow_handler_seconds_total Wall time spent inside handlers\n",
                "# TYPE jobflow_handler_seconds_total counter\n",
                "jobflow_handler_seconds_total {:.3}\n",
                "# HELP jobflow_busy_workers Workers currently executing a handler\n",
                "# TYPE jobflow_busy_workers gauge\n",
                "jobflow_busy_workers {}\n",
            ),
            stats.pending,
            stats.running,
            self.jobs_completed(),
            self.jobs_failed(),
            self.handler_millis.load(Ordering::Relaxed) as f64 / 1000.0,
            self.busy_workers(),
        )
    }
}
