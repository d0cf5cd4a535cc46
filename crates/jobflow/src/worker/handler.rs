use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::jobs::Job;

/// The contract every job-type executor implements.
///
/// Handlers receive the full row; the payload format is handler-private.
/// Delivery is at-least-once (a job may re-run after a worker crash or a
/// reaper reset), so handlers MUST be idempotent, and they must honor
/// `cancel` promptly: graceful shutdown relies on it. An `Err` return is
/// routed through the store's retry transition, never treated as terminal
/// by the worker itself.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, cancel: &CancellationToken, job: &Job) -> anyhow::Result<()>;
}
