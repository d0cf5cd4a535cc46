use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use jobflow::jobs::{Job, Store};
use jobflow::worker::{Handler, Registry};

use crate::blob::BlobStore;
use crate::mailer::Sender;

pub mod archive;
pub mod email;
pub mod invoice;
pub mod resize;

/// Wire the handler catalog into the registry with the per-type rate
/// limits this deployment runs with.
pub fn register_catalog(
    registry: &Registry,
    store: Arc<Store>,
    blob: Arc<dyn BlobStore>,
    mailer: Arc<dyn Sender>,
) {
    registry.register("noop", Arc::new(NoopHandler::default()), 0);
    registry.register(
        "notification:email",
        Arc::new(email::EmailHandler::new(mailer)),
        5,
    );
    registry.register(
        "media:resize_image",
        Arc::new(resize::ResizeHandler::new(blob.clone())),
        2,
    );
    registry.register(
        "finance:invoice",
        Arc::new(invoice::InvoiceHandler::new(blob.clone())),
        10,
    );
    registry.register(
        "maintenance:archive",
        Arc::new(archive::ArchiveHandler::new(store, blob)),
        0,
    );
}

#[derive(Debug, Deserialize, Default)]
struct NoopPayload {
    #[serde(default)]
    sleep_ms: u64,
}

/// Does nothing, successfully. Load tests and smoke tests point at this.
#[derive(Debug, Default)]
pub struct NoopHandler;

#[async_trait]
impl Handler for NoopHandler {
    async fn handle(&self, cancel: &CancellationToken, job: &Job) -> anyhow::Result<()> {
        let payload: NoopPayload = serde_json::from_str(&job.payload).unwrap_or_default();

        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled"),
            _ = tokio::time::sleep(Duration::from_millis(payload.sleep_ms)) => Ok(()),
        }
    }
}
