use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use jobflow::jobs::{Job, Store};
use jobflow::worker::Handler;

use crate::blob::BlobStore;

#[derive(Debug, Deserialize)]
struct ArchivePayload {
    older_than_seconds: u64,
    #[serde(default = "default_batch")]
    batch: i64,
}

fn default_batch() -> i64 {
    100
}

/// Serialized form of an exported job. Kept separate from the store row so
/// the archive format does not silently drift with the schema.
#[derive(Debug, Serialize)]
struct ArchivedJob<'a> {
    id: i64,
    #[serde(rename = "type")]
    job_type: &'a str,
    payload: &'a str,
    status: &'a str,
    created_at: String,
    completed_at: Option<String>,
    retry_count: i32,
}

/// Exports completed jobs older than a cutoff to blob storage, then
/// deletes them. Export-before-delete ordering means a crash in between
/// leaves duplicate archive entries, never lost rows; the batch delete is
/// idempotent on re-run.
pub struct ArchiveHandler {
    store: Arc<Store>,
    blob: Arc<dyn BlobStore>,
}

impl ArchiveHandler {
    pub fn new(store: Arc<Store>, blob: Arc<dyn BlobStore>) -> Self {
        Self { store, blob }
    }
}

#[async_trait]
impl Handler for ArchiveHandler {
    async fn handle(&self, cancel: &CancellationToken, job: &Job) -> anyhow::Result<()> {
        let payload: ArchivePayload =
            serde_json::from_str(&job.payload).context("parse archive payload")?;

        let age = Duration::from_secs(payload.older_than_seconds);
        let jobs = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled while listing archivable jobs"),
            res = self.store.list_archivable(age, payload.batch) => {
                res.context("list archivable jobs")?
            }
        };

        if jobs.is_empty() {
            info!(job_id = job.id, "no jobs to archive");
            return Ok(());
        }

        let export: Vec<ArchivedJob<'_>> = jobs
            .iter()
            .map(|j| ArchivedJob {
                id: j.id,
                job_type: &j.job_type,
                payload: &j.payload,
                status: &j.status,
                created_at: j.created_at.to_rfc3339(),
                completed_at: j.completed_at.map(|t| t.to_rfc3339()),
                retry_count: j.retry_count,
            })
            .collect();
        let data = serde_json::to_vec_pretty(&export).context("serialize archive")?;

        let object_path = format!("archives/jobs_{}.json", Utc::now().format("%Y-%m-%d_%H-%M-%S"));
        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled while uploading archive"),
            res = self.blob.upload(&data, &object_path, "application/json") => {
                res.context("upload archive")?
            }
        }

        let ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
        let deleted = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled while deleting archived jobs"),
            res = self.store.batch_delete(&ids) => res.context("delete archived jobs")?,
        };

        info!(
            job_id = job.id,
            count = deleted,
            object = %object_path,
            "archived and deleted jobs"
        );
        Ok(())
    }
}
