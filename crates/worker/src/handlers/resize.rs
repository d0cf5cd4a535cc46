use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use jobflow::jobs::Job;
use jobflow::worker::Handler;

use crate::blob::BlobStore;

#[derive(Debug, Deserialize)]
struct ResizePayload {
    src_url: String,
    width: u32,
    output_path: String,
}

/// Downloads an image, scales it to the requested width preserving aspect
/// ratio, and uploads the JPEG to blob storage. Idempotent: the output
/// path is deterministic, so a re-run overwrites the same object with the
/// same bytes.
pub struct ResizeHandler {
    blob: Arc<dyn BlobStore>,
}

impl ResizeHandler {
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self { blob }
    }

    async fn download(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let resp = reqwest::get(url).await.context("download source image")?;
        let resp = resp.error_for_status().context("source image status")?;
        let bytes = resp.bytes().await.context("read source image body")?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Handler for ResizeHandler {
    async fn handle(&self, cancel: &CancellationToken, job: &Job) -> anyhow::Result<()> {
        let payload: ResizePayload =
            serde_json::from_str(&job.payload).context("parse resize payload")?;
        if payload.width == 0 {
            anyhow::bail!("resize width must be positive");
        }

        let start = Instant::now();

        let bytes = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled while downloading source image"),
            res = self.download(&payload.src_url) => res?,
        };

        // Decode and scale off the async threads.
        let width = payload.width;
        let jpeg = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<u8>> {
            let src = image::load_from_memory(&bytes).context("decode source image")?;
            let height =
                (f64::from(width) * f64::from(src.height()) / f64::from(src.width())).round();
            let scaled = src.resize_exact(width, (height as u32).max(1), FilterType::CatmullRom);

            let mut out = Vec::new();
            let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut out), 80);
            scaled.to_rgb8().write_with_encoder(encoder)?;
            Ok(out)
        })
        .await
        .context("resize task join")??;

        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled while uploading resized image"),
            res = self.blob.upload(&jpeg, &payload.output_path, "image/jpeg") => {
                res.context("upload resized image")?
            }
        }

        info!(
            job_id = job.id,
            output = %payload.output_path,
            elapsed = ?start.elapsed(),
            "image resized"
        );
        Ok(())
    }
}
