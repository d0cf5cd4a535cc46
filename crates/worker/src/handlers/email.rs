use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use jobflow::jobs::Job;
use jobflow::worker::Handler;

use crate::mailer::Sender;

#[derive(Debug, Deserialize)]
struct EmailPayload {
    to: String,
    subject: String,
    #[serde(default)]
    body: String,
}

/// Sends one email per job through the configured [`Sender`].
pub struct EmailHandler {
    sender: Arc<dyn Sender>,
}

impl EmailHandler {
    pub fn new(sender: Arc<dyn Sender>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Handler for EmailHandler {
    async fn handle(&self, cancel: &CancellationToken, job: &Job) -> anyhow::Result<()> {
        let payload: EmailPayload =
            serde_json::from_str(&job.payload).context("parse email payload")?;

        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled while sending email"),
            res = self.sender.send(&payload.to, &payload.subject, &payload.body) => {
                res.context("send email")
            }
        }
    }
}
