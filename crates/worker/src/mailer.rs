use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Development sender: logs the message instead of talking to a provider.
/// The small sleep keeps its timing profile closer to a real send so the
/// email rate limit is actually exercised locally.
pub struct ConsoleMailer {
    from: String,
}

impl ConsoleMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Sender for ConsoleMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        info!(from = %self.from, %to, %subject, "sending email");
        Ok(())
    }
}
