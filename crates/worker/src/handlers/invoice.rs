use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use jobflow::jobs::Job;
use jobflow::worker::Handler;

use crate::blob::BlobStore;

#[derive(Debug, Deserialize)]
struct InvoiceItem {
    description: String,
    quantity: u32,
    unit_price: f64,
}

#[derive(Debug, Deserialize)]
struct InvoicePayload {
    user_id: String,
    invoice_id: String,
    #[serde(default)]
    date: String,
    #[serde(default = "default_currency")]
    currency: String,
    #[serde(default)]
    items: Vec<InvoiceItem>,
    #[serde(default)]
    amount: f64,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Renders an invoice PDF into blob storage.
///
/// Idempotency lives here: the object path is derived from the invoice id,
/// and an existing object short-circuits the job. A re-delivered invoice
/// job therefore never regenerates or double-bills.
pub struct InvoiceHandler {
    blob: Arc<dyn BlobStore>,
}

impl InvoiceHandler {
    pub fn new(blob: Arc<dyn BlobStore>) -> Self {
        Self { blob }
    }
}

#[async_trait]
impl Handler for InvoiceHandler {
    async fn handle(&self, cancel: &CancellationToken, job: &Job) -> anyhow::Result<()> {
        let payload: InvoicePayload =
            serde_json::from_str(&job.payload).context("parse invoice payload")?;
        if payload.invoice_id.trim().is_empty() {
            anyhow::bail!("invoice_id is required");
        }

        let object_path = format!("secure/invoices/{}.pdf", payload.invoice_id);

        let already_rendered = tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled while checking existing invoice"),
            res = self.blob.exists(&object_path) => res.context("check existing invoice")?,
        };
        if already_rendered {
            info!(invoice_id = %payload.invoice_id, "invoice already exists, skipping");
            return Ok(());
        }

        let pdf = render_invoice_pdf(&payload);

        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("cancelled while uploading invoice"),
            res = self.blob.upload(&pdf, &object_path, "application/pdf") => {
                res.context("upload invoice pdf")?
            }
        }

        info!(job_id = job.id, invoice_id = %payload.invoice_id, "invoice generated");
        Ok(())
    }
}

fn render_invoice_pdf(payload: &InvoicePayload) -> Vec<u8> {
    let mut lines = vec![
        "DUNDER MIFFLIN PAPER COMPANY".to_string(),
        "Scranton, Pennsylvania - 18503".to_string(),
        String::new(),
        format!("Invoice: {}", payload.invoice_id),
        format!("Bill to: {}", payload.user_id),
        format!("Date: {}", payload.date),
        String::new(),
    ];

    for item in &payload.items {
        lines.push(format!(
            "{}  x{}  @ {:.2} {}",
            item.description, item.quantity, item.unit_price, payload.currency
        ));
    }

    lines.push(String::new());
    lines.push(format!("TOTAL: {:.2} {}", payload.amount, payload.currency));

    render_pdf(&lines)
}

/// Single-page PDF 1.4 writer: one Helvetica text block, nothing more.
/// Enough for a line-item invoice without pulling in a PDF dependency.
fn render_pdf(lines: &[String]) -> Vec<u8> {
    let mut content = String::from("BT\n/F1 12 Tf\n16 TL\n50 780 Td\n");
    for line in lines {
        content.push_str(&format!("({}) Tj\nT*\n", escape_pdf_text(line)));
    }
    content.push_str("ET\n");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 595 842] \
         /Resources << /Font << /F1 4 0 R >> >> /Contents 5 0 R >>"
            .to_string(),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
        format!(
            "<< /Length {} >>\nstream\n{}endstream",
            content.len(),
            content
        ),
    ];

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, object) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, object));
    }

    let xref_offset = out.len();
    out.push_str(&format!("xref\n0 {}\n", objects.len() + 1));
    out.push_str("0000000000 65535 f \n");
    for offset in offsets {
        out.push_str(&format!("{offset:010} 00000 n \n"));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_offset
    ));

    out.into_bytes()
}

fn escape_pdf_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
}
