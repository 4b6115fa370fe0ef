//! Text extraction jobs.

use docket_models::{content_hash, DocumentStatus};

use super::JobContext;
use crate::error::WorkerResult;

pub(super) async fn run(ctx: &JobContext<'_>) -> WorkerResult<()> {
    let services = ctx.services;
    let document = ctx.load_document().await?;
    ctx.logger.log_start(&format!(
        "extracting {} ({}, {} bytes)",
        document.filename, document.mime_type, document.size_bytes
    ));

    services
        .documents
        .set_status(&document.id, DocumentStatus::Processing)
        .await?;
    ctx.report_progress(10).await;

    let bytes = services.blobs.download(&document.blob_path, None).await?;
    ctx.report_progress(40).await;

    let extraction = services
        .extractor
        .extract_text(&bytes, &document.mime_type, &document.filename)
        .await?;
    let hash = content_hash(&bytes);
    ctx.report_progress(80).await;

    services
        .documents
        .save_extraction(&document.id, &extraction, &hash)
        .await?;
    services
        .documents
        .set_status(&document.id, DocumentStatus::Complete)
        .await?;
    ctx.report_progress(100).await;

    ctx.logger.log_completion(&format!(
        "{} characters in {} chunks",
        extraction.text.chars().count(),
        extraction.chunks.len()
    ));

    if !extraction.text.trim().is_empty() {
        ctx.enqueue_analysis(&document.id).await?;
    }
    Ok(())
}
