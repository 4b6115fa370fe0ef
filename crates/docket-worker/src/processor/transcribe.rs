//! Audio and video transcription jobs.

use docket_cache::create_key;
use docket_inference::InferenceRequest;
use docket_models::{content_hash, DocumentStatus};
use docket_ratelimit::estimate_audio_unit_cost;
use serde::Serialize;
use serde_json::Value;

use super::prompts::TRANSCRIPTION_INSTRUCTIONS;
use super::JobContext;
use crate::error::WorkerResult;

#[derive(Serialize)]
struct TranscribeKey<'a> {
    model: &'a str,
}

pub(super) async fn run(ctx: &JobContext<'_>) -> WorkerResult<()> {
    let services = ctx.services;
    let model = ctx.config.transcription_model.as_str();
    let document = ctx.load_document().await?;
    ctx.logger.log_start(&format!(
        "transcribing {} ({})",
        document.filename, document.mime_type
    ));

    services
        .documents
        .set_status(&document.id, DocumentStatus::Processing)
        .await?;
    ctx.report_progress(5).await;

    let bytes = services.blobs.download(&document.blob_path, None).await?;
    let hash = content_hash(&bytes);
    let key = create_key("transcribe", &hash, &TranscribeKey { model });
    ctx.report_progress(20).await;

    let transcript = match services.cache.get(&key).await {
        Some(Value::String(cached)) => {
            ctx.logger.log_progress("transcript cache hit");
            cached
        }
        _ => {
            let audio = services
                .transcoder
                .transcode_to_mono_wav(
                    bytes,
                    &document.mime_type,
                    services.transcoder.config().max_output_bytes,
                )
                .await?;
            ctx.report_progress(50).await;

            let estimate = estimate_audio_unit_cost(audio.bytes.len());
            let request = InferenceRequest::audio(model, audio.bytes, audio.mime_type)
                .with_instructions(TRANSCRIPTION_INSTRUCTIONS);
            let response = ctx.generate_metered(&request, estimate).await?;

            let transcript = response.text.trim().to_string();
            services
                .cache
                .set(key, Value::String(transcript.clone()))
                .await;
            transcript
        }
    };

    ctx.report_progress(90).await;
    services
        .documents
        .save_transcript(&document.id, &transcript, &hash)
        .await?;
    services
        .documents
        .set_status(&document.id, DocumentStatus::Complete)
        .await?;
    ctx.report_progress(100).await;

    ctx.logger.log_completion(&format!(
        "{} characters transcribed",
        transcript.chars().count()
    ));

    if !transcript.is_empty() {
        ctx.enqueue_analysis(&document.id).await?;
    }
    Ok(())
}
