//! Case analysis jobs.

use docket_cache::create_key;
use docket_inference::{parse_json_text, InferenceRequest};
use docket_models::{content_hash, AnalysisOptions};
use docket_ratelimit::estimate_unit_cost;

use super::prompts::{analysis_prompt, analysis_schema, ANALYSIS_INSTRUCTIONS};
use super::JobContext;
use crate::error::{WorkerError, WorkerResult};

pub(super) async fn run(ctx: &JobContext<'_>) -> WorkerResult<()> {
    let services = ctx.services;
    let document = ctx.load_document().await?;
    let text = document
        .analyzable_text()
        .ok_or_else(|| WorkerError::MissingText(document.id.clone()))?;

    let hash = document
        .content_hash
        .clone()
        .unwrap_or_else(|| content_hash(text.as_bytes()));
    let options = AnalysisOptions::from_job_options(&ctx.job.options);
    let key = create_key("analyze", &hash, &options);

    ctx.report_progress(10).await;

    let analysis = match services.cache.get(&key).await {
        Some(cached) => {
            ctx.logger.log_progress("analysis cache hit");
            cached
        }
        None => {
            let model = &ctx.config.analysis_model;
            let prompt = analysis_prompt(&document, text, &options);
            let estimate = estimate_unit_cost(&prompt) + estimate_unit_cost(ANALYSIS_INSTRUCTIONS);

            let request = InferenceRequest::text(model.as_str(), prompt)
                .with_instructions(ANALYSIS_INSTRUCTIONS)
                .with_schema(analysis_schema());

            ctx.report_progress(30).await;
            let response = ctx.generate_metered(&request, estimate).await?;

            let analysis = match response.json {
                Some(json) => json,
                None => parse_json_text(&response.text)?,
            };
            services.cache.set(key, analysis.clone()).await;
            analysis
        }
    };

    ctx.report_progress(90).await;
    services
        .documents
        .save_analysis(&document.id, &analysis)
        .await?;
    ctx.report_progress(100).await;

    ctx.logger.log_completion("analysis saved");
    Ok(())
}
