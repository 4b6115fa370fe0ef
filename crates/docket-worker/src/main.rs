//! Evidence processing worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use docket_cache::ResultCache;
use docket_inference::{GeminiClient, GeminiConfig, PlainTextExtractor};
use docket_media::{check_ffmpeg, MediaTranscoder};
use docket_queue::{RedisDocumentStore, RedisJobStore, RedisStoreConfig};
use docket_ratelimit::RateLimiter;
use docket_storage::{R2CachePersistence, R2Client, DEFAULT_CACHE_PREFIX};
use docket_worker::{metrics, JobWorker, WorkerConfig, WorkerServices};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    dotenvy::dotenv().ok();
    init_tracing();

    if let Err(e) = run().await {
        error!("Worker error: {:#}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docket=info,info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
}

async fn run() -> anyhow::Result<()> {
    info!("Starting docket-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(addr) = config.metrics_addr {
        metrics::init_metrics(addr)?;
        info!(%addr, "Prometheus exporter listening");
    }

    match check_ffmpeg() {
        Ok(path) => info!(path = %path.display(), "FFmpeg found"),
        Err(e) => warn!("{}; audio will be sent untranscoded and video will fail", e),
    }

    let store_config = RedisStoreConfig::from_env();
    let jobs = RedisJobStore::connect(&store_config)
        .await
        .context("connecting job store")?;
    let documents = RedisDocumentStore::connect(&store_config)
        .await
        .context("connecting document store")?;

    let r2 = R2Client::from_env().context("creating R2 client")?;
    if let Err(e) = r2.check_connectivity().await {
        warn!(bucket = %r2.bucket(), error = %e, "Blob store unreachable at startup");
    }
    let cache_prefix =
        std::env::var("CACHE_PREFIX").unwrap_or_else(|_| DEFAULT_CACHE_PREFIX.to_string());
    let cache = ResultCache::with_persistence(
        config.cache.clone(),
        Arc::new(R2CachePersistence::new(r2.clone(), cache_prefix)),
    );

    let gemini = GeminiClient::new(GeminiConfig::from_env()?)?;

    let services = WorkerServices {
        jobs: Arc::new(jobs),
        documents: Arc::new(documents),
        blobs: Arc::new(r2),
        inference: Arc::new(gemini),
        extractor: Arc::new(PlainTextExtractor::default()),
        limiter: Arc::new(RateLimiter::new(config.rate_limits.clone())),
        cache: Arc::new(cache),
        transcoder: Arc::new(MediaTranscoder::new(config.media.clone())),
    };

    let worker = JobWorker::new(config, services);
    worker.start();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Received shutdown signal");

    worker.stop_gracefully().await;
    Ok(())
}
