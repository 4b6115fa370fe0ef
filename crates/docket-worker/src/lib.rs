//! Evidence processing worker.
//!
//! Polls the shared job store, claims jobs with an atomic conditional
//! update and runs them:
//! - `extract`: blob bytes to text and chunks
//! - `analyze`: case analysis through the cache and rate limiter
//! - `transcribe`: media to mono WAV to transcript

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod observer;
pub mod processor;
pub mod services;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use observer::JobObserver;
pub use services::WorkerServices;
pub use worker::{JobOutcome, JobWorker, LEASE_EXPIRED_MESSAGE};
