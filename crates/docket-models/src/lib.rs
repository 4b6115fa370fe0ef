//! Shared data models for the Docket evidence pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, job types and the job status state machine
//! - Documents, extracted text chunks and document status
//! - Case-perspective analysis options
//! - Content hashing for cache keys

pub mod analysis;
pub mod document;
pub mod hash;
pub mod ids;
pub mod job;

pub use analysis::AnalysisOptions;
pub use document::{Document, DocumentStatus, Extraction, TextChunk};
pub use hash::content_hash;
pub use ids::{DocumentId, JobId, LeaseId, ProjectId};
pub use job::{Job, JobStatus, JobType, NewJob, UnknownVariant, DEFAULT_MAX_ATTEMPTS};
