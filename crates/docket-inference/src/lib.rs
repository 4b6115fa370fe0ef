//! Inference and text extraction clients.
//!
//! - [`InferenceClient`]: hosted model calls; [`GeminiClient`] talks to the
//!   Gemini REST API
//! - [`ExtractionService`]: raw bytes to text and chunks; [`PlainTextExtractor`]
//!   handles text files

pub mod client;
pub mod error;
pub mod extraction;
pub mod gemini;
pub mod metrics;
pub mod request;

pub use client::InferenceClient;
pub use error::{InferenceError, InferenceResult};
pub use extraction::{ExtractionService, PlainTextExtractor};
pub use gemini::{parse_json_text, GeminiClient, GeminiConfig};
pub use request::{InferenceContent, InferenceRequest, InferenceResponse};
