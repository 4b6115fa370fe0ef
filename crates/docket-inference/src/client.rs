//! Inference client seam.

use async_trait::async_trait;

use crate::error::InferenceResult;
use crate::request::{InferenceRequest, InferenceResponse};

/// A hosted model that turns text or audio into text (optionally JSON).
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn generate(&self, request: &InferenceRequest) -> InferenceResult<InferenceResponse>;
}
