//! Provider-neutral inference request and response types.

use serde::{Deserialize, Serialize};

/// What the model is asked to read.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceContent {
    Text(String),
    Audio { data: Vec<u8>, mime_type: String },
}

#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub model: String,
    pub content: InferenceContent,
    /// System-level instructions
    pub instructions: Option<String>,
    /// JSON schema the response must follow
    pub schema: Option<serde_json::Value>,
}

impl InferenceRequest {
    pub fn text(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            content: InferenceContent::Text(text.into()),
            instructions: None,
            schema: None,
        }
    }

    pub fn audio(model: impl Into<String>, data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            content: InferenceContent::Audio {
                data,
                mime_type: mime_type.into(),
            },
            instructions: None,
            schema: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    /// Raw model text
    pub text: String,
    /// Parsed JSON, present when a schema was requested
    pub json: Option<serde_json::Value>,
    /// Units actually consumed, when the provider reports them
    pub usage: Option<u64>,
}
