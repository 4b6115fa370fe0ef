//! Uploaded evidence documents and their derived text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{DocumentId, ProjectId};

/// Processing status of a document row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    #[default]
    Pending,
    Processing,
    Complete,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Complete => "complete",
            DocumentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A slice of extracted text with its position in the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub index: u32,
    pub text: String,
    /// Byte offset of the chunk in the full extracted text
    pub start: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Output of the extraction service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extraction {
    pub text: String,
    pub chunks: Vec<TextChunk>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// An uploaded evidence file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub project_id: ProjectId,
    pub filename: String,
    pub mime_type: String,
    /// Path of the raw bytes in the blob store
    pub blob_path: String,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(default)]
    pub chunks: Vec<TextChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Progress percentage (0-100)
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        project_id: ProjectId,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        blob_path: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DocumentId::new(),
            project_id,
            filename: filename.into(),
            mime_type: mime_type.into(),
            blob_path: blob_path.into(),
            size_bytes,
            extracted_text: None,
            chunks: Vec::new(),
            content_hash: None,
            analysis: None,
            transcript: None,
            status: DocumentStatus::Pending,
            error_message: None,
            progress: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the upload is audio or video and needs transcription.
    pub fn is_media(&self) -> bool {
        self.mime_type.starts_with("audio/") || self.mime_type.starts_with("video/")
    }

    /// Text to analyze: extracted text, falling back to the transcript.
    pub fn analyzable_text(&self) -> Option<&str> {
        let non_empty = |t: &&str| !t.trim().is_empty();
        self.extracted_text
            .as_deref()
            .filter(non_empty)
            .or_else(|| self.transcript.as_deref().filter(non_empty))
    }
}
