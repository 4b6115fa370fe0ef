//! Gemini `generateContent` client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::client::InferenceClient;
use crate::error::{InferenceError, InferenceResult};
use crate::metrics;
use crate::request::{InferenceContent, InferenceRequest, InferenceResponse};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini API configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(300),
        }
    }

    /// Load from `GEMINI_API_KEY`, `GEMINI_BASE_URL` and `GEMINI_TIMEOUT_SECS`.
    pub fn from_env() -> InferenceResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| InferenceError::config_error("GEMINI_API_KEY not set"))?;

        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("GEMINI_BASE_URL") {
            config.base_url = base_url;
        }
        config.timeout = std::env::var("GEMINI_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(config.timeout);
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

pub struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> InferenceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| InferenceError::config_error(format!("HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        )
    }

    async fn call(&self, request: &InferenceRequest) -> InferenceResult<InferenceResponse> {
        let body = GeminiRequest::from_request(request);

        let response = self
            .http
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::request_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::UpstreamRejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::invalid_response(e.to_string()))?;

        let text = parsed.text().ok_or_else(|| {
            InferenceError::invalid_response("No text content in Gemini response")
        })?;

        let json = match request.schema {
            Some(_) => Some(parse_json_text(&text)?),
            None => None,
        };

        Ok(InferenceResponse {
            text,
            json,
            usage: parsed
                .usage_metadata
                .and_then(|u| u.total_token_count),
        })
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    async fn generate(&self, request: &InferenceRequest) -> InferenceResult<InferenceResponse> {
        let start = Instant::now();
        let result = self.call(request).await;

        match &result {
            Ok(response) => {
                metrics::record_request(&request.model, "success", start.elapsed());
                if let Some(units) = response.usage {
                    metrics::record_units(&request.model, units);
                }
                debug!(
                    model = %request.model,
                    usage = ?response.usage,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Gemini request complete"
                );
            }
            Err(e) => {
                metrics::record_request(&request.model, "error", start.elapsed());
                warn!(model = %request.model, error = %e, "Gemini request failed");
            }
        }

        result
    }
}

/// Parse model text as JSON, tolerating a markdown code fence around it.
pub fn parse_json_text(text: &str) -> InferenceResult<serde_json::Value> {
    serde_json::from_str(strip_code_fence(text))
        .map_err(|e| InferenceError::invalid_response(format!("Response is not valid JSON: {}", e)))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl GeminiRequest {
    fn from_request(request: &InferenceRequest) -> Self {
        let part = match &request.content {
            InferenceContent::Text(text) => Part::Text { text: text.clone() },
            InferenceContent::Audio { data, mime_type } => Part::InlineData {
                inline_data: InlineData {
                    mime_type: mime_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(data),
                },
            },
        };

        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![part],
            }],
            system_instruction: request.instructions.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part::Text { text: text.clone() }],
            }),
            generation_config: request.schema.as_ref().map(|schema| GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: schema.clone(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

impl GeminiResponse {
    fn text(&self) -> Option<String> {
        let parts = &self.candidates.first()?.content.as_ref()?.parts;
        let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    total_token_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new(GeminiConfig::new("test-key").with_base_url(server.uri()))
            .expect("client")
    }

    fn reply(text: &str, tokens: u64) -> serde_json::Value {
        json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }],
            "usageMetadata": { "totalTokenCount": tokens }
        })
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_generate_json_with_schema() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "generationConfig": { "responseMimeType": "application/json" }
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(reply("```json\n{\"summary\":\"ok\"}\n```", 42)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let request = InferenceRequest::text("gemini-test", "hello")
            .with_instructions("Summarize")
            .with_schema(json!({"type": "object"}));
        let response = client_for(&server).generate(&request).await.unwrap();

        assert_eq!(response.json, Some(json!({"summary": "ok"})));
        assert_eq!(response.usage, Some(42));
    }

    #[tokio::test]
    async fn test_audio_is_sent_inline() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "contents": [{
                    "role": "user",
                    "parts": [{ "inlineData": { "mimeType": "audio/wav", "data": "AQID" } }]
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("transcript", 7)))
            .expect(1)
            .mount(&server)
            .await;

        let request = InferenceRequest::audio("gemini-test", vec![1, 2, 3], "audio/wav");
        let response = client_for(&server).generate(&request).await.unwrap();

        assert_eq!(response.text, "transcript");
        assert!(response.json.is_none());
    }

    #[tokio::test]
    async fn test_http_error_is_upstream_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .mount(&server)
            .await;

        let request = InferenceRequest::text("gemini-test", "hello");
        let err = client_for(&server).generate(&request).await.unwrap_err();

        match err {
            InferenceError::UpstreamRejected { status, ref body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "quota");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_json_with_schema() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("not json", 3)))
            .mount(&server)
            .await;

        let request =
            InferenceRequest::text("gemini-test", "hello").with_schema(json!({"type": "object"}));
        let err = client_for(&server).generate(&request).await.unwrap_err();
        assert!(matches!(err, InferenceError::InvalidResponse(_)));
    }
}
