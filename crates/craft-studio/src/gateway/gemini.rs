//! Gemini backend over the Generative Language REST API.
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::GenerationError;
use crate::gateway::backend::{BackendRequest, ModelBackend};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig<'a>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    Image {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "no_stops")]
    stop_sequences: &'a [String],
}

fn no_stops(stops: &&[String]) -> bool {
    stops.is_empty()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl GeminiBackend {
    pub fn new(
        api_key: &str,
        model: impl Into<String>,
        base_url: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        let mut key = header::HeaderValue::from_str(api_key)
            .context("API key is not a valid header value")?;
        key.set_sensitive(true);
        headers.insert("x-goog-api-key", key);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &BackendRequest) -> Result<String, GenerationError> {
        let mut parts = Vec::with_capacity(2);
        if let Some(image) = &request.image {
            parts.push(Part::Image {
                inline_data: InlineData {
                    mime_type: &image.mime_type,
                    data: image.to_base64(),
                },
            });
        }
        parts.push(Part::Text { text: &request.prompt });

        let body = GenerateContentRequest {
            contents: vec![Content { role: "user", parts }],
            generation_config: GenerationConfig {
                temperature: request.params.temperature,
                max_output_tokens: request.params.max_tokens,
                top_p: request.params.top_p,
                top_k: request.params.top_k,
                stop_sequences: &request.params.stop_sequences,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let raw = response.text().await.map_err(map_transport_error)?;
        debug!("Gemini responded {} ({} bytes)", status, raw.len());

        if !status.is_success() {
            return Err(map_status_error(status, &raw));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&raw)
            .map_err(|e| GenerationError::invalid_response(format!("undecodable response: {}", e)))?;
        extract_text(parsed)
    }
}

fn map_transport_error(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::timeout(err.to_string())
    } else if err.is_decode() {
        GenerationError::invalid_response(err.to_string())
    } else {
        GenerationError::unknown(err.to_string())
    }
}

fn map_status_error(status: StatusCode, raw: &str) -> GenerationError {
    let api_error = serde_json::from_str::<ErrorEnvelope>(raw).ok().map(|e| e.error);
    let message = match &api_error {
        Some(e) if !e.message.is_empty() => format!("{}: {}", status, e.message),
        _ => format!("{}: {}", status, raw.trim()),
    };
    let exhausted = api_error
        .as_ref()
        .is_some_and(|e| e.status == "RESOURCE_EXHAUSTED");

    if status == StatusCode::TOO_MANY_REQUESTS || exhausted {
        GenerationError::quota(message)
    } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        GenerationError::timeout(message)
    } else {
        GenerationError::unknown(message)
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, GenerationError> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates".to_string());
        return Err(GenerationError::invalid_response(format!(
            "response contained no candidates ({})",
            reason
        )));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(GenerationError::invalid_response(format!(
            "candidate carried no text (finish reason: {})",
            reason
        )));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationErrorKind;
    use crate::gateway::backend::{GenerationParams, ImageInput};
    use mockito::Matcher;
    use serde_json::json;

    const MODEL: &str = "gemini-test";
    const PATH: &str = "/models/gemini-test:generateContent";

    fn backend(server: &mockito::ServerGuard) -> GeminiBackend {
        GeminiBackend::new("test-key", MODEL, &server.url(), Duration::from_secs(5)).unwrap()
    }

    fn text_request(prompt: &str) -> BackendRequest {
        BackendRequest {
            prompt: prompt.to_string(),
            image: None,
            params: GenerationParams::default(),
        }
    }

    #[tokio::test]
    async fn test_successful_generation() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", PATH)
            .match_header("x-goog-api-key", "test-key")
            .match_body(Matcher::PartialJson(json!({
                "contents": [{"role": "user", "parts": [{"text": "hello"}]}],
                "generationConfig": {"maxOutputTokens": 1000}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "candidates": [{
                        "content": {"role": "model", "parts": [{"text": "Hi "}, {"text": "there"}]},
                        "finishReason": "STOP"
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let text = backend(&server).generate(&text_request("hello")).await.unwrap();
        assert_eq!(text, "Hi there");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_image_sent_as_inline_data() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", PATH)
            .match_body(Matcher::PartialJson(json!({
                "contents": [{"role": "user", "parts": [
                    {"inlineData": {"mimeType": "image/png", "data": "AQID"}},
                    {"text": "describe"}
                ]}]
            })))
            .with_status(200)
            .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"a cat"}]}}]}"#)
            .create_async()
            .await;

        let request = BackendRequest {
            prompt: "describe".into(),
            image: Some(ImageInput::new("image/png", vec![1u8, 2, 3])),
            params: GenerationParams::default(),
        };
        assert_eq!(backend(&server).generate(&request).await.unwrap(), "a cat");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rate_limit_maps_to_quota() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .with_status(429)
            .with_body(
                r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#,
            )
            .create_async()
            .await;

        let err = backend(&server).generate(&text_request("x")).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Quota);
        assert!(err.message.contains("Quota exceeded"));
    }

    #[tokio::test]
    async fn test_resource_exhausted_status_maps_to_quota() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .with_status(403)
            .with_body(r#"{"error":{"code":403,"message":"daily limit","status":"RESOURCE_EXHAUSTED"}}"#)
            .create_async()
            .await;

        let err = backend(&server).generate(&text_request("x")).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Quota);
    }

    #[tokio::test]
    async fn test_server_error_maps_to_unknown() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .with_status(500)
            .with_body("internal")
            .create_async()
            .await;

        let err = backend(&server).generate(&text_request("x")).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::Unknown);
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = backend(&server).generate(&text_request("x")).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::InvalidResponse);
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_invalid_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", PATH)
            .with_status(200)
            .with_body(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)
            .create_async()
            .await;

        let err = backend(&server).generate(&text_request("x")).await.unwrap_err();
        assert_eq!(err.kind, GenerationErrorKind::InvalidResponse);
        assert!(err.message.contains("SAFETY"));
    }

    #[test]
    fn test_optional_params_are_omitted() {
        let stops = Vec::new();
        let config = GenerationConfig {
            temperature: 0.5,
            max_output_tokens: 64,
            top_p: None,
            top_k: None,
            stop_sequences: &stops,
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value, json!({"temperature": 0.5, "maxOutputTokens": 64}));
    }
}
