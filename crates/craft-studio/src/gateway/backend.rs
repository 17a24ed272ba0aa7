//! The seam between the gateway and whatever serves the model.
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;

use crate::error::GenerationError;

/// Sampling parameters that shape the model's output.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 1000,
            top_p: None,
            top_k: None,
            stop_sequences: Vec::new(),
        }
    }
}

/// Raw image bytes plus their MIME type.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInput {
    pub mime_type: String,
    pub data: Bytes,
}

impl ImageInput {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

/// One round trip to the model.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub prompt: String,
    pub image: Option<ImageInput>,
    pub params: GenerationParams,
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn model_name(&self) -> &str;

    /// Submit the request and return the generated text.
    async fn generate(&self, request: &BackendRequest) -> Result<String, GenerationError>;
}
