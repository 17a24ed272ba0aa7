//! Model gateway: paced, cached, cancellable access to the external model.
//!
//! Every dispatch goes through the same pipeline:
//! cache lookup (text-only, opt-out per request) -> pacer turn -> backend
//! call bounded by the request timeout, raced against the caller's
//! cancellation token. Only successful, non-empty responses are cached.

pub mod backend;
pub mod cache;
pub mod gemini;
pub mod pacer;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{GenerationError, GenerationErrorKind};
use crate::metrics;

pub use backend::{BackendRequest, GenerationParams, ImageInput, ModelBackend};
use cache::{CacheKey, ResponseCache};
use pacer::RequestPacer;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub min_request_interval: Duration,
    pub request_timeout: Duration,
    pub cache_capacity: u64,
    pub cache_ttl: Duration,
    pub default_params: GenerationParams,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            min_request_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(60),
            cache_capacity: 256,
            cache_ttl: Duration::from_secs(3600),
            default_params: GenerationParams::default(),
        }
    }
}

/// A text generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub params: GenerationParams,
    pub use_cache: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            params: GenerationParams::default(),
            use_cache: true,
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.params.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.params.max_tokens = max_tokens;
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.params.top_p = Some(top_p);
        self
    }

    pub fn top_k(mut self, top_k: u32) -> Self {
        self.params.top_k = Some(top_k);
        self
    }

    pub fn stop_sequence(mut self, stop: impl Into<String>) -> Self {
        self.params.stop_sequences.push(stop.into());
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    /// True when served from the response cache without a dispatch.
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub model_name: String,
    pub last_dispatch: Option<DateTime<Utc>>,
}

pub struct ModelGateway {
    backend: Arc<dyn ModelBackend>,
    cache: ResponseCache,
    pacer: RequestPacer,
    config: GatewayConfig,
}

impl ModelGateway {
    pub fn new(backend: Arc<dyn ModelBackend>, config: GatewayConfig) -> Self {
        info!(
            "Model gateway ready: model={}, interval={:?}, timeout={:?}, cache={} entries/{:?}",
            backend.model_name(),
            config.min_request_interval,
            config.request_timeout,
            config.cache_capacity,
            config.cache_ttl
        );
        Self {
            cache: ResponseCache::new(config.cache_capacity, config.cache_ttl),
            pacer: RequestPacer::new(config.min_request_interval),
            backend,
            config,
        }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// A request for `prompt` carrying the configured default parameters.
    pub fn request(&self, prompt: impl Into<String>) -> GenerationRequest {
        GenerationRequest::new(prompt).with_params(self.config.default_params.clone())
    }

    pub async fn generate(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<Generation, GenerationError> {
        let key = CacheKey::derive(self.model_name(), &request.prompt, &request.params);
        let backend_request = BackendRequest {
            prompt: request.prompt,
            image: None,
            params: request.params,
        };

        if !request.use_cache {
            let text = self.cancellable(cancel, self.send(&backend_request)).await?;
            return Ok(Generation { text, cached: false });
        }

        // identical requests in flight share one dispatch
        let (text, cached) = self
            .cancellable(cancel, self.cache.get_or_load(key, self.send(&backend_request)))
            .await?;
        if cached {
            debug!("Cache hit for {}", key.to_hex());
        }
        Ok(Generation { text, cached })
    }

    /// Image prompts are paced and bounded like text prompts but never cached.
    pub async fn generate_with_image(
        &self,
        image: ImageInput,
        prompt: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<Generation, GenerationError> {
        let backend_request = BackendRequest {
            prompt: prompt.into(),
            image: Some(image),
            params: self.config.default_params.clone(),
        };
        let text = self.cancellable(cancel, self.send(&backend_request)).await?;
        Ok(Generation { text, cached: false })
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("Response cache cleared");
    }

    pub async fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.len().await,
            hits: self.cache.hits(),
            misses: self.cache.misses(),
            model_name: self.model_name().to_string(),
            last_dispatch: self.pacer.last_dispatch(),
        }
    }

    /// Race `work` against the caller's token. Dropping `work` on cancel
    /// releases any pacer slot or shared cache load it was holding.
    async fn cancellable<T, F>(&self, cancel: &CancellationToken, work: F) -> Result<T, GenerationError>
    where
        F: Future<Output = Result<T, GenerationError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                metrics::inc_dispatch(GenerationErrorKind::Cancelled.as_str());
                Err(GenerationError::cancelled())
            }
            result = work => result,
        }
    }

    async fn send(&self, request: &BackendRequest) -> Result<String, GenerationError> {
        let outcome = self.paced_call(request).await;
        match &outcome {
            Ok(_) => metrics::inc_dispatch("ok"),
            Err(e) => {
                warn!("Generation failed: {}", e);
                metrics::inc_dispatch(e.kind.as_str());
            }
        }
        outcome
    }

    async fn paced_call(&self, request: &BackendRequest) -> Result<String, GenerationError> {
        let waited = self.pacer.wait_turn().await;
        metrics::observe_pacer_wait(waited.as_secs_f64());

        debug!(
            "Dispatching to {} (prompt {} chars, image: {})",
            self.model_name(),
            request.prompt.chars().count(),
            request.image.is_some()
        );

        let timeout = self.config.request_timeout;
        let text = match tokio::time::timeout(timeout, self.backend.generate(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(GenerationError::timeout(format!(
                    "no response within {:?}",
                    timeout
                )))
            }
        };

        if text.trim().is_empty() {
            return Err(GenerationError::invalid_response("model returned no text"));
        }
        Ok(text)
    }
}
