use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::gateway::gemini::DEFAULT_BASE_URL;
use crate::gateway::{GatewayConfig, GenerationParams};

#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    pub app_version: String,
    pub debug_mode: bool,
    pub google_api_key: String,
    pub model_name: String,
    pub gemini_base_url: String,
    pub default_temperature: f32,
    pub default_max_tokens: u32,
    pub min_request_interval_ms: u64,
    pub request_timeout_seconds: u64,
    pub response_cache_capacity: u64,
    pub response_cache_ttl_seconds: u64,
    pub database_path: PathBuf,
    pub database_pool_size: u32,
    pub max_file_size_bytes: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Missing keys take their
    /// defaults; present but unparsable values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let google_api_key = lookup("GOOGLE_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .context("GOOGLE_API_KEY environment variable not set. Please set it in your .env file")?;

        let config = Self {
            app_name: lookup("APP_NAME").unwrap_or_else(|| "GeminiCraft Studio".into()),
            app_version: lookup("APP_VERSION").unwrap_or_else(|| "1.0.0".into()),
            debug_mode: parse_bool(&lookup, "DEBUG_MODE", false)?,
            google_api_key,
            model_name: lookup("MODEL_NAME").unwrap_or_else(|| "gemini-1.5-pro".into()),
            gemini_base_url: lookup("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            default_temperature: parse_var(&lookup, "DEFAULT_TEMPERATURE", 0.7)?,
            default_max_tokens: parse_var(&lookup, "DEFAULT_MAX_TOKENS", 2048)?,
            min_request_interval_ms: parse_var(&lookup, "MIN_REQUEST_INTERVAL_MS", 1000)?,
            request_timeout_seconds: parse_var(&lookup, "REQUEST_TIMEOUT_SECONDS", 60)?,
            response_cache_capacity: parse_var(&lookup, "RESPONSE_CACHE_CAPACITY", 256)?,
            response_cache_ttl_seconds: parse_var(&lookup, "RESPONSE_CACHE_TTL_SECONDS", 3600)?,
            database_path: lookup("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/geminicraft.db")),
            database_pool_size: parse_var(&lookup, "DATABASE_POOL_SIZE", 8)?,
            max_file_size_bytes: parse_var(&lookup, "MAX_FILE_SIZE_BYTES", 50 * 1024 * 1024)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_temperature) {
            return Err(anyhow::anyhow!(
                "DEFAULT_TEMPERATURE must be between 0.0 and 2.0, got {}",
                self.default_temperature
            ));
        }
        if self.default_max_tokens == 0 {
            return Err(anyhow::anyhow!("DEFAULT_MAX_TOKENS must be greater than zero"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("REQUEST_TIMEOUT_SECONDS must be greater than zero"));
        }
        if self.database_pool_size == 0 {
            return Err(anyhow::anyhow!("DATABASE_POOL_SIZE must be greater than zero"));
        }
        Ok(())
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            min_request_interval: Duration::from_millis(self.min_request_interval_ms),
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
            cache_capacity: self.response_cache_capacity,
            cache_ttl: Duration::from_secs(self.response_cache_ttl_seconds),
            default_params: GenerationParams {
                temperature: self.default_temperature,
                max_tokens: self.default_max_tokens,
                ..GenerationParams::default()
            },
        }
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- App: {} v{}", self.app_name, self.app_version);
        info!("- Debug Mode: {}", self.debug_mode);
        info!("- API Key: {}", redact(&self.google_api_key));
        info!("- Model: {}", self.model_name);
        info!("- Endpoint: {}", self.gemini_base_url);
        info!("- Temperature: {}", self.default_temperature);
        info!("- Max Tokens: {}", self.default_max_tokens);
        info!("- Min Request Interval: {}ms", self.min_request_interval_ms);
        info!("- Request Timeout: {}s", self.request_timeout_seconds);
        info!(
            "- Response Cache: {} entries, {}s TTL",
            self.response_cache_capacity, self.response_cache_ttl_seconds
        );
        info!("- Database: {}", self.database_path.display());
        info!("- Database Pool: {}", self.database_pool_size);
        info!("- Max File Size: {} bytes", self.max_file_size_bytes);
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).map(|raw| raw.trim().to_lowercase()) {
        None => Ok(default),
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(anyhow::anyhow!("Invalid value for {}: {:?}", key, raw)),
        },
    }
}

fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}
