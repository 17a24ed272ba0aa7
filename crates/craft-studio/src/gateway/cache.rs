//! Bounded response cache keyed by a digest of every output-affecting
//! request parameter.
use moka::future::Cache;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::GenerationError;
use crate::gateway::backend::GenerationParams;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    /// blake3 over a length-prefixed encoding of the model name, the prompt
    /// and every sampling parameter, so that no two distinct requests share
    /// a key.
    pub fn derive(model: &str, prompt: &str, params: &GenerationParams) -> Self {
        let mut hasher = blake3::Hasher::new();
        write_field(&mut hasher, model.as_bytes());
        write_field(&mut hasher, prompt.as_bytes());
        write_field(&mut hasher, &params.temperature.to_bits().to_le_bytes());
        write_field(&mut hasher, &params.max_tokens.to_le_bytes());
        match params.top_p {
            Some(top_p) => write_field(&mut hasher, &top_p.to_bits().to_le_bytes()),
            None => write_field(&mut hasher, &[]),
        }
        match params.top_k {
            Some(top_k) => write_field(&mut hasher, &top_k.to_le_bytes()),
            None => write_field(&mut hasher, &[]),
        }
        hasher.update(&(params.stop_sequences.len() as u64).to_le_bytes());
        for stop in &params.stop_sequences {
            write_field(&mut hasher, stop.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

fn write_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

pub struct ResponseCache {
    entries: Cache<CacheKey, String>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the cached text for `key`, or run `load` to produce it.
    ///
    /// Concurrent callers for the same key share a single `load`; the others
    /// wait for its result. A failed load is never stored and its error is
    /// handed to every waiter. The flag is true when the text came from the
    /// cache or from another caller's load.
    pub async fn get_or_load<F>(&self, key: CacheKey, load: F) -> Result<(String, bool), GenerationError>
    where
        F: Future<Output = Result<String, GenerationError>>,
    {
        let entry = match self.entries.entry(key).or_try_insert_with(load).await {
            Ok(entry) => entry,
            Err(e) => {
                self.record_miss();
                return Err((*e).clone());
            }
        };
        let cached = !entry.is_fresh();
        if cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::inc_cache_lookup("hit");
        } else {
            self.record_miss();
        }
        Ok((entry.into_value(), cached))
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::inc_cache_lookup("miss");
    }

    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
