//! Cached embedding calls.
//!
//! Wraps the embedding provider with a TTL/LRU cache keyed by a SHA-256
//! fingerprint of a length-bounded prefix of the text, and enforces the
//! one-vector-per-input contract on batched calls.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::cache::TtlCache;
use crate::core::errors::RagError;
use crate::llm::provider::EmbeddingProvider;

pub const DEFAULT_EMBEDDING_CACHE_CAPACITY: usize = 500;

const EMBEDDING_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Cache keys hash only this many leading characters; embeddings of texts
/// sharing a long identical prefix are recomputed identically anyway.
const FINGERPRINT_PREFIX_CHARS: usize = 500;

pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Mutex<TtlCache<String, Vec<f32>>>,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache_capacity: usize) -> Self {
        Self::with_ttl(provider, cache_capacity, EMBEDDING_CACHE_TTL)
    }

    pub fn with_ttl(
        provider: Arc<dyn EmbeddingProvider>,
        cache_capacity: usize,
        ttl: Duration,
    ) -> Self {
        Self {
            provider,
            cache: Mutex::new(TtlCache::new(cache_capacity, ttl)),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    fn fingerprint(text: &str) -> String {
        let prefix: String = text.chars().take(FINGERPRINT_PREFIX_CHARS).collect();
        let mut hasher = Sha256::new();
        hasher.update(prefix.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Embed a single query text, memoized for the TTL window.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let key = Self::fingerprint(text);

        if let Some(vector) = self.cache.lock().unwrap().get(&key) {
            return Ok(vector);
        }

        let vector = self.provider.embed(text).await?;
        self.cache.lock().unwrap().insert(key, vector.clone());
        Ok(vector)
    }

    /// Embed a batch of document texts. The provider must return exactly
    /// one vector per input, in input order; anything else fails the whole
    /// batch so callers never pair mismatched vectors with texts.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.provider.embed_batch(texts).await?;
        if vectors.len() != texts.len() {
            return Err(RagError::EmbeddingBatchMismatch {
                requested: texts.len(),
                received: vectors.len(),
            });
        }
        Ok(vectors)
    }
}
