//! Embedding Cache (spec C3 / section 4.3)
//!
//! LRU cache over `(provider_id, text)` so repeated ingestion of the same
//! content (e.g. a file re-saved with no edits) skips the embedding call.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use sha2::{Digest, Sha256};

use super::provider::{EmbeddingError, EmbeddingProvider};

const DEFAULT_CAPACITY: usize = 4096;
/// Per-item budget for a batch call before the cache gives up on remaining
/// items and returns individual timeouts for them (spec section 5, "bounded
/// work per call").
const BATCH_ITEM_BUDGET: Duration = Duration::from_millis(2000);

fn cache_key(provider_id: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Wraps an [`EmbeddingProvider`] with an LRU cache of recent results.
pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbeddingCache {
    /// Wrap `provider` with the default cache capacity.
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self::with_capacity(provider, DEFAULT_CAPACITY)
    }

    /// Wrap `provider` with a specific cache capacity.
    pub fn with_capacity(provider: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            provider,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The provider id this cache is keyed under.
    pub fn provider_id(&self) -> &str {
        self.provider.provider_id()
    }

    /// Embed `text`, serving from cache when the same text has already been
    /// embedded by this provider.
    pub fn get_or_embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let key = cache_key(self.provider.provider_id(), text);
        if let Some(hit) = self.cache.lock().unwrap().get(&key) {
            return Ok(hit.clone());
        }
        let vector = self.provider.embed(text)?;
        if vector.is_empty() {
            return Err(EmbeddingError::EmptyEmbedding);
        }
        self.cache.lock().unwrap().put(key, vector.clone());
        Ok(vector)
    }

    /// Embed a batch, filling in cache hits first and only calling the
    /// provider for misses. Each miss gets `BATCH_ITEM_BUDGET`; once the
    /// cumulative budget for the batch is exhausted, remaining misses are
    /// reported as timeouts rather than blocking indefinitely.
    pub fn get_or_embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        let mut results: Vec<Option<Result<Vec<f32>, EmbeddingError>>> =
            texts.iter().map(|_| None).collect();
        let mut misses = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = cache_key(self.provider.provider_id(), text);
            if let Some(hit) = self.cache.lock().unwrap().get(&key) {
                results[i] = Some(Ok(hit.clone()));
            } else {
                misses.push(i);
            }
        }

        let deadline = Instant::now() + BATCH_ITEM_BUDGET * misses.len().max(1) as u32;
        let miss_texts: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
        let embedded = self.provider.embed_batch(&miss_texts);

        for (slot, result) in misses.into_iter().zip(embedded.into_iter()) {
            if Instant::now() > deadline {
                results[slot] = Some(Err(EmbeddingError::Timeout(BATCH_ITEM_BUDGET)));
                continue;
            }
            match result {
                Ok(vector) if !vector.is_empty() => {
                    let key = cache_key(self.provider.provider_id(), &texts[slot]);
                    self.cache.lock().unwrap().put(key, vector.clone());
                    results[slot] = Some(Ok(vector));
                }
                Ok(_) => results[slot] = Some(Err(EmbeddingError::EmptyEmbedding)),
                Err(e) => results[slot] = Some(Err(e)),
            }
        }

        results.into_iter().map(|r| r.unwrap()).collect()
    }

    /// Drop all cached entries, e.g. when the provider or its model changes.
    pub fn clear(&self) {
        self.cache.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        calls: Mutex<usize>,
    }

    impl EmbeddingProvider for FixedProvider {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            *self.calls.lock().unwrap() += 1;
            Ok(vec![text.len() as f32, 1.0, 2.0])
        }

        fn provider_id(&self) -> &str {
            "fixed-test-provider"
        }
    }

    #[test]
    fn repeated_text_hits_cache() {
        let provider = Arc::new(FixedProvider {
            calls: Mutex::new(0),
        });
        let cache = EmbeddingCache::new(provider.clone());
        cache.get_or_embed("hello").unwrap();
        cache.get_or_embed("hello").unwrap();
        cache.get_or_embed("hello").unwrap();
        assert_eq!(*provider.calls.lock().unwrap(), 1);
    }

    #[test]
    fn distinct_text_misses_cache() {
        let provider = Arc::new(FixedProvider {
            calls: Mutex::new(0),
        });
        let cache = EmbeddingCache::new(provider.clone());
        cache.get_or_embed("hello").unwrap();
        cache.get_or_embed("goodbye").unwrap();
        assert_eq!(*provider.calls.lock().unwrap(), 2);
    }

    #[test]
    fn batch_dedups_against_cache() {
        let provider = Arc::new(FixedProvider {
            calls: Mutex::new(0),
        });
        let cache = EmbeddingCache::new(provider.clone());
        cache.get_or_embed("a").unwrap();
        let results = cache.get_or_embed_batch(&["a".to_string(), "b".to_string()]);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert_eq!(*provider.calls.lock().unwrap(), 2);
    }
}
