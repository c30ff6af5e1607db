//! Dimension Service (spec C1)
//!
//! Reconciles heterogeneous embeddings with the store's single declared
//! vector dimension: discovery with a bounded TTL cache, and a deterministic
//! projection (random-projection expansion, bucket-average contraction) for
//! whenever an embedding doesn't already match.

mod projection;

pub use projection::{project, ProjectionMatrix};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::store::{Storage, StoreError};

/// Dimension service error kinds (spec section 7)
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum DimensionError {
    /// Neither store metadata, provider native dimension, nor a probe embed
    /// could determine a target dimension.
    #[error("could not determine target embedding dimension")]
    DimensionUnknown,
    /// A projection produced a vector whose length doesn't match the target.
    #[error("dimension mismatch after projection: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// The underlying store failed while answering a metadata query.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

const DISCOVERY_TTL: Duration = Duration::from_secs(60);

/// Discovers and caches the store's declared embedding dimension, and
/// projects embeddings of a different length onto it.
pub struct DimensionService {
    cached: Mutex<Option<(usize, Instant)>>,
    matrices: Mutex<HashMap<(usize, usize), ProjectionMatrix>>,
}

impl Default for DimensionService {
    fn default() -> Self {
        Self::new()
    }
}

impl DimensionService {
    /// Create a new, empty dimension service.
    pub fn new() -> Self {
        Self {
            cached: Mutex::new(None),
            matrices: Mutex::new(HashMap::new()),
        }
    }

    /// Force the next `discover` call to re-query the store, e.g. after a
    /// schema-change signal (spec section 5, "Global state").
    pub fn invalidate(&self) {
        *self.cached.lock().unwrap() = None;
        self.matrices.lock().unwrap().clear();
    }

    /// Discover the target dimension.
    ///
    /// Order of strategies: (1) cached value within TTL, (2) the store's
    /// declared dimension, (3) the embedding provider's native dimension,
    /// (4) embedding a probe string and measuring its length.
    pub fn discover(
        &self,
        store: &Storage,
        provider: Option<&dyn EmbeddingProvider>,
    ) -> Result<usize, DimensionError> {
        {
            let cached = self.cached.lock().unwrap();
            if let Some((dim, at)) = *cached {
                if at.elapsed() < DISCOVERY_TTL {
                    return Ok(dim);
                }
            }
        }

        if let Some(dim) = store.declared_embedding_dimension()? {
            self.cache(dim);
            return Ok(dim);
        }

        if let Some(provider) = provider {
            if let Some(dim) = provider.native_dimension() {
                self.cache(dim);
                return Ok(dim);
            }
            if let Ok(probe) = provider.embed("specmem dimension probe") {
                let dim = probe.len();
                if dim > 0 {
                    self.cache(dim);
                    return Ok(dim);
                }
            }
        }

        Err(DimensionError::DimensionUnknown)
    }

    fn cache(&self, dim: usize) {
        *self.cached.lock().unwrap() = Some((dim, Instant::now()));
    }

    /// Project `vector` onto `target` dimensions, caching the projection
    /// matrix used for expansions.
    pub fn project(&self, vector: &[f32], target: usize) -> Vec<f32> {
        let m = vector.len();
        if m == target {
            return vector.to_vec();
        }
        if m < target {
            let mut matrices = self.matrices.lock().unwrap();
            let matrix = matrices
                .entry((m, target))
                .or_insert_with(|| ProjectionMatrix::deterministic(m, target));
            matrix.expand(vector)
        } else {
            projection::contract(vector, target)
        }
    }

    /// Validate-and-prepare: given a vector and (optionally) the original
    /// text it was embedded from, return a vector matching `target`
    /// dimensions plus whether a modification occurred.
    ///
    /// Re-embedding is preferred over projection when `original_text` and a
    /// provider are both available (spec section 4.1).
    pub fn validate_and_prepare(
        &self,
        vector: &[f32],
        target: usize,
        original_text: Option<&str>,
        provider: Option<&dyn EmbeddingProvider>,
    ) -> (Vec<f32>, bool) {
        if vector.len() == target {
            return (vector.to_vec(), false);
        }

        if let (Some(text), Some(provider)) = (original_text, provider) {
            if let Ok(re_embedded) = provider.embed(text) {
                if re_embedded.len() == target {
                    return (re_embedded, true);
                }
                return (self.project(&re_embedded, target), true);
            }
        }

        (self.project(vector, target), true)
    }
}

impl From<EmbeddingError> for DimensionError {
    fn from(_: EmbeddingError) -> Self {
        DimensionError::DimensionUnknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Storage;

    #[test]
    fn no_projection_when_lengths_match() {
        let svc = DimensionService::new();
        let v = vec![0.1, 0.2, 0.3];
        assert_eq!(svc.project(&v, 3), v);
    }

    #[test]
    fn discovery_prefers_store_metadata() {
        let storage = Storage::open_in_memory().unwrap();
        storage.set_declared_embedding_dimension(384).unwrap();
        let svc = DimensionService::new();
        assert_eq!(svc.discover(&storage, None).unwrap(), 384);
    }

    #[test]
    fn discovery_fails_cleanly_when_unknown() {
        let storage = Storage::open_in_memory().unwrap();
        let svc = DimensionService::new();
        assert!(matches!(
            svc.discover(&storage, None),
            Err(DimensionError::DimensionUnknown)
        ));
    }
}
