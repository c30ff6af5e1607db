//! Embedding provider capability (spec C3 / section 4.3)
//!
//! The provider that actually turns text into vectors is external per the
//! spec's non-goals; this is the seam it plugs into.

/// Errors a provider implementation can surface.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// The provider refused or failed to embed the given text.
    #[error("embedding failed: {0}")]
    ProviderFailed(String),
    /// The provider returned an empty vector.
    #[error("provider returned an empty embedding")]
    EmptyEmbedding,
    /// The provider took too long.
    #[error("embedding timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// An opaque capability producing fixed-length numeric vectors for a given
/// piece of text. Implementations are free to call out to a local model, a
/// remote API, or anything else; the rest of the crate only depends on this
/// trait.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single string.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of strings. The default implementation embeds them one
    /// at a time; implementations backed by a batching API should override
    /// this.
    fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// The dimension this provider's vectors always come back as, if known
    /// ahead of any call to `embed`.
    fn native_dimension(&self) -> Option<usize> {
        None
    }

    /// A stable identifier for this provider, used to key the embedding
    /// cache so switching providers doesn't serve stale vectors.
    fn provider_id(&self) -> &str;
}
