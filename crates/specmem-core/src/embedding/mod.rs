//! Embedding Provider & Cache (spec C3)

mod cache;
mod provider;

pub use cache::EmbeddingCache;
pub use provider::{EmbeddingError, EmbeddingProvider};
