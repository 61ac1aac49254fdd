use std::sync::Arc;

use ragdb_core::config::EmbeddingConfig;
use ragdb_core::traits::Embedder;

pub mod cache;
pub mod hash;
pub mod retry;

pub use cache::{CacheStats, CachedEmbedder};
pub use hash::HashEmbedder;
pub use retry::RetryingEmbedder;

/// Hashing embedder behind a cache, for hosts without a model.
pub fn default_embedder(config: &EmbeddingConfig) -> Arc<dyn Embedder> {
    Arc::new(CachedEmbedder::with_default_capacity(Arc::new(HashEmbedder::new(config.dimension))))
}
