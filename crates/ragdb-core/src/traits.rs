use crate::error::Result;

/// External embedding capability, injected at construction time.
///
/// Implementations must be deterministic for identical input within one
/// `model_id`. Failures are reported as [`crate::error::Error::EmbeddingFailure`];
/// the `retryable` flag decides whether callers back off and try again.
pub trait Embedder: Send + Sync {
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;
    /// Stable identifier for the model/version producing the vectors.
    fn model_id(&self) -> &str;
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

impl<E: Embedder + ?Sized> Embedder for std::sync::Arc<E> {
    fn dim(&self) -> usize { (**self).dim() }
    fn model_id(&self) -> &str { (**self).model_id() }
    fn embed(&self, text: &str) -> Result<Vec<f32>> { (**self).embed(text) }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { (**self).embed_batch(texts) }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn dim(&self) -> usize { (**self).dim() }
    fn model_id(&self) -> &str { (**self).model_id() }
    fn embed(&self, text: &str) -> Result<Vec<f32>> { (**self).embed(text) }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> { (**self).embed_batch(texts) }
}
