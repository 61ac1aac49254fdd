use std::time::Duration;

use tracing::warn;

use ragdb_core::config::EmbeddingConfig;
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::Embedder;

/// Retries retryable [`Error::EmbeddingFailure`]s with exponential backoff and
/// checks every returned vector has the advertised dimension.
pub struct RetryingEmbedder<E> {
    inner: E,
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl<E: Embedder> RetryingEmbedder<E> {
    pub fn new(inner: E, config: &EmbeddingConfig) -> Self {
        Self {
            inner,
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    pub fn inner(&self) -> &E { &self.inner }

    fn with_retry<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(model = self.inner.model_id(), attempt, max_attempts = self.max_attempts, backoff_ms = backoff.as_millis() as u64, error = %e, "{what} failed, retrying");
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(self.max_backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn check_dim(&self, v: &[f32]) -> Result<()> {
        if v.len() == self.inner.dim() { Ok(()) } else { Err(Error::DimensionMismatch { expected: self.inner.dim(), actual: v.len() }) }
    }
}

impl<E: Embedder> Embedder for RetryingEmbedder<E> {
    fn dim(&self) -> usize { self.inner.dim() }
    fn model_id(&self) -> &str { self.inner.model_id() }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let v = self.with_retry("embed", || self.inner.embed(text))?;
        self.check_dim(&v)?;
        Ok(v)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let out = self.with_retry("embed_batch", || self.inner.embed_batch(texts))?;
        if out.len() != texts.len() {
            return Err(Error::embedding(format!("batch returned {} vectors for {} texts", out.len(), texts.len()), false));
        }
        for v in &out { self.check_dim(v)?; }
        Ok(out)
    }
}
