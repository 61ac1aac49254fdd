use std::hash::{Hash, Hasher};

use twox_hash::XxHash64;

use ragdb_core::error::Result;
use ragdb_core::traits::Embedder;

/// Deterministic bag-of-words embedder: each lowercased word is hashed into a
/// bucket with a signed weight, then the vector is L2-normalized. Texts that
/// share words get positive cosine similarity.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim: dim.max(1), model_id: format!("hash-{dim}") } }
}

impl Embedder for HashEmbedder {
    fn dim(&self) -> usize { self.dim }
    fn model_id(&self) -> &str { &self.model_id }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0f32; self.dim];
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let mut hasher = XxHash64::with_seed(0);
            token.to_lowercase().hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign * (0.5 + ((h >> 32) as u32) as f32 / u32::MAX as f32);
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 { for x in &mut v { *x /= norm; } }
        Ok(v)
    }
}
