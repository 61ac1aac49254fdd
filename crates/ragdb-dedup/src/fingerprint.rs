use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use twox_hash::XxHash64;

use ragdb_core::config::DedupConfig;
use ragdb_core::types::Fingerprint;

/// Mersenne prime 2^61 - 1 for the universal hash family.
const PRIME: u64 = (1u64 << 61) - 1;

/// Lowercase, keep letters and digits, collapse everything else to single spaces.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        if !out.is_empty() { out.push(' '); }
        out.extend(word.chars().flat_map(char::to_lowercase));
    }
    out
}

fn hash_str(s: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    s.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Clone)]
pub struct Fingerprinter {
    num_hashes: usize,
    shingle_size: usize,
}

impl Default for Fingerprinter {
    fn default() -> Self { Self::new(&DedupConfig::default()) }
}

impl Fingerprinter {
    pub fn new(config: &DedupConfig) -> Self {
        Self { num_hashes: config.num_hashes.max(1), shingle_size: config.shingle_size.max(1) }
    }

    pub fn fingerprint(&self, text: &str) -> Fingerprint {
        let normalized = normalize(text);
        Fingerprint { exact: hash_str(&normalized), minhash: self.minhash(&self.shingles(&normalized)) }
    }

    /// Word k-shingles; texts shorter than k words form a single shingle.
    fn shingles(&self, normalized: &str) -> BTreeSet<u64> {
        let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
        if words.len() <= self.shingle_size {
            return std::iter::once(hash_str(&words.join(" "))).collect();
        }
        words.windows(self.shingle_size).map(|w| hash_str(&w.join(" "))).collect()
    }

    fn minhash(&self, shingles: &BTreeSet<u64>) -> Vec<u64> {
        let mut signature = vec![u64::MAX; self.num_hashes];
        for &x in shingles {
            for (i, slot) in signature.iter_mut().enumerate() {
                let seed = i as u64;
                let a = seed.wrapping_mul(0x517c_c1b7_2722_0a95).wrapping_add(0x6c62_272e_07bb_0142) | 1;
                let b = seed.wrapping_mul(0x6c62_272e_07bb_0142).wrapping_add(0x517c_c1b7_2722_0a95);
                let h = a.wrapping_mul(x).wrapping_add(b) % PRIME;
                *slot = (*slot).min(h);
            }
        }
        signature
    }
}

/// Estimated Jaccard similarity in `[0, 1]`. Identical exact hashes are 1.0;
/// signatures of different lengths only compare by exact hash.
#[allow(clippy::cast_precision_loss)]
pub fn estimate_similarity(a: &Fingerprint, b: &Fingerprint) -> f64 {
    if a.exact == b.exact { return 1.0; }
    if a.minhash.len() != b.minhash.len() || a.minhash.is_empty() { return 0.0; }
    let matching = a.minhash.iter().zip(&b.minhash).filter(|(x, y)| x == y).count();
    matching as f64 / a.minhash.len() as f64
}
