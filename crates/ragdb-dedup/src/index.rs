use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use ragdb_core::config::DedupConfig;
use ragdb_core::types::{ChunkId, DocumentId, Fingerprint};

use crate::fingerprint::estimate_similarity;

/// Below this many fingerprints every entry is compared directly; above it
/// only LSH candidates are.
const BRUTE_FORCE_LIMIT: usize = 4096;

/// The stored chunk a queried fingerprint duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub similarity: f64,
    /// The normalized texts are identical.
    pub exact: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    document_id: DocumentId,
    fingerprint: Fingerprint,
}

#[derive(Debug, Clone, Default)]
pub struct DedupIndex {
    num_bands: usize,
    entries: BTreeMap<ChunkId, Entry>,
    exact: HashMap<u64, BTreeSet<ChunkId>>,
    buckets: HashMap<(usize, u64), BTreeSet<ChunkId>>,
}

impl DedupIndex {
    pub fn new(config: &DedupConfig) -> Self {
        Self { num_bands: config.num_bands.max(1), ..Self::default() }
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn contains(&self, id: &str) -> bool { self.entries.contains_key(id) }

    pub fn insert(&mut self, chunk_id: &str, document_id: &str, fingerprint: Fingerprint) {
        self.remove(chunk_id);
        self.exact.entry(fingerprint.exact).or_default().insert(chunk_id.to_string());
        for key in self.band_keys(&fingerprint.minhash) {
            self.buckets.entry(key).or_default().insert(chunk_id.to_string());
        }
        self.entries.insert(chunk_id.to_string(), Entry { document_id: document_id.to_string(), fingerprint });
    }

    pub fn remove(&mut self, chunk_id: &str) -> bool {
        let Some(entry) = self.entries.remove(chunk_id) else { return false };
        if let Some(set) = self.exact.get_mut(&entry.fingerprint.exact) {
            set.remove(chunk_id);
            if set.is_empty() { self.exact.remove(&entry.fingerprint.exact); }
        }
        for key in self.band_keys(&entry.fingerprint.minhash) {
            if let Some(set) = self.buckets.get_mut(&key) {
                set.remove(chunk_id);
                if set.is_empty() { self.buckets.remove(&key); }
            }
        }
        true
    }

    /// Best stored match with similarity `>= threshold`, ignoring chunks of
    /// `exclude_document`. Exact matches win; otherwise the highest similarity,
    /// ties broken by the smallest chunk id.
    pub fn is_duplicate(&self, fingerprint: &Fingerprint, threshold: f64, exclude_document: Option<&str>) -> Option<DuplicateMatch> {
        self.best_match(fingerprint, threshold, |document_id| exclude_document != Some(document_id))
    }

    /// Like [`DedupIndex::is_duplicate`], considering only chunks whose
    /// document passes `accept`.
    pub fn best_match(&self, fingerprint: &Fingerprint, threshold: f64, accept: impl Fn(&str) -> bool) -> Option<DuplicateMatch> {
        let allowed = |id: &str| self.entries.get(id).filter(|e| accept(&e.document_id));
        if let Some(ids) = self.exact.get(&fingerprint.exact) {
            if let Some((id, entry)) = ids.iter().find_map(|id| allowed(id).map(|e| (id, e))) {
                return Some(DuplicateMatch { chunk_id: id.clone(), document_id: entry.document_id.clone(), similarity: 1.0, exact: true });
            }
        }

        let candidates: BTreeSet<&ChunkId> = if self.entries.len() <= BRUTE_FORCE_LIMIT {
            self.entries.keys().collect()
        } else {
            self.band_keys(&fingerprint.minhash).filter_map(|k| self.buckets.get(&k)).flatten().collect()
        };

        let mut best: Option<DuplicateMatch> = None;
        for id in candidates {
            let Some(entry) = allowed(id) else { continue };
            let similarity = estimate_similarity(fingerprint, &entry.fingerprint);
            if similarity < threshold { continue; }
            // candidates iterate in id order, so strict > keeps the smallest id on ties
            if best.as_ref().map_or(true, |b| similarity > b.similarity) {
                best = Some(DuplicateMatch { chunk_id: id.clone(), document_id: entry.document_id.clone(), similarity, exact: false });
            }
        }
        best
    }

    fn band_keys<'a>(&self, signature: &'a [u64]) -> impl Iterator<Item = (usize, u64)> + 'a {
        let rows = (signature.len() / self.num_bands).max(1);
        signature.chunks(rows).enumerate().map(|(band, values)| {
            (band, values.iter().fold(0u64, |h, v| h.wrapping_mul(31).wrapping_add(*v)))
        })
    }
}
