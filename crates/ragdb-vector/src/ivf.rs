//! Inverted-file partitioning for approximate search.
//!
//! Centroids come from a few rounds of k-means with deterministic seeding, so
//! the same vectors always produce the same partitions. Search probes the
//! `nprobe` closest lists and scores only their members exactly.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ragdb_core::config::VectorMetric;
use ragdb_core::types::ChunkId;

use crate::metric::{prepare, score};

/// Below this many vectors a partitioned index is not worth building.
pub const MIN_TRAIN_SIZE: usize = 256;
const KMEANS_ROUNDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfParams {
    pub nlist: usize,
    pub nprobe: usize,
}

/// Pick the partition count for `total` vectors: `2 * sqrt(total)` clamped to
/// `[1, 65536]` and below `total`. A non-zero `configured` wins.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn compute_ivf_params(total: usize, configured_nlist: usize, nprobe: usize) -> IvfParams {
    let sqrt_n = (total as f64).sqrt() as usize;
    let mut nlist = if configured_nlist > 0 { configured_nlist } else { (2 * sqrt_n).min(65536) };
    nlist = if total > 1 { nlist.min(total - 1).max(1) } else { 1 };
    IvfParams { nlist, nprobe: nprobe.clamp(1, nlist) }
}

#[derive(Debug, Clone)]
pub struct IvfPartitions {
    metric: VectorMetric,
    centroids: Vec<Vec<f32>>,
    lists: Vec<BTreeSet<ChunkId>>,
    assignment: HashMap<ChunkId, usize>,
    nprobe: usize,
    trained_on: usize,
}

impl IvfPartitions {
    /// `None` when there is nothing to train on.
    pub fn train(entries: &BTreeMap<ChunkId, Vec<f32>>, params: IvfParams, metric: VectorMetric) -> Option<Self> {
        let vectors: Vec<&Vec<f32>> = entries.values().collect();
        if vectors.is_empty() { return None; }
        let nlist = params.nlist.min(vectors.len()).max(1);
        let stride = (vectors.len() / nlist).max(1);
        let mut centroids: Vec<Vec<f32>> = (0..nlist).map(|i| vectors[(i * stride).min(vectors.len() - 1)].clone()).collect();

        for _ in 0..KMEANS_ROUNDS {
            let dim = centroids[0].len();
            let mut sums = vec![vec![0.0f32; dim]; nlist];
            let mut counts = vec![0usize; nlist];
            for v in &vectors {
                let c = nearest(&centroids, v, metric);
                counts[c] += 1;
                for (s, x) in sums[c].iter_mut().zip(v.iter()) { *s += x; }
            }
            for (c, (sum, count)) in sums.into_iter().zip(counts).enumerate() {
                // empty clusters keep their previous centroid
                if count == 0 { continue; }
                #[allow(clippy::cast_precision_loss)]
                let mean: Vec<f32> = sum.into_iter().map(|s| s / count as f32).collect();
                centroids[c] = prepare(metric, mean);
            }
        }

        let mut ivf = Self { metric, lists: vec![BTreeSet::new(); nlist], centroids, assignment: HashMap::new(), nprobe: params.nprobe, trained_on: vectors.len() };
        for (id, v) in entries { ivf.assign(id, v); }
        Some(ivf)
    }

    pub fn trained_on(&self) -> usize { self.trained_on }
    pub fn nlist(&self) -> usize { self.centroids.len() }

    pub fn assign(&mut self, id: &str, vector: &[f32]) {
        self.remove(id);
        let c = nearest(&self.centroids, vector, self.metric);
        self.lists[c].insert(id.to_string());
        self.assignment.insert(id.to_string(), c);
    }

    pub fn remove(&mut self, id: &str) {
        if let Some(c) = self.assignment.remove(id) { self.lists[c].remove(id); }
    }

    /// Members of the `nprobe` lists whose centroids score best against `query`.
    pub fn candidates(&self, query: &[f32]) -> impl Iterator<Item = &ChunkId> {
        let mut ranked: Vec<(usize, f32)> = self.centroids.iter().enumerate().map(|(i, c)| (i, score(self.metric, query, c))).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(self.nprobe);
        ranked.into_iter().flat_map(move |(i, _)| self.lists[i].iter())
    }
}

fn nearest(centroids: &[Vec<f32>], v: &[f32], metric: VectorMetric) -> usize {
    let mut best = (0usize, f32::NEG_INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let s = score(metric, v, c);
        if s > best.1 { best = (i, s); }
    }
    best.0
}
