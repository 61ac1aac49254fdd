use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use ragdb_core::config::{VectorConfig, VectorMetric, VectorMode};
use ragdb_core::error::{Error, Result};
use ragdb_core::topk::TopK;
use ragdb_core::types::{ChunkId, SearchHit, SourceKind};

use crate::ivf::{compute_ivf_params, IvfPartitions, MIN_TRAIN_SIZE};
use crate::metric::{prepare, score};

/// Serializable form. Partitions are retrained on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSnapshot {
    dimension: usize,
    metric: VectorMetric,
    entries: BTreeMap<ChunkId, Vec<f32>>,
}

/// Partitions trained off to the side, see [`VectorIndex::plan_partitions`].
#[derive(Debug, Clone)]
pub struct PartitionPlan {
    generation: u64,
    partitions: Option<IvfPartitions>,
}

impl PartitionPlan {
    pub fn is_trained(&self) -> bool { self.partitions.is_some() }
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    config: VectorConfig,
    /// Vectors in stored form (normalized for cosine).
    entries: BTreeMap<ChunkId, Vec<f32>>,
    ivf: Option<IvfPartitions>,
    /// Bumped by every insert and removal.
    generation: u64,
}

impl VectorIndex {
    pub fn new(config: VectorConfig) -> Self { Self { config, entries: BTreeMap::new(), ivf: None, generation: 0 } }

    pub fn dimension(&self) -> usize { self.config.dimension }
    pub fn metric(&self) -> VectorMetric { self.config.metric }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn contains(&self, id: &str) -> bool { self.entries.contains_key(id) }
    pub fn ids(&self) -> impl Iterator<Item = &ChunkId> { self.entries.keys() }
    pub fn is_partitioned(&self) -> bool { self.ivf.is_some() }

    /// Whether `vector` would be accepted by [`VectorIndex::index`].
    pub fn validate(&self, vector: &[f32]) -> Result<()> { self.check(vector) }

    fn check(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(Error::DimensionMismatch { expected: self.config.dimension, actual: vector.len() });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(Error::InvalidInput("vector contains non-finite values".into()));
        }
        Ok(())
    }

    /// Insert or replace `id`. A vector of the wrong length or with non-finite
    /// components is rejected and the index is left unchanged.
    pub fn index(&mut self, id: &str, vector: Vec<f32>) -> Result<()> {
        self.check(&vector)?;
        let stored = prepare(self.config.metric, vector);
        if let Some(ivf) = self.ivf.as_mut() { ivf.assign(id, &stored); }
        self.entries.insert(id.to_string(), stored);
        self.generation += 1;
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        if let Some(ivf) = self.ivf.as_mut() { ivf.remove(id); }
        let removed = self.entries.remove(id).is_some();
        if removed {
            self.generation += 1;
            if self.entries.len() < MIN_TRAIN_SIZE { self.ivf = None; }
        }
        removed
    }

    /// In IVF mode, whether the corpus has doubled or halved since the last
    /// training (or was never trained) and is large enough to partition.
    /// Inserts and removals never retrain by themselves; new entries join
    /// the nearest existing partition until the next training.
    pub fn retrain_due(&self) -> bool {
        if self.config.mode != VectorMode::Ivf { return false; }
        let n = self.entries.len();
        if n < MIN_TRAIN_SIZE { return false; }
        self.ivf.as_ref().map_or(true, |ivf| n >= ivf.trained_on() * 2 || n * 2 <= ivf.trained_on())
    }

    /// Copy of the entries without partitions, for training away from
    /// whatever lock guards `self`.
    #[must_use]
    pub fn training_copy(&self) -> Self {
        Self { config: self.config.clone(), entries: self.entries.clone(), ivf: None, generation: self.generation }
    }

    /// Run k-means over the current entries. The plan only installs on an
    /// index at the same generation.
    pub fn plan_partitions(&self) -> PartitionPlan {
        let params = compute_ivf_params(self.entries.len(), self.config.ivf_nlist, self.config.ivf_nprobe);
        let partitions = IvfPartitions::train(&self.entries, params, self.config.metric);
        debug!(entries = self.entries.len(), nlist = params.nlist, nprobe = params.nprobe, "trained ivf partitions");
        PartitionPlan { generation: self.generation, partitions }
    }

    /// Swap in trained partitions. Returns `false`, leaving the index as it
    /// was, when entries changed since the plan was made.
    pub fn install_partitions(&mut self, plan: PartitionPlan) -> bool {
        if plan.generation != self.generation {
            debug!(planned = plan.generation, current = self.generation, "discarding stale ivf plan");
            return false;
        }
        self.ivf = plan.partitions;
        true
    }

    /// Retrain partitions over the current entries in place.
    pub fn rebuild_partitions(&mut self) {
        let plan = self.plan_partitions();
        self.install_partitions(plan);
    }

    /// [`VectorIndex::rebuild_partitions`] when [`VectorIndex::retrain_due`].
    pub fn retrain_if_due(&mut self) -> bool {
        let due = self.retrain_due();
        if due { self.rebuild_partitions(); }
        due
    }

    /// Top `k` by similarity, ties broken by ascending chunk id. Uses the
    /// partitions when trained, otherwise scans every entry.
    #[instrument(skip(self, query), fields(entries = self.entries.len()))]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.check(query)?;
        let q = prepare(self.config.metric, query.to_vec());
        Ok(match &self.ivf {
            Some(ivf) => self.rank(&q, k, ivf.candidates(&q)),
            None => self.rank(&q, k, self.entries.keys()),
        })
    }

    /// Brute-force search over every entry regardless of mode.
    pub fn search_exact(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        self.check(query)?;
        let q = prepare(self.config.metric, query.to_vec());
        Ok(self.rank(&q, k, self.entries.keys()))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn rank<'a>(&self, q: &[f32], k: usize, ids: impl Iterator<Item = &'a ChunkId>) -> Vec<SearchHit> {
        let mut top = TopK::new(k);
        for id in ids {
            if let Some(v) = self.entries.get(id) { top.push(id, f64::from(score(self.config.metric, q, v))); }
        }
        top.into_sorted().into_iter().map(|(id, s)| SearchHit { id, score: s as f32, source: SourceKind::Vector }).collect()
    }

    /// Mean fraction of the exact top-`k` that [`VectorIndex::search`] also returns.
    #[allow(clippy::cast_precision_loss)]
    pub fn measure_recall(&self, queries: &[Vec<f32>], k: usize) -> Result<f64> {
        if queries.is_empty() || k == 0 { return Ok(1.0); }
        let mut total = 0.0;
        for q in queries {
            let exact = self.search_exact(q, k)?;
            if exact.is_empty() { total += 1.0; continue; }
            let approx = self.search(q, k)?;
            let hit = exact.iter().filter(|e| approx.iter().any(|a| a.id == e.id)).count();
            total += hit as f64 / exact.len() as f64;
        }
        Ok(total / queries.len() as f64)
    }

    pub fn snapshot(&self) -> VectorSnapshot {
        VectorSnapshot { dimension: self.config.dimension, metric: self.config.metric, entries: self.entries.clone() }
    }

    /// Restore from a snapshot. Fails with `DimensionMismatch` if the snapshot
    /// was written for another dimension.
    pub fn from_snapshot(config: VectorConfig, snapshot: VectorSnapshot) -> Result<Self> {
        if snapshot.dimension != config.dimension {
            return Err(Error::DimensionMismatch { expected: config.dimension, actual: snapshot.dimension });
        }
        if snapshot.metric != config.metric {
            return Err(Error::IndexCorruption(format!("snapshot metric {:?} differs from configured {:?}", snapshot.metric, config.metric)));
        }
        if let Some((id, v)) = snapshot.entries.iter().find(|(_, v)| v.len() != config.dimension) {
            return Err(Error::IndexCorruption(format!("entry '{id}' has {} components", v.len())));
        }
        let mut index = Self { config, entries: snapshot.entries, ivf: None, generation: 0 };
        index.retrain_if_due();
        Ok(index)
    }
}
