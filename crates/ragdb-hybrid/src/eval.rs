//! Retrieval quality over a labelled query set: precision@k, recall@k, MRR
//! and nDCG@k at document level.
//!
//! Every metric first collapses repeated entries in `retrieved` to their
//! first occurrence, since several chunks of one document can rank.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use ragdb_core::error::{Error, Result};

use crate::engine::{HybridSearchEngine, RankedChunk};

#[inline]
#[allow(clippy::cast_precision_loss)]
fn usize_to_f64(value: usize) -> f64 { value as f64 }

fn unique<'a>(retrieved: &[&'a str]) -> Vec<&'a str> {
    let mut seen = HashSet::with_capacity(retrieved.len());
    retrieved.iter().copied().filter(|d| seen.insert(*d)).collect()
}

/// Relevant share of the first `k` distinct results. 0.0 when nothing was
/// retrieved or `k` is 0.
#[must_use]
pub fn precision_at_k(retrieved: &[&str], relevant: &[&str], k: usize) -> f64 {
    let relevant: HashSet<&str> = relevant.iter().copied().collect();
    let top: Vec<&str> = unique(retrieved).into_iter().take(k).collect();
    if top.is_empty() { return 0.0; }
    usize_to_f64(top.iter().filter(|d| relevant.contains(*d)).count()) / usize_to_f64(top.len())
}

/// Share of `relevant` found in the first `k` distinct results. 0.0 when
/// `relevant` is empty.
#[must_use]
pub fn recall_at_k(retrieved: &[&str], relevant: &[&str], k: usize) -> f64 {
    let relevant: HashSet<&str> = relevant.iter().copied().collect();
    if relevant.is_empty() { return 0.0; }
    let found = unique(retrieved).into_iter().take(k).filter(|d| relevant.contains(d)).count();
    usize_to_f64(found) / usize_to_f64(relevant.len())
}

/// 1 / rank of the first relevant result, 0.0 if none.
#[must_use]
pub fn mean_reciprocal_rank(retrieved: &[&str], relevant: &[&str]) -> f64 {
    let relevant: HashSet<&str> = relevant.iter().copied().collect();
    unique(retrieved).iter().position(|d| relevant.contains(d)).map_or(0.0, |i| 1.0 / (usize_to_f64(i) + 1.0))
}

/// Binary-relevance nDCG over the first `k` distinct results.
#[must_use]
pub fn ndcg_at_k(retrieved: &[&str], relevant: &[&str], k: usize) -> f64 {
    let relevant: HashSet<&str> = relevant.iter().copied().collect();
    let gain = |i: usize| 1.0 / (usize_to_f64(i) + 2.0).log2();
    let dcg: f64 = unique(retrieved).into_iter().take(k).enumerate().filter(|(_, d)| relevant.contains(d)).map(|(i, _)| gain(i)).sum();
    let idcg: f64 = (0..k.min(relevant.len())).map(gain).sum();
    if idcg == 0.0 { 0.0 } else { dcg / idcg }
}

/// Which result field the labels name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceKey {
    #[default]
    DocumentId,
    /// The source file name, as shown in result titles.
    Title,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalQuery {
    pub question: String,
    pub relevant_docs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalDataset {
    #[serde(default)]
    pub key: RelevanceKey,
    pub queries: Vec<EvalQuery>,
}

impl EvalDataset {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| Error::InvalidInput(format!("eval dataset {}: {e}", path.display())))
    }
}

/// Metrics averaged over every query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EvalReport {
    pub queries: usize,
    pub k: usize,
    pub precision_at_k: f64,
    pub recall_at_k: f64,
    pub mrr: f64,
    pub ndcg_at_k: f64,
}

/// Run each question through [`HybridSearchEngine::search`] with top `k`
/// and average the metrics.
pub fn evaluate(engine: &HybridSearchEngine, dataset: &EvalDataset, k: usize) -> Result<EvalReport> {
    let mut report = EvalReport { queries: dataset.queries.len(), k, ..EvalReport::default() };
    if dataset.queries.is_empty() { return Ok(report); }
    for q in &dataset.queries {
        let response = engine.search(&q.question, k)?;
        let label = |item: &RankedChunk| match dataset.key {
            RelevanceKey::DocumentId => item.document_id.clone(),
            RelevanceKey::Title => item.title.clone(),
        };
        let labels: Vec<String> = response.items.iter().map(label).collect();
        let retrieved: Vec<&str> = labels.iter().map(String::as_str).collect();
        let relevant: Vec<&str> = q.relevant_docs.iter().map(String::as_str).collect();
        report.precision_at_k += precision_at_k(&retrieved, &relevant, k);
        report.recall_at_k += recall_at_k(&retrieved, &relevant, k);
        report.mrr += mean_reciprocal_rank(&retrieved, &relevant);
        report.ndcg_at_k += ndcg_at_k(&retrieved, &relevant, k);
    }
    let n = usize_to_f64(dataset.queries.len());
    report.precision_at_k /= n;
    report.recall_at_k /= n;
    report.mrr /= n;
    report.ndcg_at_k /= n;
    info!(queries = report.queries, k, precision = report.precision_at_k, recall = report.recall_at_k, mrr = report.mrr, ndcg = report.ndcg_at_k, "evaluation finished");
    Ok(report)
}
