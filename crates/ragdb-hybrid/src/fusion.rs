//! Fusion Ranker: merge lexical and vector result lists into one ranking.
//!
//! Reciprocal Rank Fusion scores a chunk `weight / (c + rank)` per list it
//! appears in (1-based rank). Weighted fusion min-max normalizes each list
//! and sums `weight * normalized`. Either way the output is sorted by fused
//! score descending, then chunk id ascending.

use std::collections::HashMap;

use tracing::{debug, instrument};

use ragdb_core::config::{FusionConfig, FusionMethod};
use ragdb_core::types::{cmp_score_then_id, QueryResultItem, SearchHit};

/// How many hits to request from each index for a fused top-`k`.
pub fn candidate_count(k: usize, multiplier: usize) -> usize { k.saturating_mul(multiplier.max(1)) }

fn rrf_contribution(c: f64, rank: usize) -> f64 {
    let rank = u32::try_from(rank).unwrap_or(u32::MAX);
    1.0 / (c + f64::from(rank))
}

/// Per-list scores mapped to `[0, 1]`; a constant list maps to 1.0.
fn min_max(hits: &[SearchHit]) -> Vec<f64> {
    let (lo, hi) = hits.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), h| {
        let s = f64::from(h.score);
        (lo.min(s), hi.max(s))
    });
    let span = hi - lo;
    hits.iter().map(|h| if span > 0.0 { (f64::from(h.score) - lo) / span } else { 1.0 }).collect()
}

#[derive(Default)]
struct Partial {
    lexical_score: Option<f32>,
    vector_score: Option<f32>,
    fused: f64,
}

/// Fuse two best-first lists into the top `k`. Repeated ids within one list
/// count once, at their best position.
#[instrument(skip(lexical, vector, config), fields(lexical = lexical.len(), vector = vector.len(), method = ?config.method))]
pub fn fuse(lexical: &[SearchHit], vector: &[SearchHit], k: usize, config: &FusionConfig) -> Vec<QueryResultItem> {
    let mut merged: HashMap<&str, Partial> = HashMap::with_capacity(lexical.len() + vector.len());
    for (list, weight, is_lexical) in [(lexical, config.lexical_weight, true), (vector, config.vector_weight, false)] {
        let contributions: Vec<f64> = match config.method {
            FusionMethod::Rrf => (1..=list.len()).map(|rank| rrf_contribution(config.rrf_c, rank)).collect(),
            FusionMethod::Weighted => min_max(list),
        };
        for (hit, contribution) in list.iter().zip(contributions) {
            let entry = merged.entry(hit.id.as_str()).or_default();
            let slot = if is_lexical { &mut entry.lexical_score } else { &mut entry.vector_score };
            if slot.is_some() { continue; }
            *slot = Some(hit.score);
            entry.fused += weight * contribution;
        }
    }

    let mut ranked: Vec<(&str, Partial)> = merged.into_iter().collect();
    ranked.sort_by(|a, b| cmp_score_then_id(a.1.fused, a.0, b.1.fused, b.0));
    let overlap = ranked.iter().filter(|(_, p)| p.lexical_score.is_some() && p.vector_score.is_some()).count();
    let total = ranked.len();
    let out: Vec<QueryResultItem> = ranked
        .into_iter()
        .take(k)
        .enumerate()
        .map(|(i, (id, p))| QueryResultItem { chunk_id: id.to_string(), lexical_score: p.lexical_score, vector_score: p.vector_score, fused_score: p.fused, rank: i + 1 })
        .collect();
    debug!(fused = total, overlap, returned = out.len(), "fusion complete");
    out
}
