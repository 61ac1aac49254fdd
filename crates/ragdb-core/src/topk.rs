//! Bounded top-k selection with deterministic ordering.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

fn score_key(score: f64) -> f64 {
    if score.is_nan() { f64::NEG_INFINITY } else { score }
}

#[derive(Debug, Clone)]
struct HeapEntry {
    id: String,
    score: f64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool { self.cmp(other) == Ordering::Equal }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap keeps the largest element at the top; "largest" is the
        // worst hit so peek() is the current cutoff.
        score_key(other.score).total_cmp(&score_key(self.score)).then_with(|| self.id.cmp(&other.id))
    }
}

/// Keeps the best `k` (id, score) pairs: higher score first, then smaller id.
#[derive(Debug)]
pub struct TopK {
    k: usize,
    heap: BinaryHeap<HeapEntry>,
}

impl TopK {
    pub fn new(k: usize) -> Self { Self { k, heap: BinaryHeap::with_capacity(k.saturating_add(1).min(4096)) } }

    pub fn push(&mut self, id: &str, score: f64) {
        if self.k == 0 { return; }
        let entry = HeapEntry { id: id.to_string(), score };
        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if self.heap.peek().is_some_and(|worst| entry < *worst) {
            self.heap.pop();
            self.heap.push(entry);
        }
    }

    /// Best first.
    pub fn into_sorted(self) -> Vec<(String, f64)> {
        self.heap.into_sorted_vec().into_iter().map(|e| (e.id, e.score)).collect()
    }
}
