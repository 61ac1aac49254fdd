//! In-memory BM25 index.
//!
//! Postings are keyed by `"<language>:<term>"` so a chunk only matches query
//! terms produced by its own analysis chain. Corpus statistics are owned by
//! the index and bumped on every mutation; IDF is computed from them at query
//! time, so there is no stale cache to refresh.
use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::instrument;

use ragdb_core::config::LexicalConfig;
use ragdb_core::language::detect;
use ragdb_core::topk::TopK;
use ragdb_core::types::{ChunkId, Language, SearchHit, SourceKind};

use crate::analyzer::Analyzers;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
	pub k1: f32,
	pub b: f32,
}

impl Default for Bm25Params {
	fn default() -> Self { Self { k1: 1.2, b: 0.75 } }
}

impl From<&LexicalConfig> for Bm25Params {
	fn from(c: &LexicalConfig) -> Self { Self { k1: c.k1, b: c.b } }
}

/// Document count and total length; `version` increments on every change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusStats {
	pub doc_count: usize,
	pub total_length: u64,
	pub version: u64,
}

impl CorpusStats {
	#[allow(clippy::cast_precision_loss)]
	pub fn avg_length(&self) -> f64 {
		if self.doc_count == 0 { 0.0 } else { self.total_length as f64 / self.doc_count as f64 }
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexedChunk {
	language: Language,
	length: u32,
	/// term -> frequency, for retraction
	terms: BTreeMap<String, u32>,
}

/// Serializable form: per-chunk term frequencies. Postings are rebuilt on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalSnapshot {
	params: Bm25Params,
	chunks: BTreeMap<ChunkId, IndexedChunk>,
}

#[derive(Debug, Clone, Default)]
pub struct LexicalIndex {
	params: Bm25Params,
	analyzers: Analyzers,
	postings: HashMap<String, BTreeMap<ChunkId, u32>>,
	chunks: BTreeMap<ChunkId, IndexedChunk>,
	languages: BTreeMap<Language, usize>,
	stats: CorpusStats,
}

impl LexicalIndex {
	pub fn new(params: Bm25Params) -> Self { Self { params, ..Self::default() } }

	pub fn params(&self) -> Bm25Params { self.params }
	pub fn stats(&self) -> CorpusStats { self.stats }
	pub fn len(&self) -> usize { self.chunks.len() }
	pub fn is_empty(&self) -> bool { self.chunks.is_empty() }
	pub fn contains(&self, id: &str) -> bool { self.chunks.contains_key(id) }
	pub fn ids(&self) -> impl Iterator<Item = &ChunkId> { self.chunks.keys() }
	pub fn term_count(&self) -> usize { self.postings.len() }

	/// Index `text` under the language detected from it.
	pub fn index(&mut self, id: &str, text: &str) { self.index_with_language(id, text, detect(text)); }

	/// Insert or replace the postings of `id`.
	pub fn index_with_language(&mut self, id: &str, text: &str, language: Language) {
		self.remove(id);
		let mut terms: BTreeMap<String, u32> = BTreeMap::new();
		for token in self.analyzers.tokenize(language, text) {
			*terms.entry(format!("{}:{token}", language.code())).or_default() += 1;
		}
		let length: u32 = terms.values().sum();
		for (term, tf) in &terms {
			self.postings.entry(term.clone()).or_default().insert(id.to_string(), *tf);
		}
		*self.languages.entry(language).or_default() += 1;
		self.stats.doc_count += 1;
		self.stats.total_length += u64::from(length);
		self.stats.version += 1;
		self.chunks.insert(id.to_string(), IndexedChunk { language, length, terms });
	}

	/// Drop every posting of `id`. Returns whether it was indexed.
	pub fn remove(&mut self, id: &str) -> bool {
		let Some(chunk) = self.chunks.remove(id) else { return false };
		for term in chunk.terms.keys() {
			if let Some(list) = self.postings.get_mut(term) {
				list.remove(id);
				if list.is_empty() { self.postings.remove(term); }
			}
		}
		if let Some(n) = self.languages.get_mut(&chunk.language) {
			*n -= 1;
			if *n == 0 { self.languages.remove(&chunk.language); }
		}
		self.stats.doc_count -= 1;
		self.stats.total_length -= u64::from(chunk.length);
		self.stats.version += 1;
		true
	}

	/// Inverse document frequency, always non-negative.
	#[allow(clippy::cast_precision_loss)]
	fn idf(&self, df: usize) -> f64 {
		let n = self.stats.doc_count as f64;
		let df = df as f64;
		(1.0 + (n - df + 0.5) / (df + 0.5)).ln()
	}

	/// Analyze the query once per language present in the corpus.
	fn query_terms(&self, query: &str) -> BTreeSet<String> {
		self.languages
			.keys()
			.flat_map(|lang| self.analyzers.tokenize(*lang, query).into_iter().map(move |t| format!("{}:{t}", lang.code())))
			.collect()
	}

	/// Top `k` chunks by BM25, ties broken by ascending chunk id.
	#[instrument(skip(self), fields(docs = self.stats.doc_count))]
	#[allow(clippy::cast_possible_truncation)]
	pub fn search(&self, query: &str, k: usize) -> Vec<SearchHit> {
		if k == 0 || self.chunks.is_empty() { return Vec::new(); }
		let k1 = f64::from(self.params.k1);
		let b = f64::from(self.params.b);
		let avg = self.stats.avg_length().max(f64::MIN_POSITIVE);

		let mut scores: HashMap<&str, f64> = HashMap::new();
		for term in self.query_terms(query) {
			let Some(list) = self.postings.get(&term) else { continue };
			let idf = self.idf(list.len());
			for (id, tf) in list {
				let len = self.chunks.get(id).map_or(0.0, |c| f64::from(c.length));
				let tf = f64::from(*tf);
				let norm = tf + k1 * (1.0 - b + b * len / avg);
				*scores.entry(id.as_str()).or_default() += idf * tf * (k1 + 1.0) / norm;
			}
		}

		let mut top = TopK::new(k);
		for (id, score) in scores { top.push(id, score); }
		top.into_sorted().into_iter().map(|(id, score)| SearchHit { id, score: score as f32, source: SourceKind::Text }).collect()
	}

	pub fn snapshot(&self) -> LexicalSnapshot {
		LexicalSnapshot { params: self.params, chunks: self.chunks.clone() }
	}

	pub fn from_snapshot(snapshot: LexicalSnapshot) -> Self {
		let mut index = Self::new(snapshot.params);
		for (id, chunk) in snapshot.chunks {
			for (term, tf) in &chunk.terms {
				index.postings.entry(term.clone()).or_default().insert(id.clone(), *tf);
			}
			*index.languages.entry(chunk.language).or_default() += 1;
			index.stats.doc_count += 1;
			index.stats.total_length += u64::from(chunk.length);
			index.chunks.insert(id, chunk);
		}
		index.stats.version = 1;
		index
	}
}
