//! The committed engine state: Chunk Store plus the indices derived from it.
//!
//! Every mutation goes through [`EngineState::commit`] or
//! [`EngineState::retract`], which validate first and then update all four
//! structures together, so a reader holding the state sees either the old or
//! the new version of a document.
//!
//! A document can defer some of its text to another document's chunks (see
//! [`SupersededChunk`]). When those chunks are retracted the deferring
//! documents are revised in the same step: each record either moves to another
//! chunk holding the text or becomes a live chunk again.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ragdb_core::config::EngineConfig;
use ragdb_core::error::{Error, Result};
use ragdb_core::types::{Chunk, ChunkId, Document, DocumentId, Fingerprint, SupersededChunk};
use ragdb_dedup::{estimate_similarity, DedupIndex};
use ragdb_store::ChunkStore;
use ragdb_text::{Bm25Params, LexicalIndex};
use ragdb_vector::VectorIndex;

#[derive(Debug, Clone)]
pub struct EngineState {
    pub store: ChunkStore,
    pub lexical: LexicalIndex,
    pub vector: VectorIndex,
    pub dedup: DedupIndex,
    /// Incremented by every commit and retraction.
    pub version: u64,
    /// Documents with superseded text, by the chunk holding it.
    dependents: BTreeMap<ChunkId, BTreeSet<DocumentId>>,
}

/// A whole document rewritten as a side effect of another document's change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

impl EngineState {
    pub fn empty(config: &EngineConfig) -> Self {
        Self {
            store: ChunkStore::new(),
            lexical: LexicalIndex::new(Bm25Params::from(&config.lexical)),
            vector: VectorIndex::new(config.vector.clone()),
            dedup: DedupIndex::new(&config.dedup),
            version: 0,
            dependents: BTreeMap::new(),
        }
    }

    /// Replace `document` with `chunks` and apply the `revisions` planned for
    /// it. Returns the ids of the retracted previous chunks. On error nothing
    /// has changed.
    pub fn commit(&mut self, document: Document, chunks: Vec<Chunk>, revisions: Vec<Revision>) -> Result<Vec<ChunkId>> {
        self.validate_commit(&chunks)?;
        for r in &revisions { self.validate_commit(&r.chunks)?; }
        let previous = self.put(document, chunks)?;
        self.revise(revisions)?;
        self.version += 1;
        Ok(previous)
    }

    /// [`EngineState::commit`] without dependent revisions.
    pub fn apply_commit(&mut self, document: Document, chunks: Vec<Chunk>) -> Result<Vec<ChunkId>> {
        self.commit(document, chunks, Vec::new())
    }

    fn put(&mut self, document: Document, chunks: Vec<Chunk>) -> Result<Vec<ChunkId>> {
        let previous: Vec<ChunkId> = self.store.chunk_ids(&document.id).to_vec();
        let staged = chunks.clone();
        let document_id = document.id.clone();
        let superseded: Vec<ChunkId> = document.superseded.iter().map(|s| s.by.clone()).collect();
        self.store.put(document, chunks)?;
        self.untrack(&document_id);
        for by in superseded { self.dependents.entry(by).or_default().insert(document_id.clone()); }

        for id in &previous { self.unindex(id); }
        for chunk in staged {
            self.lexical.index_with_language(&chunk.id, &chunk.text, chunk.language);
            // validated above
            self.vector.index(&chunk.id, chunk.embedding)?;
            self.dedup.insert(&chunk.id, &document_id, chunk.fingerprint);
        }
        debug!(document_id = %document_id, retracted = previous.len(), "state put");
        Ok(previous)
    }

    fn revise(&mut self, revisions: Vec<Revision>) -> Result<()> {
        for r in revisions {
            let document_id = r.document.id.clone();
            let before = self.store.chunk_ids(&document_id).len();
            let after = r.chunks.len();
            self.put(r.document, r.chunks)?;
            if after > before { info!(document_id = %document_id, reinstated = after - before, "reinstated superseded chunks"); }
        }
        Ok(())
    }

    fn untrack(&mut self, document_id: &str) {
        self.dependents.retain(|_, docs| {
            docs.remove(document_id);
            !docs.is_empty()
        });
    }

    /// Checks `apply_commit` would pass for the embeddings, without mutating.
    pub fn validate_commit(&self, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            self.vector.validate(&chunk.embedding).map_err(|e| match e {
                Error::DimensionMismatch { .. } => e,
                other => Error::InvalidInput(format!("chunk '{}': {other}", chunk.id)),
            })?;
        }
        Ok(())
    }

    /// Remove a document and its chunks everywhere, applying the `revisions`
    /// planned for it.
    pub fn retract(&mut self, document_id: &str, revisions: Vec<Revision>) -> Result<Vec<ChunkId>> {
        for r in &revisions { self.validate_commit(&r.chunks)?; }
        let removed = self.store.delete(document_id)?;
        for id in &removed { self.unindex(id); }
        self.untrack(document_id);
        self.revise(revisions)?;
        self.version += 1;
        Ok(removed)
    }

    /// Revisions of the documents that deferred text to chunks of
    /// `document_id`, for replacing that document with `replacement` (empty
    /// for a delete). A record moves to the best other chunk at or above
    /// `threshold`; without one it is reinstated as a new chunk at the end
    /// of its document, with an empty embedding the caller must fill in.
    /// Dependents are revised in id order, so a later one can defer to text
    /// an earlier one reinstated.
    pub fn plan_revisions(&self, document_id: &str, replacement: &[Chunk], threshold: f64) -> Vec<Revision> {
        let retracted: BTreeSet<&ChunkId> = self.store.chunk_ids(document_id).iter().collect();
        let affected: BTreeSet<&DocumentId> = retracted
            .iter()
            .filter_map(|id| self.dependents.get(*id))
            .flatten()
            .filter(|d| d.as_str() != document_id)
            .collect();

        let mut revisions = Vec::with_capacity(affected.len());
        let mut reinstated: Vec<Chunk> = Vec::new();
        for dependent in affected {
            let Ok(stored) = self.store.document(dependent) else { continue };
            let mut document = stored.clone();
            let mut chunks: Vec<Chunk> = self.store.chunks_of(dependent).into_iter().cloned().collect();
            let mut kept: Vec<SupersededChunk> = Vec::with_capacity(document.superseded.len());
            for mut record in std::mem::take(&mut document.superseded) {
                if !retracted.contains(&record.by) {
                    kept.push(record);
                    continue;
                }
                // a chunk of its own document now holds the text
                if best_in(&chunks, &record.fingerprint, threshold).is_some() { continue; }
                let elsewhere = best_in(replacement, &record.fingerprint, threshold).or_else(|| best_in(&reinstated, &record.fingerprint, threshold)).or_else(|| {
                    self.dedup
                        .best_match(&record.fingerprint, threshold, |doc| doc != document_id && doc != dependent.as_str())
                        .map(|m| (m.chunk_id, m.similarity, m.exact))
                });
                match elsewhere {
                    Some((by, similarity, exact)) => {
                        record.by = by;
                        record.similarity = similarity;
                        record.exact = exact;
                        kept.push(record);
                    }
                    None => {
                        let chunk = record.into_chunk(dependent, chunks.len());
                        reinstated.push(chunk.clone());
                        chunks.push(chunk);
                    }
                }
            }
            if kept == stored.superseded && chunks.len() == stored.chunk_count { continue; }
            document.superseded = kept;
            document.chunk_count = chunks.len();
            revisions.push(Revision { document, chunks });
        }
        revisions
    }

    fn unindex(&mut self, id: &str) {
        self.lexical.remove(id);
        self.vector.remove(id);
        self.dedup.remove(id);
    }

    /// Both indices hold exactly the chunks of the Chunk Store, and every
    /// superseded record points at a stored chunk.
    pub fn verify_consistency(&self) -> Result<()> {
        self.store.verify()?;
        for document in self.store.documents() {
            if let Some(s) = document.superseded.iter().find(|s| self.store.get(&s.by).is_err()) {
                return Err(Error::IndexCorruption(format!("document '{}' defers to missing chunk '{}'", document.id, s.by)));
            }
        }
        let stored: BTreeSet<&ChunkId> = self.store.chunks().map(|c| &c.id).collect();
        for (name, ids) in [("lexical", self.lexical.ids().collect::<BTreeSet<_>>()), ("vector", self.vector.ids().collect::<BTreeSet<_>>())] {
            if ids != stored {
                let orphans = ids.difference(&stored).count();
                let missing = stored.difference(&ids).count();
                warn!(index = name, orphans, missing, "index out of sync with chunk store");
                return Err(Error::IndexCorruption(format!("{name} index has {orphans} orphaned and {missing} missing entries")));
            }
        }
        Ok(())
    }

    /// Rebuild lexical, vector and dedup indices from the Chunk Store.
    pub fn rebuild_indices(&mut self, config: &EngineConfig) -> Result<()> {
        self.store.verify()?;
        let mut lexical = LexicalIndex::new(Bm25Params::from(&config.lexical));
        let mut vector = VectorIndex::new(config.vector.clone());
        let mut dedup = DedupIndex::new(&config.dedup);
        for chunk in self.store.chunks() {
            lexical.index_with_language(&chunk.id, &chunk.text, chunk.language);
            vector.index(&chunk.id, chunk.embedding.clone())?;
            dedup.insert(&chunk.id, &chunk.document_id, chunk.fingerprint.clone());
        }
        self.lexical = lexical;
        self.vector = vector;
        self.dedup = dedup;
        self.version += 1;
        debug!(chunks = self.store.chunk_count(), "rebuilt indices from chunk store");
        Ok(())
    }

    /// Dedup index and dependents from what the Chunk Store keeps.
    pub fn rebuild_dedup(&mut self, config: &EngineConfig) {
        let mut dedup = DedupIndex::new(&config.dedup);
        for (id, doc, fp) in self.store.fingerprints() { dedup.insert(id, doc, fp.clone()); }
        self.dedup = dedup;
        let mut dependents: BTreeMap<ChunkId, BTreeSet<DocumentId>> = BTreeMap::new();
        for document in self.store.documents() {
            for s in &document.superseded { dependents.entry(s.by.clone()).or_default().insert(document.id.clone()); }
        }
        self.dependents = dependents;
    }
}

/// Best chunk in `chunks` at or above `threshold`: exact first, then highest
/// similarity, then smallest id.
fn best_in(chunks: &[Chunk], fingerprint: &Fingerprint, threshold: f64) -> Option<(ChunkId, f64, bool)> {
    let mut best: Option<(ChunkId, f64, bool)> = None;
    for c in chunks {
        let exact = c.fingerprint.exact == fingerprint.exact;
        let similarity = if exact { 1.0 } else { estimate_similarity(fingerprint, &c.fingerprint) };
        if similarity < threshold { continue; }
        let better = best.as_ref().map_or(true, |(id, s, e)| (exact, similarity) > (*e, *s) || ((exact, similarity) == (*e, *s) && c.id < *id));
        if better { best = Some((c.id.clone(), similarity, exact)); }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ragdb_core::types::{chunk_id, Fingerprint, Language};

    fn document(id: &str, chunks: usize) -> Document {
        Document { id: id.into(), source_path: id.into(), title: id.into(), language: Language::English, ingested_at: Utc::now(), checksum: id.into(), chunk_count: chunks, superseded: Vec::new() }
    }

    fn chunk(doc: &str, sequence: usize, text: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: chunk_id(doc, sequence),
            document_id: doc.into(),
            sequence,
            text: text.into(),
            token_count: text.split_whitespace().count(),
            language: Language::English,
            section: 0,
            page_number: None,
            start_char: 0,
            end_char: text.chars().count(),
            embedding,
            fingerprint: Fingerprint { exact: sequence as u64 + 1, minhash: vec![sequence as u64; 4] },
        }
    }

    #[test]
    fn bad_embedding_rejects_the_whole_commit() {
        let mut state = EngineState::empty(&EngineConfig::with_dimension(2));
        state.apply_commit(document("a", 1), vec![chunk("a", 0, "old text", vec![1.0, 0.0])]).expect("v1");
        let version = state.version;

        let err = state.apply_commit(document("a", 2), vec![chunk("a", 0, "new text", vec![0.0, 1.0]), chunk("a", 1, "more", vec![1.0])]).expect_err("bad dim");
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, actual: 1 }));
        assert_eq!(state.version, version);
        assert_eq!(state.store.get("a:0").expect("old").text, "old text");
        assert_eq!(state.lexical.search("old", 5).len(), 1);
        state.verify_consistency().expect("consistent");
    }

    #[test]
    fn replacement_retracts_previous_chunks_everywhere() {
        let mut state = EngineState::empty(&EngineConfig::with_dimension(2));
        state.apply_commit(document("a", 2), vec![chunk("a", 0, "apple", vec![1.0, 0.0]), chunk("a", 1, "banana", vec![0.0, 1.0])]).expect("v1");
        let previous = state.apply_commit(document("a", 1), vec![chunk("a", 0, "cherry", vec![1.0, 1.0])]).expect("v2");
        assert_eq!(previous, vec![chunk_id("a", 0), chunk_id("a", 1)]);
        assert!(state.lexical.search("banana", 5).is_empty());
        assert_eq!(state.vector.len(), 1);
        assert!(!state.dedup.contains("a:1"));
        state.verify_consistency().expect("consistent");
    }

    #[test]
    fn detects_and_repairs_index_drift() {
        let config = EngineConfig::with_dimension(2);
        let mut state = EngineState::empty(&config);
        state.apply_commit(document("a", 1), vec![chunk("a", 0, "apple", vec![1.0, 0.0])]).expect("commit");
        state.vector.remove("a:0");
        assert!(matches!(state.verify_consistency(), Err(Error::IndexCorruption(_))));
        state.rebuild_indices(&config).expect("rebuild");
        state.verify_consistency().expect("repaired");
        assert_eq!(state.vector.len(), 1);
    }

    fn superseded_by(by: &str, text: &str) -> SupersededChunk {
        SupersededChunk {
            by: by.into(),
            similarity: 1.0,
            exact: true,
            text: text.into(),
            token_count: text.split_whitespace().count(),
            language: Language::English,
            section: 0,
            page_number: None,
            start_char: 0,
            end_char: text.chars().count(),
            fingerprint: Fingerprint { exact: 1, minhash: vec![0; 4] },
        }
    }

    /// `a` holds "goats browse brush" at a:0; `b` deferred the same text to it.
    fn deferring_pair() -> EngineState {
        let mut state = EngineState::empty(&EngineConfig::with_dimension(2));
        state.apply_commit(document("a", 1), vec![chunk("a", 0, "goats browse brush", vec![1.0, 0.0])]).expect("a");
        let mut own = chunk("b", 0, "held back", vec![0.0, 1.0]);
        own.fingerprint = Fingerprint { exact: 99, minhash: vec![99; 4] };
        let mut b = document("b", 1);
        b.superseded.push(superseded_by("a:0", "goats browse brush"));
        state.apply_commit(b, vec![own]).expect("b");
        state.verify_consistency().expect("consistent");
        state
    }

    #[test]
    fn retracting_the_holder_reinstates_deferred_text() {
        let mut state = deferring_pair();
        let mut revisions = state.plan_revisions("a", &[], 0.8);
        assert_eq!(revisions.len(), 1);
        assert!(revisions[0].document.superseded.is_empty());
        assert_eq!(revisions[0].chunks.len(), 2);
        assert_eq!(revisions[0].chunks[1].id, chunk_id("b", 1));
        assert_eq!(revisions[0].chunks[1].text, "goats browse brush");
        assert!(revisions[0].chunks[1].embedding.is_empty());

        revisions[0].chunks[1].embedding = vec![1.0, 0.0];
        state.retract("a", revisions).expect("retract");
        assert_eq!(state.store.chunk_ids("b").len(), 2);
        assert_eq!(state.store.document("b").expect("b").chunk_count, 2);
        assert_eq!(state.lexical.search("goats", 5).len(), 1);
        assert!(state.dependents.is_empty());
        state.verify_consistency().expect("consistent");
    }

    #[test]
    fn replacement_keeping_the_text_only_repoints() {
        let state = deferring_pair();
        let mut moved = vec![chunk("a", 0, "new opening", vec![0.0, 1.0]), chunk("a", 1, "goats browse brush", vec![1.0, 0.0])];
        moved[1].fingerprint = Fingerprint { exact: 1, minhash: vec![0; 4] };
        moved[0].fingerprint = Fingerprint { exact: 7, minhash: vec![7; 4] };
        let revisions = state.plan_revisions("a", &moved, 0.8);
        assert_eq!(revisions.len(), 1);
        assert_eq!(revisions[0].chunks.len(), 1);
        assert_eq!(revisions[0].document.superseded[0].by, "a:1");
    }

    #[test]
    fn unrelated_documents_are_not_revised() {
        let state = deferring_pair();
        assert!(state.plan_revisions("b", &[], 0.8).is_empty());
        assert!(state.plan_revisions("missing", &[], 0.8).is_empty());
    }
}
