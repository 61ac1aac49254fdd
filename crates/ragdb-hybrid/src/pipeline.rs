//! Ingestion Pipeline stages for one document:
//! preprocess -> chunk -> fingerprint -> dedup -> embed -> assemble.
//!
//! Nothing here touches committed state; the engine takes the staged result
//! and commits it in one step. Duplicates are tracked by draft position until
//! assembly, because sequence numbers (and so chunk ids) are only known once
//! every drop has been decided. A chunk dropped in favour of another
//! document's chunk is kept on the document as a [`SupersededChunk`].

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use ragdb_core::chunker::{ChunkDraft, Chunker};
use ragdb_core::config::DedupConfig;
use ragdb_core::error::Result;
use ragdb_core::language::detect;
use ragdb_core::text::preprocess;
use ragdb_core::traits::Embedder;
use ragdb_core::types::{checksum, chunk_id, Chunk, ChunkId, Document, DocumentId, DocumentInput, Fingerprint, Language, Section, SupersededChunk};
use ragdb_dedup::{DedupIndex, Fingerprinter};

use crate::concurrency::CancellationToken;

/// Why a chunk was not stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    ExactDuplicate { of: ChunkId },
    NearDuplicate { of: ChunkId, similarity: f64 },
}

impl SkipReason {
    pub fn of(&self) -> &str {
        match self {
            Self::ExactDuplicate { of } | Self::NearDuplicate { of, .. } => of,
        }
    }
}

/// A dropped chunk: its position among the document's chunk drafts and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateRecord {
    pub position: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    Stored,
    /// Checksum matched the stored version; nothing was touched.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub document_id: DocumentId,
    pub outcome: IngestOutcome,
    pub stored: Vec<ChunkId>,
    /// Chunk ids of the replaced version that are no longer live.
    pub retracted: Vec<ChunkId>,
    pub duplicates: Vec<DuplicateRecord>,
    pub language: Language,
    pub elapsed_ms: u64,
}

impl IngestReport {
    pub fn is_unchanged(&self) -> bool { self.outcome == IngestOutcome::Unchanged }
}

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Re-ingest even when the checksum matches the stored document.
    pub force: bool,
    pub cancel: Option<CancellationToken>,
}

impl IngestOptions {
    pub fn forced() -> Self { Self { force: true, cancel: None } }

    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self { self.cancel = Some(token); self }
}

/// One chunk draft that survived dedup so far.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub position: usize,
    pub draft: ChunkDraft,
    pub language: Language,
    pub fingerprint: Fingerprint,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
enum Target {
    /// Another draft of the same document, by position.
    Local(usize),
    Stored(ChunkId),
}

#[derive(Debug, Clone)]
struct Pending {
    target: Target,
    similarity: f64,
    exact: bool,
    candidate: Candidate,
}

/// A document after preprocessing, chunking and dedup, before commit.
#[derive(Debug, Clone)]
pub(crate) struct Staged {
    pub document_id: DocumentId,
    pub source_path: String,
    pub title: String,
    pub checksum: String,
    pub language: Language,
    pub candidates: Vec<Candidate>,
    pending: Vec<Pending>,
}

/// Preprocessed sections and their checksum; cheap enough to compute before
/// deciding whether the document changed.
pub(crate) struct Prepared {
    pub sections: Vec<Section>,
    pub checksum: String,
}

pub(crate) fn prepare(input: &DocumentInput) -> Prepared {
    let sections: Vec<Section> = input
        .sections
        .iter()
        .map(|s| Section { text: preprocess(&s.text), page_number: s.page_number })
        .collect();
    let joined = sections.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join("\n\n");
    Prepared { checksum: checksum(&joined), sections }
}

/// Chunk, fingerprint and collapse repeats within the document.
pub(crate) fn stage(
    input: &DocumentInput,
    prepared: Prepared,
    chunker: &Chunker,
    fingerprinter: &Fingerprinter,
    dedup: &DedupConfig,
) -> Staged {
    let document_id = input.document_id();
    let full_text = prepared.sections.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join("\n\n");
    let language = detect(&full_text);
    let drafts = chunker.chunk_sections(&prepared.sections);

    let mut local = DedupIndex::new(dedup);
    let mut candidates = Vec::with_capacity(drafts.len());
    let mut pending = Vec::new();
    for (position, draft) in drafts.into_iter().enumerate() {
        let fingerprint = fingerprinter.fingerprint(&draft.text);
        let chunk_language = match detect(&draft.text) {
            Language::Unknown => language,
            detected => detected,
        };
        let candidate = Candidate { position, draft, language: chunk_language, fingerprint, embedding: Vec::new() };
        if let Some(m) = local.is_duplicate(&candidate.fingerprint, dedup.threshold, None) {
            let target = m.chunk_id.parse::<usize>().map_or(Target::Stored(m.chunk_id), Target::Local);
            pending.push(Pending { target, similarity: m.similarity, exact: m.exact, candidate });
            continue;
        }
        local.insert(&position.to_string(), &document_id, candidate.fingerprint.clone());
        candidates.push(candidate);
    }
    debug!(document_id = %document_id, chunks = candidates.len(), repeated = pending.len(), language = %language.code(), "staged document");

    Staged {
        document_id,
        source_path: input.source_path.clone(),
        title: input.title_or_file_name(),
        checksum: prepared.checksum,
        language,
        candidates,
        pending,
    }
}

impl Staged {
    /// Drop candidates that duplicate chunks of other committed documents.
    /// Returns how many were dropped.
    pub(crate) fn drop_stored_duplicates(&mut self, index: &DedupIndex, threshold: f64) -> usize {
        let before = self.candidates.len();
        for candidate in std::mem::take(&mut self.candidates) {
            match index.is_duplicate(&candidate.fingerprint, threshold, Some(&self.document_id)) {
                Some(m) => self.pending.push(Pending { target: Target::Stored(m.chunk_id), similarity: m.similarity, exact: m.exact, candidate }),
                None => self.candidates.push(candidate),
            }
        }
        before - self.candidates.len()
    }

    /// Put back candidates dropped in favour of stored chunks that no longer
    /// hold their text, as judged by `holds(chunk_id, fingerprint)`. Returns
    /// how many came back; they still need embedding.
    pub(crate) fn revive_missing(&mut self, holds: impl Fn(&str, &Fingerprint) -> bool) -> usize {
        let before = self.candidates.len();
        for p in std::mem::take(&mut self.pending) {
            let gone = matches!(&p.target, Target::Stored(id) if !holds(id, &p.candidate.fingerprint));
            if gone { self.candidates.push(p.candidate); } else { self.pending.push(p); }
        }
        self.candidates.sort_by_key(|c| c.position);
        self.candidates.len() - before
    }

    /// Embed every candidate still missing a vector. Cancellation is checked
    /// on both sides of the embedder call.
    pub(crate) fn embed<E: Embedder>(&mut self, embedder: &E, cancel: impl Fn() -> Result<()>) -> Result<()> {
        let texts: Vec<String> = self.candidates.iter().filter(|c| c.embedding.is_empty()).map(|c| c.draft.text.clone()).collect();
        if texts.is_empty() { return Ok(()); }
        cancel()?;
        let vectors = embedder.embed_batch(&texts)?;
        cancel()?;
        let mut vectors = vectors.into_iter();
        for candidate in self.candidates.iter_mut().filter(|c| c.embedding.is_empty()) {
            if let Some(v) = vectors.next() { candidate.embedding = v; }
        }
        Ok(())
    }

    /// Number the survivors `0..n` and resolve duplicate targets to chunk ids.
    pub(crate) fn assemble(self) -> (Document, Vec<Chunk>, Vec<DuplicateRecord>) {
        let mut resolved: HashMap<usize, ChunkId> = HashMap::with_capacity(self.candidates.len() + self.pending.len());
        let chunks: Vec<Chunk> = self
            .candidates
            .into_iter()
            .enumerate()
            .map(|(sequence, c)| {
                let id = chunk_id(&self.document_id, sequence);
                resolved.insert(c.position, id.clone());
                Chunk {
                    id,
                    document_id: self.document_id.clone(),
                    sequence,
                    token_count: c.draft.token_count,
                    language: c.language,
                    section: c.draft.section,
                    page_number: c.draft.page_number,
                    start_char: c.draft.start_char,
                    end_char: c.draft.end_char,
                    text: c.draft.text,
                    embedding: c.embedding,
                    fingerprint: c.fingerprint,
                }
            })
            .collect();

        let own: HashSet<ChunkId> = resolved.values().cloned().collect();

        // Stored targets first so a local target dropped later still resolves.
        let mut pending = self.pending;
        pending.sort_by_key(|p| (matches!(p.target, Target::Local(_)), p.candidate.position));
        let mut duplicates = Vec::with_capacity(pending.len());
        let mut superseded = Vec::new();
        for p in pending {
            let position = p.candidate.position;
            let of = match p.target {
                Target::Stored(id) => id,
                Target::Local(target) => match resolved.get(&target) {
                    Some(id) => id.clone(),
                    None => continue,
                },
            };
            resolved.entry(position).or_insert_with(|| of.clone());
            if p.exact {
                debug!(document_id = %self.document_id, position, of = %of, "dropped exact duplicate chunk");
            } else {
                info!(document_id = %self.document_id, position, superseded_by = %of, similarity = p.similarity, "dropped near-duplicate chunk");
            }
            if !own.contains(&of) {
                let c = p.candidate;
                superseded.push((position, SupersededChunk {
                    by: of.clone(),
                    similarity: p.similarity,
                    exact: p.exact,
                    text: c.draft.text,
                    token_count: c.draft.token_count,
                    language: c.language,
                    section: c.draft.section,
                    page_number: c.draft.page_number,
                    start_char: c.draft.start_char,
                    end_char: c.draft.end_char,
                    fingerprint: c.fingerprint,
                }));
            }
            let reason = if p.exact { SkipReason::ExactDuplicate { of } } else { SkipReason::NearDuplicate { of, similarity: p.similarity } };
            duplicates.push(DuplicateRecord { position, reason });
        }
        duplicates.sort_by_key(|d| d.position);
        superseded.sort_by_key(|(position, _)| *position);

        let document = Document {
            id: self.document_id,
            source_path: self.source_path,
            title: self.title,
            language: self.language,
            ingested_at: Utc::now(),
            checksum: self.checksum,
            chunk_count: chunks.len(),
            superseded: superseded.into_iter().map(|(_, s)| s).collect(),
        };
        (document, chunks, duplicates)
    }
}
