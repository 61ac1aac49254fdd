//! Chunk Store: documents and their ordered chunks.
//!
//! The store is the source of truth the lexical and vector indices are
//! checked against. A document's chunk set is only ever replaced as a whole.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use ragdb_core::error::{Error, Result};
use ragdb_core::types::{chunk_id, Chunk, ChunkId, Document, DocumentId, Fingerprint};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkStore {
    documents: BTreeMap<DocumentId, Document>,
    chunks: BTreeMap<ChunkId, Chunk>,
    /// Chunk ids per document, in sequence order.
    by_document: BTreeMap<DocumentId, Vec<ChunkId>>,
}

impl ChunkStore {
    pub fn new() -> Self { Self::default() }

    /// Replace every chunk of `document` with `chunks`. Nothing changes when
    /// validation fails. Returns the stored ids in sequence order.
    pub fn put(&mut self, mut document: Document, mut chunks: Vec<Chunk>) -> Result<Vec<ChunkId>> {
        chunks.sort_by_key(|c| c.sequence);
        for (expected, chunk) in chunks.iter().enumerate() {
            if chunk.document_id != document.id {
                return Err(Error::InvalidInput(format!("chunk '{}' belongs to '{}', not '{}'", chunk.id, chunk.document_id, document.id)));
            }
            if chunk.sequence != expected {
                return Err(Error::InvalidInput(format!("document '{}' chunk sequence is not contiguous at {expected}", document.id)));
            }
            if chunk.id != chunk_id(&document.id, chunk.sequence) {
                return Err(Error::InvalidInput(format!("chunk id '{}' does not match its position", chunk.id)));
            }
        }

        let removed = self.delete(&document.id).unwrap_or_default();
        document.chunk_count = chunks.len();
        let ids: Vec<ChunkId> = chunks.iter().map(|c| c.id.clone()).collect();
        debug!(document_id = %document.id, removed = removed.len(), stored = ids.len(), "chunk store put");
        for chunk in chunks { self.chunks.insert(chunk.id.clone(), chunk); }
        self.by_document.insert(document.id.clone(), ids.clone());
        self.documents.insert(document.id.clone(), document);
        Ok(ids)
    }

    pub fn get(&self, id: &str) -> Result<&Chunk> {
        self.chunks.get(id).ok_or_else(|| Error::NotFound(format!("chunk '{id}'")))
    }

    /// Remove a document and all of its chunks; returns the removed chunk ids.
    pub fn delete(&mut self, document_id: &str) -> Result<Vec<ChunkId>> {
        if self.documents.remove(document_id).is_none() {
            return Err(Error::NotFound(format!("document '{document_id}'")));
        }
        let ids = self.by_document.remove(document_id).unwrap_or_default();
        for id in &ids { self.chunks.remove(id); }
        Ok(ids)
    }

    pub fn document(&self, id: &str) -> Result<&Document> {
        self.documents.get(id).ok_or_else(|| Error::NotFound(format!("document '{id}'")))
    }

    pub fn contains_document(&self, id: &str) -> bool { self.documents.contains_key(id) }

    pub fn documents(&self) -> impl Iterator<Item = &Document> { self.documents.values() }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> { self.chunks.values() }

    pub fn chunk_ids(&self, document_id: &str) -> &[ChunkId] {
        self.by_document.get(document_id).map_or(&[], Vec::as_slice)
    }

    /// Chunks of one document in sequence order.
    pub fn chunks_of(&self, document_id: &str) -> Vec<&Chunk> {
        self.chunk_ids(document_id).iter().filter_map(|id| self.chunks.get(id)).collect()
    }

    pub fn fingerprints(&self) -> impl Iterator<Item = (&ChunkId, &DocumentId, &Fingerprint)> {
        self.chunks.values().map(|c| (&c.id, &c.document_id, &c.fingerprint))
    }

    pub fn document_count(&self) -> usize { self.documents.len() }
    pub fn chunk_count(&self) -> usize { self.chunks.len() }
    pub fn is_empty(&self) -> bool { self.documents.is_empty() }

    /// Check the internal maps agree with each other.
    pub fn verify(&self) -> Result<()> {
        if self.by_document.len() != self.documents.len() {
            return Err(Error::IndexCorruption(format!("{} documents but {} chunk lists", self.documents.len(), self.by_document.len())));
        }
        let mut listed = 0usize;
        for (doc_id, ids) in &self.by_document {
            let doc = self.document(doc_id).map_err(|_| Error::IndexCorruption(format!("chunk list for unknown document '{doc_id}'")))?;
            if doc.chunk_count != ids.len() {
                return Err(Error::IndexCorruption(format!("document '{doc_id}' records {} chunks, has {}", doc.chunk_count, ids.len())));
            }
            for (seq, id) in ids.iter().enumerate() {
                match self.chunks.get(id) {
                    Some(c) if c.document_id == *doc_id && c.sequence == seq => {}
                    _ => return Err(Error::IndexCorruption(format!("chunk '{id}' missing or misplaced"))),
                }
            }
            listed += ids.len();
        }
        if listed != self.chunks.len() {
            return Err(Error::IndexCorruption(format!("{} chunks stored, {listed} referenced", self.chunks.len())));
        }
        Ok(())
    }
}
