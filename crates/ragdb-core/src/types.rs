//! Domain types shared by the chunk store, both indices and the hybrid engine.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type DocumentId = String;
pub type ChunkId = String;

/// Build the chunk identifier for position `sequence` of `document_id`.
pub fn chunk_id(document_id: &str, sequence: usize) -> ChunkId {
    format!("{document_id}:{sequence}")
}

/// Stable document identity derived from a source path.
pub fn document_id_for_path(path: &str) -> DocumentId {
    blake3::hash(path.as_bytes()).to_hex()[..32].to_string()
}

/// blake3 hex digest of document text.
pub fn checksum(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Languages the analyzers and the detector know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    Spanish,
    French,
    German,
    Italian,
    Portuguese,
    Dutch,
    #[default]
    Unknown,
}

impl Language {
    pub const ALL: [Language; 8] = [
        Self::English,
        Self::Spanish,
        Self::French,
        Self::German,
        Self::Italian,
        Self::Portuguese,
        Self::Dutch,
        Self::Unknown,
    ];

    /// ISO 639-1 code, `"und"` for [`Language::Unknown`].
    pub fn code(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Spanish => "es",
            Self::French => "fr",
            Self::German => "de",
            Self::Italian => "it",
            Self::Portuguese => "pt",
            Self::Dutch => "nl",
            Self::Unknown => "und",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One parsed section of a source document (a page, a CSV row, a whole file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub text: String,
    pub page_number: Option<u32>,
}

impl Section {
    pub fn new(text: impl Into<String>) -> Self { Self { text: text.into(), page_number: None } }

    pub fn with_page(text: impl Into<String>, page_number: u32) -> Self {
        Self { text: text.into(), page_number: Some(page_number) }
    }
}

/// A document as handed to the ingestion pipeline by a parser or watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInput {
    pub id: Option<DocumentId>,
    pub source_path: String,
    pub title: Option<String>,
    pub sections: Vec<Section>,
}

impl DocumentInput {
    /// A single-section document identified by its source path.
    pub fn from_text(source_path: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: None, source_path: source_path.into(), title: None, sections: vec![Section::new(text)] }
    }

    /// A document with an explicit id and pre-split sections.
    pub fn with_sections<I, S>(id: impl Into<String>, sections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        Self { source_path: id.clone(), id: Some(id), title: None, sections: sections.into_iter().map(Section::new).collect() }
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self { self.id = Some(id.into()); self }

    /// The explicit id, or one derived from `source_path`.
    pub fn document_id(&self) -> DocumentId {
        self.id.clone().unwrap_or_else(|| document_id_for_path(&self.source_path))
    }

    pub fn title_or_file_name(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            Path::new(&self.source_path)
                .file_name()
                .map_or_else(|| self.source_path.clone(), |n| n.to_string_lossy().to_string())
        })
    }
}

/// Stored document metadata. Re-ingestion replaces it wholesale; the only
/// other change is a reinstatement of `superseded` chunks when the chunks
/// they deferred to are retracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub source_path: String,
    pub title: String,
    pub language: Language,
    pub ingested_at: DateTime<Utc>,
    pub checksum: String,
    pub chunk_count: usize,
    /// Chunks left out because another document already holds their text.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superseded: Vec<SupersededChunk>,
}

/// A chunk dropped as a duplicate of another document's chunk. Everything
/// but the embedding is kept so the chunk can be reinstated if `by` goes away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupersededChunk {
    /// The chunk holding this text instead.
    pub by: ChunkId,
    pub similarity: f64,
    pub exact: bool,
    pub text: String,
    pub token_count: usize,
    pub language: Language,
    pub section: usize,
    pub page_number: Option<u32>,
    pub start_char: usize,
    pub end_char: usize,
    pub fingerprint: Fingerprint,
}

impl SupersededChunk {
    /// A live chunk at `sequence` of `document_id`, still to be embedded.
    pub fn into_chunk(self, document_id: &str, sequence: usize) -> Chunk {
        Chunk {
            id: chunk_id(document_id, sequence),
            document_id: document_id.to_string(),
            sequence,
            text: self.text,
            token_count: self.token_count,
            language: self.language,
            section: self.section,
            page_number: self.page_number,
            start_char: self.start_char,
            end_char: self.end_char,
            embedding: Vec::new(),
            fingerprint: self.fingerprint,
        }
    }
}

/// A chunk of a source document that is independently indexed.
///
/// - `sequence`: contiguous position within the parent document, starting at 0
/// - `section`/`page_number`: where in the source the text came from
/// - `start_char`/`end_char`: character offsets within the section text
/// - `fingerprint`: content fingerprint used for deduplication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub sequence: usize,
    pub text: String,
    pub token_count: usize,
    pub language: Language,
    pub section: usize,
    pub page_number: Option<u32>,
    pub start_char: usize,
    pub end_char: usize,
    pub embedding: Vec<f32>,
    pub fingerprint: Fingerprint,
}

/// Normalized content signature: an exact hash plus a MinHash signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub exact: u64,
    pub minhash: Vec<u64>,
}

/// Indicates which engine produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Vector,
    Text,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Self::Vector => "vector", Self::Text => "lexical" })
    }
}

/// The minimal surface returned by both indices.
///
/// `id` matches `Chunk::id`. `score` is engine-specific but
/// higher is always better. `source` labels the origin engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: ChunkId,
    pub score: f32,
    pub source: SourceKind,
}

/// One fused result. Either per-source score may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResultItem {
    pub chunk_id: ChunkId,
    pub lexical_score: Option<f32>,
    pub vector_score: Option<f32>,
    pub fused_score: f64,
    /// 1-based position in the fused list.
    pub rank: usize,
}

/// Order by descending score, then ascending id. NaN sorts last.
pub fn cmp_score_then_id(a_score: f64, a_id: &str, b_score: f64, b_id: &str) -> std::cmp::Ordering {
    let key = |s: f64| if s.is_nan() { f64::NEG_INFINITY } else { s };
    key(b_score).total_cmp(&key(a_score)).then_with(|| a_id.cmp(b_id))
}
