//! Durable state: a JSON-lines write-ahead log plus periodic checkpoints.
//!
//! Layout under the data directory:
//!
//! ```text
//! wal.jsonl              one WalRecord per line, fsynced before the change is visible
//! checkpoint/
//!   manifest.json        format version, WAL sequence, per-file blake3 checksums
//!   chunks.json          Chunk Store
//!   lexical.json         lexical postings (per-chunk term frequencies)
//!   vectors.json         vector entries
//! ```
//!
//! A checkpoint is written to `checkpoint.tmp/` and swapped in by rename.
//! Recovery loads the checkpoint, verifies checksums and cross-store
//! consistency, then replays WAL records newer than the manifest's sequence.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ragdb_core::config::EngineConfig;
use ragdb_core::error::{Error, Result};
use ragdb_core::types::{Chunk, Document, DocumentId};
use ragdb_store::ChunkStore;
use ragdb_text::{LexicalIndex, LexicalSnapshot};
use ragdb_vector::{VectorIndex, VectorSnapshot};

use crate::state::{EngineState, Revision};

pub const WAL_FILE: &str = "wal.jsonl";
pub const CHECKPOINT_DIR: &str = "checkpoint";
const CHECKPOINT_TMP: &str = "checkpoint.tmp";
const CHECKPOINT_OLD: &str = "checkpoint.old";
const MANIFEST_FILE: &str = "manifest.json";
const STORE_FILE: &str = "chunks.json";
const LEXICAL_FILE: &str = "lexical.json";
const VECTOR_FILE: &str = "vectors.json";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    /// Every WAL record up to and including this sequence is in the checkpoint.
    pub wal_seq: u64,
    pub created_at: DateTime<Utc>,
    pub documents: usize,
    pub chunks: usize,
    pub dimension: usize,
    /// file name -> blake3 hex
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WalOp {
    Commit {
        document: Document,
        chunks: Vec<Chunk>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        revisions: Vec<Revision>,
    },
    Delete {
        document_id: DocumentId,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        revisions: Vec<Revision>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub seq: u64,
    #[serde(flatten)]
    pub op: WalOp,
}

/// Append-only log handle.
#[derive(Debug)]
pub struct Wal {
    path: PathBuf,
    file: File,
    last_seq: u64,
}

impl Wal {
    pub fn open(path: &Path, last_seq: u64) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { path: path.to_path_buf(), file, last_seq })
    }

    pub fn last_seq(&self) -> u64 { self.last_seq }

    /// Write and fsync one record; returns its sequence number.
    pub fn append(&mut self, op: WalOp) -> Result<u64> {
        let record = WalRecord { seq: self.last_seq + 1, op };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_data()?;
        self.last_seq = record.seq;
        Ok(record.seq)
    }

    /// Drop all records; called once a checkpoint covers them.
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        debug!(path = %self.path.display(), last_seq = self.last_seq, "wal truncated");
        Ok(())
    }
}

/// Read all complete records. A torn final line (crash mid-append) is
/// ignored; an unreadable line followed by more records is corruption.
pub fn read_wal(path: &Path) -> Result<Vec<WalRecord>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let lines: Vec<String> = BufReader::new(file).lines().collect::<std::io::Result<_>>()?;
    let mut records = Vec::with_capacity(lines.len());
    let last = lines.len().saturating_sub(1);
    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() { continue; }
        match serde_json::from_str::<WalRecord>(line) {
            Ok(r) => records.push(r),
            Err(e) if i == last => warn!(line = i + 1, error = %e, "ignoring torn wal tail"),
            Err(e) => return Err(Error::IndexCorruption(format!("wal line {}: {e}", i + 1))),
        }
    }
    Ok(records)
}

fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> Result<String> {
    let mut f = File::create(dir.join(name))?;
    f.write_all(bytes)?;
    f.sync_all()?;
    Ok(blake3::hash(bytes).to_hex().to_string())
}

/// Write a consistent checkpoint of `state` under `root/checkpoint`.
pub fn write_checkpoint(root: &Path, state: &EngineState, wal_seq: u64) -> Result<Manifest> {
    fs::create_dir_all(root)?;
    let tmp = root.join(CHECKPOINT_TMP);
    if tmp.exists() { fs::remove_dir_all(&tmp)?; }
    fs::create_dir_all(&tmp)?;

    let mut files = BTreeMap::new();
    files.insert(STORE_FILE.to_string(), write_file(&tmp, STORE_FILE, &serde_json::to_vec(&state.store)?)?);
    files.insert(LEXICAL_FILE.to_string(), write_file(&tmp, LEXICAL_FILE, &serde_json::to_vec(&state.lexical.snapshot())?)?);
    files.insert(VECTOR_FILE.to_string(), write_file(&tmp, VECTOR_FILE, &serde_json::to_vec(&state.vector.snapshot())?)?);
    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        wal_seq,
        created_at: Utc::now(),
        documents: state.store.document_count(),
        chunks: state.store.chunk_count(),
        dimension: state.vector.dimension(),
        files,
    };
    write_file(&tmp, MANIFEST_FILE, &serde_json::to_vec_pretty(&manifest)?)?;

    let target = root.join(CHECKPOINT_DIR);
    let old = root.join(CHECKPOINT_OLD);
    if target.exists() {
        if old.exists() { fs::remove_dir_all(&old)?; }
        fs::rename(&target, &old)?;
    }
    fs::rename(&tmp, &target)?;
    if old.exists() { fs::remove_dir_all(&old)?; }
    info!(root = %root.display(), wal_seq, documents = manifest.documents, chunks = manifest.chunks, "checkpoint written");
    Ok(manifest)
}

fn read_verified<T: DeserializeOwned>(dir: &Path, name: &str, manifest: &Manifest) -> Result<T> {
    let bytes = fs::read(dir.join(name))?;
    let expected = manifest.files.get(name).ok_or_else(|| Error::IndexCorruption(format!("manifest lists no checksum for {name}")))?;
    let actual = blake3::hash(&bytes).to_hex().to_string();
    if *expected != actual {
        return Err(Error::IndexCorruption(format!("{name} checksum mismatch")));
    }
    serde_json::from_slice(&bytes).map_err(|e| Error::IndexCorruption(format!("{name}: {e}")))
}

/// Checkpoint directory to load: the live one, or the previous one when a
/// crash interrupted the swap.
fn checkpoint_dir(root: &Path) -> Option<PathBuf> {
    [CHECKPOINT_DIR, CHECKPOINT_OLD].iter().map(|d| root.join(d)).find(|d| d.join(MANIFEST_FILE).exists())
}

/// Load the checkpoint under `root`, if any. With `repair`, damaged or
/// inconsistent index files are rebuilt from the Chunk Store; a damaged
/// Chunk Store is always fatal.
pub fn read_checkpoint(root: &Path, config: &EngineConfig, repair: bool) -> Result<Option<(Manifest, EngineState)>> {
    let Some(dir) = checkpoint_dir(root) else { return Ok(None) };
    let manifest: Manifest = serde_json::from_slice(&fs::read(dir.join(MANIFEST_FILE))?).map_err(|e| Error::IndexCorruption(format!("manifest: {e}")))?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(Error::IndexCorruption(format!("unsupported checkpoint format {}", manifest.format_version)));
    }
    if manifest.dimension != config.vector.dimension {
        return Err(Error::DimensionMismatch { expected: config.vector.dimension, actual: manifest.dimension });
    }
    let store: ChunkStore = read_verified(&dir, STORE_FILE, &manifest)?;
    store.verify()?;

    let mut state = EngineState::empty(config);
    state.store = store;
    let indices = read_verified::<LexicalSnapshot>(&dir, LEXICAL_FILE, &manifest).and_then(|lex| {
        let vec: VectorSnapshot = read_verified(&dir, VECTOR_FILE, &manifest)?;
        Ok((LexicalIndex::from_snapshot(lex), VectorIndex::from_snapshot(config.vector.clone(), vec)?))
    });
    let loaded = indices.and_then(|(lexical, vector)| {
        state.lexical = lexical;
        state.vector = vector;
        state.verify_consistency()
    });
    if let Err(e) = loaded {
        if !repair { return Err(e); }
        warn!(error = %e, "rebuilding indices from chunk store");
        state.rebuild_indices(config)?;
    }
    state.rebuild_dedup(config);
    Ok(Some((manifest, state)))
}

/// Apply WAL records newer than `after_seq`; returns the last sequence seen.
pub fn replay(state: &mut EngineState, records: Vec<WalRecord>, after_seq: u64) -> Result<u64> {
    let mut last = after_seq;
    let mut applied = 0usize;
    for record in records {
        if record.seq <= after_seq { continue; }
        match record.op {
            WalOp::Commit { document, chunks, revisions } => { state.commit(document, chunks, revisions)?; }
            WalOp::Delete { document_id, revisions } => match state.retract(&document_id, revisions) {
                Ok(_) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            },
        }
        last = last.max(record.seq);
        applied += 1;
    }
    if applied > 0 { info!(applied, last_seq = last, "replayed wal"); }
    Ok(last)
}
