//! The hybrid engine: ingestion, deletion and fused search over one
//! [`EngineState`] guarded by a read/write lock.
//!
//! Writers (commit, delete, rebuild) serialize on the commit log mutex and
//! hold the state write lock only for the in-memory swap, after the change is
//! durable in the WAL. Searches take the read lock once and see the last
//! committed version of every document.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};
use walkdir::WalkDir;

use ragdb_core::chunker::Chunker;
use ragdb_core::config::{expand_path, EngineConfig, SameDocumentPolicy};
use ragdb_core::error::{Error, IngestStage, Result};
use ragdb_core::traits::Embedder;
use ragdb_core::types::{Chunk, ChunkId, Document, DocumentId, DocumentInput, QueryResultItem, SearchHit, SourceKind};
use ragdb_dedup::{estimate_similarity, Fingerprinter};
use ragdb_embed::{default_embedder, RetryingEmbedder};

use crate::cache::{QueryCache, QueryKey, SearchMode};
use crate::concurrency::DocumentGates;
use crate::fusion::{candidate_count, fuse};
use crate::persist::{self, Manifest, Wal, WalOp, WAL_FILE};
use crate::pipeline::{self, IngestOptions, IngestOutcome, IngestReport};
use crate::state::{EngineState, Revision};

/// File extensions picked up by [`HybridSearchEngine::ingest_directory`].
const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

/// A fused result with the chunk metadata the citation stage needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedChunk {
    #[serde(flatten)]
    pub result: QueryResultItem,
    pub document_id: DocumentId,
    pub source_path: String,
    pub title: String,
    pub sequence: usize,
    pub section: usize,
    pub page_number: Option<u32>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SearchResponse {
    pub items: Vec<RankedChunk>,
    /// One of the two indices did not contribute.
    pub degraded: bool,
    pub warnings: Vec<String>,
    /// State version the results were read from.
    pub version: u64,
}

impl SearchResponse {
    pub fn chunk_ids(&self) -> Vec<&str> { self.items.iter().map(|i| i.result.chunk_id.as_str()).collect() }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub documents: usize,
    pub chunks: usize,
    pub lexical_terms: usize,
    pub vectors: usize,
    pub vector_partitioned: bool,
    pub version: u64,
    pub lexical_available: bool,
    pub vector_available: bool,
}

/// Totals for one [`HybridSearchEngine::ingest_directory`] run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DirectoryReport {
    pub files: usize,
    pub stored: usize,
    pub unchanged: usize,
    /// Documents stored with no chunks (empty, or every chunk a duplicate).
    pub skipped: usize,
    pub failed: usize,
    pub chunks: usize,
    pub duplicates: usize,
    pub errors: Vec<(PathBuf, String)>,
}

#[derive(Debug, Default)]
struct CommitLog {
    root: Option<PathBuf>,
    wal: Option<Wal>,
    since_checkpoint: usize,
}

impl CommitLog {
    fn append(&mut self, op: WalOp) -> Result<()> {
        if let Some(wal) = self.wal.as_mut() { wal.append(op)?; }
        Ok(())
    }

    fn last_seq(&self) -> u64 { self.wal.as_ref().map_or(0, Wal::last_seq) }
}

pub struct HybridSearchEngine {
    config: EngineConfig,
    embedder: RetryingEmbedder<Arc<dyn Embedder>>,
    chunker: Chunker,
    fingerprinter: Fingerprinter,
    state: RwLock<EngineState>,
    commit: Mutex<CommitLog>,
    gates: DocumentGates,
    lexical_available: AtomicBool,
    vector_available: AtomicBool,
    fused_cache: QueryCache<SearchResponse>,
    hits_cache: QueryCache<Vec<SearchHit>>,
}

impl HybridSearchEngine {
    /// Build an engine, loading `storage.data_dir` when set. Fails with
    /// `InvalidConfig` for a bad configuration and `DimensionMismatch` when
    /// the embedder's dimension disagrees with the configured D.
    pub fn new(config: EngineConfig, embedder: Arc<dyn Embedder>) -> Result<Self> { Self::build(config, embedder, false) }

    /// Like [`HybridSearchEngine::new`], but damaged or inconsistent index
    /// files are rebuilt from the Chunk Store instead of failing.
    pub fn open_with_repair(config: EngineConfig, embedder: Arc<dyn Embedder>) -> Result<Self> { Self::build(config, embedder, true) }

    /// Engine backed by the cached hashing embedder.
    pub fn with_default_embedder(config: EngineConfig) -> Result<Self> {
        let embedder = default_embedder(&config.embedding);
        Self::new(config, embedder)
    }

    fn build(config: EngineConfig, embedder: Arc<dyn Embedder>, repair: bool) -> Result<Self> {
        config.validate()?;
        if embedder.dim() != config.embedding.dimension {
            return Err(Error::DimensionMismatch { expected: config.embedding.dimension, actual: embedder.dim() });
        }
        let (state, log) = match &config.storage.data_dir {
            Some(dir) => {
                let root = expand_path(dir.to_string_lossy());
                let (state, wal) = recover(&root, &config, repair)?;
                (state, CommitLog { root: Some(root), wal: Some(wal), since_checkpoint: 0 })
            }
            None => (EngineState::empty(&config), CommitLog::default()),
        };
        info!(
            model = embedder.model_id(),
            dimension = config.embedding.dimension,
            documents = state.store.document_count(),
            chunks = state.store.chunk_count(),
            persistent = log.root.is_some(),
            "engine ready"
        );
        Ok(Self {
            embedder: RetryingEmbedder::new(embedder, &config.embedding),
            chunker: Chunker::new(config.chunking.clone()),
            fingerprinter: Fingerprinter::new(&config.dedup),
            state: RwLock::new(state),
            commit: Mutex::new(log),
            gates: DocumentGates::new(),
            lexical_available: AtomicBool::new(true),
            vector_available: AtomicBool::new(true),
            fused_cache: QueryCache::from_config(&config.cache),
            hits_cache: QueryCache::from_config(&config.cache),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig { &self.config }

    pub fn ingest(&self, input: &DocumentInput) -> Result<IngestReport> { self.ingest_with(input, &IngestOptions::default()) }

    /// Run one document through the pipeline and commit it atomically,
    /// replacing any previous version. On error the previous version stays.
    #[instrument(skip_all, fields(document_id = %input.document_id(), force = options.force))]
    pub fn ingest_with(&self, input: &DocumentInput, options: &IngestOptions) -> Result<IngestReport> {
        let started = Instant::now();
        let document_id = input.document_id();
        let result = self.run_ingest(&document_id, input, options, started);
        match &result {
            Ok(report) => info!(
                document_id = %document_id,
                outcome = ?report.outcome,
                stored = report.stored.len(),
                duplicates = report.duplicates.len(),
                elapsed_ms = report.elapsed_ms,
                "ingested document"
            ),
            Err(e) if e.is_cancelled() => info!(document_id = %document_id, error = %e, "ingestion cancelled"),
            Err(e) => error!(document_id = %document_id, stage = ?e.stage(), error = %e, "ingestion failed"),
        }
        result
    }

    fn run_ingest(&self, document_id: &str, input: &DocumentInput, options: &IngestOptions, started: Instant) -> Result<IngestReport> {
        let permit = self.gates.acquire(document_id, self.config.ingest.same_document_policy);
        let check = || permit.check(options.cancel.as_ref());
        check().map_err(|e| e.at_stage(document_id, IngestStage::Preprocess))?;

        let prepared = pipeline::prepare(input);
        if !(options.force || self.config.ingest.force) {
            let state = self.state.read();
            if let Ok(existing) = state.store.document(document_id) {
                if existing.checksum == prepared.checksum {
                    debug!(document_id, "checksum unchanged, skipping");
                    return Ok(IngestReport {
                        document_id: document_id.to_string(),
                        outcome: IngestOutcome::Unchanged,
                        stored: state.store.chunk_ids(document_id).to_vec(),
                        retracted: Vec::new(),
                        duplicates: Vec::new(),
                        language: existing.language,
                        elapsed_ms: elapsed_ms(started),
                    });
                }
            }
        }

        let mut staged = pipeline::stage(input, prepared, &self.chunker, &self.fingerprinter, &self.config.dedup);
        check().map_err(|e| e.at_stage(document_id, IngestStage::Chunk))?;
        let cross_document = self.config.dedup.cross_document;
        let threshold = self.config.dedup.threshold;
        if cross_document {
            let state = self.state.read();
            staged.drop_stored_duplicates(&state.dedup, threshold);
        }
        check().map_err(|e| e.at_stage(document_id, IngestStage::Dedup))?;
        staged.embed(&self.embedder, &check).map_err(|e| e.at_stage(document_id, IngestStage::Embed))?;

        let mut log = self.commit.lock();
        check().map_err(|e| e.at_stage(document_id, IngestStage::Commit))?;
        if cross_document {
            // other documents may have committed or retracted the same text meanwhile
            let state = self.state.read();
            let revived = staged.revive_missing(|id, fingerprint| {
                state.store.get(id).is_ok_and(|c| c.fingerprint.exact == fingerprint.exact || estimate_similarity(fingerprint, &c.fingerprint) >= threshold)
            });
            let dropped = staged.drop_stored_duplicates(&state.dedup, threshold);
            drop(state);
            if revived + dropped > 0 { debug!(document_id, revived, dropped, "dedup decisions changed by a concurrent commit"); }
            if revived > 0 {
                staged.embed(&self.embedder, || Ok(())).map_err(|e| e.at_stage(document_id, IngestStage::Embed))?;
            }
        }
        let (document, chunks, duplicates) = staged.assemble();
        let language = document.language;
        let stored: Vec<ChunkId> = chunks.iter().map(|c| c.id.clone()).collect();
        let mut revisions = self.state.read().plan_revisions(document_id, &chunks, threshold);
        self.embed_reinstated(&mut revisions).map_err(|e| e.at_stage(document_id, IngestStage::Commit))?;
        {
            let state = self.state.read();
            state.validate_commit(&chunks).map_err(|e| e.at_stage(document_id, IngestStage::Commit))?;
            for r in &revisions { state.validate_commit(&r.chunks).map_err(|e| e.at_stage(document_id, IngestStage::Commit))?; }
        }
        log.append(WalOp::Commit { document: document.clone(), chunks: chunks.clone(), revisions: revisions.clone() })
            .map_err(|e| e.at_stage(document_id, IngestStage::Persist))?;
        let previous = self.state.write().commit(document, chunks, revisions).map_err(|e| e.at_stage(document_id, IngestStage::Commit))?;
        self.after_commit(&mut log);
        self.refresh_partitions();
        drop(log);

        Ok(IngestReport {
            document_id: document_id.to_string(),
            outcome: IngestOutcome::Stored,
            retracted: previous.into_iter().filter(|id| !stored.contains(id)).collect(),
            stored,
            duplicates,
            language,
            elapsed_ms: elapsed_ms(started),
        })
    }

    /// Ingest independent documents in parallel on the blocking pool.
    /// Results are returned in input order.
    pub async fn ingest_many(self: &Arc<Self>, inputs: Vec<DocumentInput>) -> Vec<Result<IngestReport>> {
        let tasks = inputs.into_iter().map(|input| {
            let engine = Arc::clone(self);
            tokio::task::spawn_blocking(move || engine.ingest(&input))
        });
        join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or_else(|e| Err(Error::Cancelled(format!("ingestion task aborted: {e}")))))
            .collect()
    }

    /// Ingest every `.txt`/`.md` file under `dir`, in path order. One failing
    /// file does not stop the walk.
    #[instrument(skip(self))]
    pub fn ingest_directory(&self, dir: &Path, show_progress: bool) -> Result<DirectoryReport> {
        if !dir.is_dir() {
            return Err(Error::NotFound(format!("directory {}", dir.display())));
        }
        let files = list_text_files(dir);
        let bar = show_progress.then(|| progress_bar(files.len()));
        let mut report = DirectoryReport { files: files.len(), ..DirectoryReport::default() };

        for path in files {
            let outcome = fs::read(&path).map_err(Error::from).and_then(|bytes| {
                let text = String::from_utf8(bytes).map_err(|e| Error::InvalidInput(format!("{} is not valid UTF-8: {e}", path.display())))?;
                self.ingest(&DocumentInput::from_text(path.to_string_lossy(), text))
            });
            match outcome {
                Ok(r) if r.is_unchanged() => report.unchanged += 1,
                Ok(r) => {
                    if r.stored.is_empty() { report.skipped += 1; } else { report.stored += 1; }
                    report.chunks += r.stored.len();
                    report.duplicates += r.duplicates.len();
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "file ingestion failed");
                    report.failed += 1;
                    report.errors.push((path.clone(), e.to_string()));
                }
            }
            if let Some(pb) = &bar {
                pb.set_message(path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default());
                pb.inc(1);
            }
        }
        if let Some(pb) = bar { pb.finish_with_message("done"); }
        info!(
            files = report.files,
            stored = report.stored,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            "directory ingestion finished"
        );
        Ok(report)
    }

    /// Retract a document and all of its chunks from every store.
    #[instrument(skip(self))]
    pub fn delete_document(&self, document_id: &str) -> Result<Vec<ChunkId>> {
        let _permit = self.gates.acquire(document_id, SameDocumentPolicy::Wait);
        let mut log = self.commit.lock();
        if !self.state.read().store.contains_document(document_id) {
            return Err(Error::NotFound(format!("document '{document_id}'")));
        }
        let mut revisions = self.state.read().plan_revisions(document_id, &[], self.config.dedup.threshold);
        self.embed_reinstated(&mut revisions)?;
        for r in &revisions { self.state.read().validate_commit(&r.chunks)?; }
        log.append(WalOp::Delete { document_id: document_id.to_string(), revisions: revisions.clone() })?;
        let removed = self.state.write().retract(document_id, revisions)?;
        self.after_commit(&mut log);
        self.refresh_partitions();
        info!(document_id, removed = removed.len(), "deleted document");
        Ok(removed)
    }

    /// Fused top-`k` over both indices. An unavailable index, or a failing
    /// query embedding, degrades to the other index with a warning. Results
    /// with both indices healthy are cached per state version.
    #[instrument(skip(self), fields(degraded = tracing::field::Empty, cached = tracing::field::Empty))]
    pub fn search(&self, query: &str, k: usize) -> Result<SearchResponse> {
        let version = self.state.read().version;
        if k == 0 || query.trim().is_empty() {
            return Ok(SearchResponse { version, ..SearchResponse::default() });
        }
        let lexical_on = self.lexical_available.load(Ordering::Acquire);
        let cacheable = lexical_on && self.vector_available.load(Ordering::Acquire);
        if cacheable {
            if let Some(hit) = self.fused_cache.get(&QueryKey::new(query, SearchMode::Hybrid, k, version)) {
                tracing::Span::current().record("cached", true);
                return Ok(hit);
            }
        }
        let mut warnings = Vec::new();
        if !lexical_on { warnings.push("lexical index unavailable".to_string()); }
        let query_vector = if self.vector_available.load(Ordering::Acquire) {
            match self.embedder.embed(query) {
                Ok(v) => Some(v),
                Err(e) => {
                    warnings.push(format!("query embedding failed: {e}"));
                    None
                }
            }
        } else {
            warnings.push("vector index unavailable".to_string());
            None
        };

        let state = self.state.read();
        let n = candidate_count(k, self.config.fusion.candidate_multiplier);
        let lexical_hits = if lexical_on { state.lexical.search(query, n) } else { Vec::new() };
        let vector_hits = match query_vector.map(|v| state.vector.search(&v, n)) {
            Some(Ok(hits)) => hits,
            Some(Err(e)) => {
                warnings.push(format!("vector search failed: {e}"));
                Vec::new()
            }
            None => Vec::new(),
        };
        let degraded = !warnings.is_empty();
        tracing::Span::current().record("degraded", degraded);
        for w in &warnings { warn!(warning = %w, "search degraded"); }

        let items = fuse(&lexical_hits, &vector_hits, k, &self.config.fusion)
            .into_iter()
            .filter_map(|item| hydrate(&state, item))
            .collect();
        let response = SearchResponse { items, degraded, warnings, version: state.version };
        if cacheable && !degraded {
            self.fused_cache.insert(QueryKey::new(query, SearchMode::Hybrid, k, response.version), response.clone());
        }
        Ok(response)
    }

    /// BM25 hits only.
    pub fn lexical_search(&self, query: &str, k: usize) -> Vec<SearchHit> {
        let state = self.state.read();
        let key = QueryKey::new(query, SearchMode::Lexical, k, state.version);
        if let Some(hits) = self.hits_cache.get(&key) { return hits; }
        let hits = state.lexical.search(query, k);
        self.hits_cache.insert(key, hits.clone());
        hits
    }

    /// Vector hits only.
    pub fn vector_search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let version = self.state.read().version;
        if let Some(hits) = self.hits_cache.get(&QueryKey::new(query, SearchMode::Vector, k, version)) { return Ok(hits); }
        let v = self.embedder.embed(query)?;
        let state = self.state.read();
        let hits = state.vector.search(&v, k)?;
        self.hits_cache.insert(QueryKey::new(query, SearchMode::Vector, k, state.version), hits.clone());
        Ok(hits)
    }

    pub fn get_chunk(&self, chunk_id: &str) -> Result<Chunk> { self.state.read().store.get(chunk_id).cloned() }

    pub fn document(&self, document_id: &str) -> Result<Document> { self.state.read().store.document(document_id).cloned() }

    pub fn chunks_of(&self, document_id: &str) -> Vec<Chunk> {
        self.state.read().store.chunks_of(document_id).into_iter().cloned().collect()
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state.read();
        EngineStats {
            documents: state.store.document_count(),
            chunks: state.store.chunk_count(),
            lexical_terms: state.lexical.term_count(),
            vectors: state.vector.len(),
            vector_partitioned: state.vector.is_partitioned(),
            version: state.version,
            lexical_available: self.lexical_available.load(Ordering::Acquire),
            vector_available: self.vector_available.load(Ordering::Acquire),
        }
    }

    /// Mark one index (un)available for search.
    pub fn set_index_available(&self, index: SourceKind, available: bool) {
        let flag = match index {
            SourceKind::Text => &self.lexical_available,
            SourceKind::Vector => &self.vector_available,
        };
        flag.store(available, Ordering::Release);
        if available { info!(index = %index, "index available"); } else { warn!(index = %index, "index marked unavailable"); }
    }

    /// `IndexCorruption` when either index disagrees with the Chunk Store.
    pub fn verify(&self) -> Result<()> { self.state.read().verify_consistency() }

    /// Rebuild both indices (and the dedup filter) from the Chunk Store.
    pub fn rebuild_indices(&self) -> Result<()> {
        let mut log = self.commit.lock();
        self.state.write().rebuild_indices(&self.config)?;
        self.refresh_partitions();
        if log.root.is_some() {
            self.checkpoint_locked(&mut log)?;
        }
        Ok(())
    }

    /// Recall of the vector index's current mode against exact search, using
    /// up to `sample` stored embeddings as queries.
    pub fn measure_recall(&self, sample: usize, k: usize) -> Result<f64> {
        let state = self.state.read();
        let queries: Vec<Vec<f32>> = state.store.chunks().take(sample).map(|c| c.embedding.clone()).collect();
        state.vector.measure_recall(&queries, k)
    }

    /// Write a checkpoint and truncate the WAL. `None` for in-memory engines.
    pub fn checkpoint(&self) -> Result<Option<Manifest>> {
        let mut log = self.commit.lock();
        self.checkpoint_locked(&mut log)
    }

    /// Consistent point-in-time copy of all three stores under
    /// `dir/checkpoint`; `dir` can later be opened as a data directory.
    #[instrument(skip(self))]
    pub fn backup(&self, dir: &Path) -> Result<Manifest> {
        let log = self.commit.lock();
        if let Some(root) = log.root.as_deref() {
            fs::create_dir_all(dir)?;
            if fs::canonicalize(root)? == fs::canonicalize(dir)? {
                return Err(Error::InvalidInput(format!("backup target {} is the live data directory", dir.display())));
            }
        }
        let state = self.state.read();
        persist::write_checkpoint(dir, &state, log.last_seq())
    }

    fn checkpoint_locked(&self, log: &mut CommitLog) -> Result<Option<Manifest>> {
        let (Some(root), Some(wal)) = (log.root.as_ref(), log.wal.as_mut()) else { return Ok(None) };
        let manifest = persist::write_checkpoint(root, &self.state.read(), wal.last_seq())?;
        wal.truncate()?;
        log.since_checkpoint = 0;
        Ok(Some(manifest))
    }

    /// Embed the chunks `revisions` reinstate.
    fn embed_reinstated(&self, revisions: &mut [Revision]) -> Result<()> {
        let texts: Vec<String> = revisions.iter().flat_map(|r| &r.chunks).filter(|c| c.embedding.is_empty()).map(|c| c.text.clone()).collect();
        if texts.is_empty() { return Ok(()); }
        let mut vectors = self.embedder.embed_batch(&texts)?.into_iter();
        for chunk in revisions.iter_mut().flat_map(|r| r.chunks.iter_mut()).filter(|c| c.embedding.is_empty()) {
            if let Some(v) = vectors.next() { chunk.embedding = v; }
        }
        Ok(())
    }

    /// Retrain IVF partitions when due. Training runs on a copy with no state
    /// lock held; the result is swapped in only if the vectors did not change
    /// meanwhile. Callers hold the commit log, so no writer can interleave.
    fn refresh_partitions(&self) {
        let copy = {
            let state = self.state.read();
            if !state.vector.retrain_due() { return; }
            state.vector.training_copy()
        };
        let started = Instant::now();
        let plan = copy.plan_partitions();
        let installed = self.state.write().vector.install_partitions(plan);
        if installed {
            // same version, different candidate lists
            self.fused_cache.clear();
            self.hits_cache.clear();
        }
        debug!(installed, elapsed_ms = elapsed_ms(started), "refreshed ivf partitions");
    }

    fn after_commit(&self, log: &mut CommitLog) {
        log.since_checkpoint += 1;
        let every = self.config.storage.checkpoint_every;
        if log.wal.is_some() && every > 0 && log.since_checkpoint >= every {
            if let Err(e) = self.checkpoint_locked(log) {
                warn!(error = %e, "automatic checkpoint failed, wal retained");
            }
        }
    }
}

/// Load checkpoint and WAL from `root`. A non-empty WAL (or a repair) is
/// folded into a fresh checkpoint so new appends never follow a torn line.
fn recover(root: &Path, config: &EngineConfig, repair: bool) -> Result<(EngineState, Wal)> {
    fs::create_dir_all(root)?;
    let (after_seq, mut state) = match persist::read_checkpoint(root, config, repair)? {
        Some((manifest, state)) => (manifest.wal_seq, state),
        None => (0, EngineState::empty(config)),
    };
    let wal_path = root.join(WAL_FILE);
    let last_seq = persist::replay(&mut state, persist::read_wal(&wal_path)?, after_seq)?;
    if repair {
        if let Err(e) = state.verify_consistency() {
            warn!(error = %e, "rebuilding indices after replay");
            state.rebuild_indices(config)?;
        }
    }
    state.vector.retrain_if_due();
    let mut wal = Wal::open(&wal_path, last_seq)?;
    if repair || fs::metadata(&wal_path)?.len() > 0 {
        persist::write_checkpoint(root, &state, last_seq)?;
        wal.truncate()?;
    }
    info!(root = %root.display(), last_seq, documents = state.store.document_count(), "recovered engine state");
    Ok((state, wal))
}

fn hydrate(state: &EngineState, result: QueryResultItem) -> Option<RankedChunk> {
    let chunk = match state.store.get(&result.chunk_id) {
        Ok(c) => c,
        Err(e) => {
            warn!(chunk_id = %result.chunk_id, error = %e, "search hit missing from chunk store");
            return None;
        }
    };
    let (source_path, title) = state
        .store
        .document(&chunk.document_id)
        .map_or_else(|_| (String::new(), String::new()), |d| (d.source_path.clone(), d.title.clone()));
    Some(RankedChunk {
        document_id: chunk.document_id.clone(),
        source_path,
        title,
        sequence: chunk.sequence,
        section: chunk.section,
        page_number: chunk.page_number,
        text: chunk.text.clone(),
        result,
    })
}

fn list_text_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| p.extension().and_then(|s| s.to_str()).is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext)))
        .collect();
    files.sort();
    files
}

fn progress_bar(len: usize) -> ProgressBar {
    let pb = ProgressBar::new(u64::try_from(len).unwrap_or(u64::MAX));
    let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({percent}%) {msg}")
        .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("#>-"));
    pb.set_style(style);
    pb
}

fn elapsed_ms(started: Instant) -> u64 { u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX) }
