use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use ragdb_core::config::{EngineConfig, SameDocumentPolicy};
use ragdb_core::error::Result;
use ragdb_core::traits::Embedder;
use ragdb_core::types::{chunk_id, DocumentInput};
use ragdb_embed::HashEmbedder;
use ragdb_hybrid::{CancellationToken, HybridSearchEngine, IngestOptions};

const DIM: usize = 32;

/// Blocks embedding of any text starting with "Held" until released, and
/// counts how many such calls are waiting.
struct GateEmbedder {
    inner: HashEmbedder,
    state: Mutex<(bool, usize)>,
    changed: Condvar,
}

impl GateEmbedder {
    fn new() -> Self { Self { inner: HashEmbedder::new(DIM), state: Mutex::new((false, 0)), changed: Condvar::new() } }

    fn release(&self) {
        self.state.lock().expect("lock").0 = true;
        self.changed.notify_all();
    }

    fn wait_for_held(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut state = self.state.lock().expect("lock");
        while state.1 < n {
            assert!(Instant::now() < deadline, "only {} of {n} ingestions reached the embedder", state.1);
            state = self.changed.wait_timeout(state, Duration::from_millis(20)).expect("wait").0;
        }
    }

    fn held(&self) -> usize { self.state.lock().expect("lock").1 }
}

impl Embedder for GateEmbedder {
    fn dim(&self) -> usize { DIM }
    fn model_id(&self) -> &str { "gate" }
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.starts_with("Held") {
            let mut state = self.state.lock().expect("lock");
            state.1 += 1;
            self.changed.notify_all();
            while !state.0 {
                state = self.changed.wait(state).expect("wait");
            }
        }
        self.inner.embed(text)
    }
}

fn engine_with(cfg: EngineConfig) -> (Arc<HybridSearchEngine>, Arc<GateEmbedder>) {
    let gate = Arc::new(GateEmbedder::new());
    let engine = HybridSearchEngine::new(cfg, gate.clone()).expect("engine");
    (Arc::new(engine), gate)
}

fn engine(policy: SameDocumentPolicy) -> (Arc<HybridSearchEngine>, Arc<GateEmbedder>) {
    let mut cfg = EngineConfig::with_dimension(DIM);
    cfg.ingest.same_document_policy = policy;
    engine_with(cfg)
}

fn doc(id: &str, text: &str) -> DocumentInput { DocumentInput::with_sections(id, [text]) }

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn search_mid_ingestion_sees_only_committed_chunks() {
    let (engine, gate) = engine(SameDocumentPolicy::Wait);
    engine.ingest(&doc("base", "Orchard pruning happens in late winter.")).expect("base");

    let a = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || engine.ingest(&doc("A", "Held alpha notes on orchard grafting.")))
    };
    let b = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || engine.ingest(&doc("B", "Held beta notes on orchard irrigation.")))
    };
    let waiter = Arc::clone(&gate);
    tokio::task::spawn_blocking(move || waiter.wait_for_held(2)).await.expect("both in flight");

    let mid = engine.search("orchard grafting irrigation notes", 10).expect("search");
    assert_eq!(mid.chunk_ids(), vec![chunk_id("base", 0).as_str()]);
    assert_eq!(engine.stats().documents, 1);

    gate.release();
    let (a, b) = (a.await.expect("join a").expect("ingest a"), b.await.expect("join b").expect("ingest b"));
    assert_eq!((a.stored.len(), b.stored.len()), (1, 1));

    let after = engine.search("orchard grafting irrigation notes", 10).expect("search");
    let mut ids = after.chunk_ids();
    ids.sort_unstable();
    assert_eq!(ids, vec!["A:0", "B:0", "base:0"]);
    assert!(after.version > mid.version);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replacement_is_all_or_nothing_for_readers() {
    let mut cfg = EngineConfig::with_dimension(DIM);
    cfg.chunking.max_tokens = 4;
    cfg.chunking.overlap_tokens = 0;
    let (engine, gate) = engine_with(cfg);

    engine.ingest(&doc("d", "Old first part here. Old second part here.")).expect("v1");
    assert_eq!(engine.stats().chunks, 2);

    let writer = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || engine.ingest(&doc("d", "Held new first part. Held new second part. Held new third part.")))
    };
    let waiter = Arc::clone(&gate);
    tokio::task::spawn_blocking(move || waiter.wait_for_held(1)).await.expect("in flight");

    for _ in 0..20 {
        let texts: Vec<String> = engine.search("part", 10).expect("search").items.into_iter().map(|i| i.text).collect();
        assert_eq!(texts.len(), 2);
        assert!(texts.iter().all(|t| t.starts_with("Old")));
    }

    gate.release();
    writer.await.expect("join").expect("v2");
    let texts: Vec<String> = engine.search("part", 10).expect("search").items.into_iter().map(|i| i.text).collect();
    assert_eq!(texts.len(), 3);
    assert!(texts.iter().all(|t| t.starts_with("Held")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn wait_policy_queues_same_document() {
    let (engine, gate) = engine(SameDocumentPolicy::Wait);
    let first = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || engine.ingest(&doc("d", "Held first version of the document.")))
    };
    let waiter = Arc::clone(&gate);
    tokio::task::spawn_blocking(move || waiter.wait_for_held(1)).await.expect("first in flight");

    let second = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || engine.ingest(&doc("d", "Second version of the document.")))
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!second.is_finished());
    assert_eq!(engine.stats().documents, 0);

    gate.release();
    first.await.expect("join").expect("first");
    second.await.expect("join").expect("second");
    assert_eq!(engine.get_chunk(&chunk_id("d", 0)).expect("chunk").text, "Second version of the document.");
    assert_eq!(gate.held(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_policy_supersedes_in_flight_ingestion() {
    let (engine, gate) = engine(SameDocumentPolicy::Cancel);
    let first = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || engine.ingest(&doc("d", "Held stale version of the document.")))
    };
    let waiter = Arc::clone(&gate);
    tokio::task::spawn_blocking(move || waiter.wait_for_held(1)).await.expect("first in flight");

    let second = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || engine.ingest(&doc("d", "Fresh version of the document.")))
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    gate.release();

    let err = first.await.expect("join").expect_err("superseded");
    assert!(err.is_cancelled());
    second.await.expect("join").expect("second");
    assert_eq!(engine.get_chunk(&chunk_id("d", 0)).expect("chunk").text, "Fresh version of the document.");
    assert_eq!(engine.stats().chunks, 1);
}

#[test]
fn caller_cancellation_leaves_no_trace() {
    let (engine, _gate) = engine(SameDocumentPolicy::Wait);
    let token = CancellationToken::new();
    token.cancel();
    let err = engine.ingest_with(&doc("c", "Never committed text."), &IngestOptions::default().with_cancel(token)).expect_err("cancelled");
    assert!(err.is_cancelled());
    assert_eq!(engine.stats().documents, 0);
    engine.ingest(&doc("c", "Never committed text.")).expect("later ingestion works");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ingest_many_returns_results_in_input_order() {
    let (engine, _gate) = engine(SameDocumentPolicy::Wait);
    let inputs: Vec<DocumentInput> = (0..8).map(|i| doc(&format!("m{i}"), &format!("Batch document number {i} about item{i}."))).collect();
    let results = engine.ingest_many(inputs).await;
    assert_eq!(results.len(), 8);
    for (i, r) in results.into_iter().enumerate() {
        assert_eq!(r.expect("ingested").document_id, format!("m{i}"));
    }
    assert_eq!(engine.stats().documents, 8);
    engine.verify().expect("consistent");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn text_deferred_to_a_document_deleted_mid_ingestion_is_kept() {
    let mut cfg = EngineConfig::with_dimension(DIM);
    cfg.chunking.max_tokens = 6;
    cfg.chunking.overlap_tokens = 0;
    let (engine, gate) = engine_with(cfg);
    engine.ingest(&doc("A", "Goats browse brush rather than grass. Something else entirely here.")).expect("A");

    let writer = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || {
            engine.ingest(&DocumentInput::with_sections("B", ["Goats browse brush rather than grass.", "Held back until released."]))
        })
    };
    let waiter = Arc::clone(&gate);
    tokio::task::spawn_blocking(move || waiter.wait_for_held(1)).await.expect("in flight");
    engine.delete_document("A").expect("delete A");
    gate.release();

    let report = writer.await.expect("join").expect("ingest B");
    assert_eq!(report.stored, vec![chunk_id("B", 0), chunk_id("B", 1)]);
    assert!(report.duplicates.is_empty());
    assert!(engine.document("B").expect("B").superseded.is_empty());
    let top = &engine.search("goats browse brush", 1).expect("search").items[0];
    assert_eq!(top.result.chunk_id, chunk_id("B", 0));
    engine.verify().expect("consistent");
}
