use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use proptest::prelude::*;

use ragdb_core::config::EngineConfig;
use ragdb_core::error::{Error, IngestStage, Result};
use ragdb_core::traits::Embedder;
use ragdb_core::types::{chunk_id, DocumentInput, SearchHit, SourceKind};
use ragdb_embed::HashEmbedder;
use ragdb_hybrid::{evaluate, fuse, EvalDataset, EvalQuery, HybridSearchEngine, IngestOptions, IngestOutcome, RelevanceKey, SkipReason};
use ragdb_vector::MIN_TRAIN_SIZE;

const DIM: usize = 64;

fn config() -> EngineConfig {
    let mut cfg = EngineConfig::with_dimension(DIM);
    cfg.embedding.initial_backoff_ms = 1;
    cfg.embedding.max_backoff_ms = 2;
    cfg
}

fn small_chunks(max_tokens: usize) -> EngineConfig {
    let mut cfg = config();
    cfg.chunking.max_tokens = max_tokens;
    cfg.chunking.overlap_tokens = 0;
    cfg
}

fn engine(cfg: EngineConfig) -> HybridSearchEngine {
    let _ = ragdb_core::logging::init_tracing("ragdb=debug");
    HybridSearchEngine::new(cfg, Arc::new(HashEmbedder::new(DIM))).expect("engine")
}

fn doc(id: &str, text: &str) -> DocumentInput { DocumentInput::with_sections(id, [text]) }

const THREE_SENTENCES: &str = "Alpha beta gamma delta. Epsilon zeta eta theta. Iota kappa lambda mu.";

#[test]
fn identical_sections_store_one_chunk_and_mark_one_duplicate() {
    let mut cfg = config();
    cfg.dedup.threshold = 1.0;
    let engine = engine(cfg);
    let report = engine.ingest(&DocumentInput::with_sections("A", ["The cat sat on the mat.", "The cat sat on the mat."])).expect("ingest");

    assert_eq!(report.stored, vec![chunk_id("A", 0)]);
    assert_eq!(report.duplicates.len(), 1);
    assert_eq!(report.duplicates[0].position, 1);
    assert_eq!(report.duplicates[0].reason, SkipReason::ExactDuplicate { of: chunk_id("A", 0) });
    assert_eq!(engine.stats().chunks, 1);
    assert_eq!(engine.document("A").expect("document").chunk_count, 1);
}

#[test]
fn cat_mat_ranks_the_chunk_with_both_terms_first() {
    let engine = engine(config());
    engine.ingest(&doc("c1", "The cat slept all day long.")).expect("c1");
    engine.ingest(&doc("c2", "The cat sat on the mat.")).expect("c2");
    engine.ingest(&doc("c3", "A dog lay down on the mat.")).expect("c3");

    let hits = engine.lexical_search("cat mat", 3);
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].id, chunk_id("c2", 0));

    let response = engine.search("cat mat", 3).expect("search");
    assert!(!response.degraded);
    assert_eq!(response.items.len(), 3);
    let top = response.items.iter().find(|i| i.result.chunk_id == chunk_id("c2", 0)).expect("c2 in results");
    assert_eq!(top.document_id, "c2");
    assert_eq!(top.text, "The cat sat on the mat.");
    assert!(top.result.lexical_score.is_some() && top.result.vector_score.is_some());
}

#[test]
fn reingesting_identical_content_is_idempotent() {
    let engine = engine(small_chunks(8));
    let first = engine.ingest(&doc("d", THREE_SENTENCES)).expect("first");
    assert_eq!(first.stored.len(), 2);
    let chunks_before = engine.chunks_of("d");
    let lexical_before = engine.lexical_search("gamma kappa", 10);
    let vector_before = engine.vector_search("gamma kappa", 10).expect("vector");

    let again = engine.ingest(&doc("d", THREE_SENTENCES)).expect("again");
    assert_eq!(again.outcome, IngestOutcome::Unchanged);
    assert_eq!(again.stored, first.stored);

    let forced = engine.ingest_with(&doc("d", THREE_SENTENCES), &IngestOptions::forced()).expect("forced");
    assert_eq!(forced.outcome, IngestOutcome::Stored);
    assert_eq!(forced.stored, first.stored);
    assert!(forced.retracted.is_empty());
    assert!(forced.duplicates.is_empty());

    let chunks_after = engine.chunks_of("d");
    assert_eq!(chunks_after.len(), chunks_before.len());
    for (a, b) in chunks_before.iter().zip(&chunks_after) {
        assert_eq!((&a.id, &a.text, &a.embedding, &a.fingerprint), (&b.id, &b.text, &b.embedding, &b.fingerprint));
    }
    assert_eq!(engine.lexical_search("gamma kappa", 10), lexical_before);
    assert_eq!(engine.vector_search("gamma kappa", 10).expect("vector"), vector_before);
    assert_eq!(engine.stats().chunks, 2);
}

#[test]
fn second_identical_document_is_all_duplicates() {
    let engine = engine(small_chunks(8));
    let first = engine.ingest(&doc("first", THREE_SENTENCES)).expect("first");
    let second = engine.ingest(&doc("second", THREE_SENTENCES)).expect("second");

    assert!(second.stored.is_empty());
    assert_eq!(second.duplicates.len(), first.stored.len());
    for (dup, original) in second.duplicates.iter().zip(&first.stored) {
        assert_eq!(dup.reason, SkipReason::ExactDuplicate { of: original.clone() });
    }
    assert_eq!(engine.stats().chunks, first.stored.len());
    assert_eq!(engine.document("second").expect("second document").chunk_count, 0);
}

#[test]
fn cross_document_dedup_can_be_disabled() {
    let mut cfg = small_chunks(8);
    cfg.dedup.cross_document = false;
    let engine = engine(cfg);
    engine.ingest(&doc("first", THREE_SENTENCES)).expect("first");
    let second = engine.ingest(&doc("second", THREE_SENTENCES)).expect("second");
    assert_eq!(second.stored.len(), 2);
    assert_eq!(engine.stats().chunks, 4);
}

#[test]
fn removed_chunks_are_never_returned() {
    let engine = engine(small_chunks(4));
    let v1 = engine.ingest(&doc("r", THREE_SENTENCES)).expect("v1");
    assert_eq!(v1.stored.len(), 3);
    engine.ingest(&doc("keep", "Harbors shelter ships.")).expect("keep");

    let v2 = engine.ingest(&doc("r", "Alpha beta gamma delta.")).expect("v2");
    assert_eq!(v2.stored, vec![chunk_id("r", 0)]);
    assert_eq!(v2.retracted, vec![chunk_id("r", 1), chunk_id("r", 2)]);

    let live: BTreeSet<String> = [chunk_id("r", 0), chunk_id("keep", 0)].into_iter().collect();
    for query in ["epsilon zeta", "iota kappa lambda", "alpha harbors"] {
        let response = engine.search(query, 10).expect("search");
        assert!(response.chunk_ids().iter().all(|id| live.contains(*id)), "{query}: {:?}", response.chunk_ids());
        assert!(engine.vector_search(query, 10).expect("vector").iter().all(|h| live.contains(&h.id)));
    }

    let removed = engine.delete_document("r").expect("delete");
    assert_eq!(removed, vec![chunk_id("r", 0)]);
    assert!(engine.search("alpha beta", 10).expect("search").chunk_ids().iter().all(|id| *id == chunk_id("keep", 0)));
    assert!(matches!(engine.delete_document("r"), Err(Error::NotFound(_))));
    assert!(matches!(engine.get_chunk(&chunk_id("r", 0)), Err(Error::NotFound(_))));
    engine.verify().expect("indices consistent");
}

#[test]
fn search_is_deterministic() {
    let engine = engine(small_chunks(6));
    engine.ingest(&doc("a", "Soil health depends on compost. Compost needs nitrogen and carbon.")).expect("a");
    engine.ingest(&doc("b", "Water the garden early. Carbon rich mulch keeps soil moist.")).expect("b");
    let first = engine.search("soil carbon compost", 5).expect("first");
    for _ in 0..5 {
        assert_eq!(engine.search("soil carbon compost", 5).expect("again").items, first.items);
    }
    let ranks: Vec<usize> = first.items.iter().map(|i| i.result.rank).collect();
    assert_eq!(ranks, (1..=first.items.len()).collect::<Vec<_>>());
}

struct ShortVectors(HashEmbedder);

impl Embedder for ShortVectors {
    fn dim(&self) -> usize { self.0.dim() }
    fn model_id(&self) -> &str { "short" }
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = self.0.embed(text)?;
        v.pop();
        Ok(v)
    }
}

#[test]
fn wrong_length_embedding_fails_ingestion_and_changes_nothing() {
    let engine = HybridSearchEngine::new(config(), Arc::new(ShortVectors(HashEmbedder::new(DIM)))).expect("engine");
    let before = engine.stats();
    let err = engine.ingest(&doc("x", "The cat sat on the mat.")).expect_err("must fail");
    assert_eq!(err.stage(), Some(IngestStage::Embed));
    assert!(matches!(&err, Error::Ingestion { source, .. } if matches!(**source, Error::DimensionMismatch { expected: DIM, actual } if actual == DIM - 1)));
    assert_eq!(engine.stats(), before);
    assert!(matches!(engine.document("x"), Err(Error::NotFound(_))));
}

#[test]
fn embedder_dimension_is_checked_at_startup() {
    let err = HybridSearchEngine::new(config(), Arc::new(HashEmbedder::new(DIM / 2))).err().expect("mismatch");
    assert!(matches!(err, Error::DimensionMismatch { expected: DIM, .. }));

    let mut bad = config();
    bad.chunking.overlap_tokens = bad.chunking.max_tokens;
    let err = HybridSearchEngine::new(bad, Arc::new(HashEmbedder::new(DIM))).err().expect("invalid");
    assert!(matches!(err, Error::InvalidConfig(_)));
}

struct Switchable {
    inner: HashEmbedder,
    failing: AtomicBool,
    retryable: bool,
}

impl Embedder for Switchable {
    fn dim(&self) -> usize { self.inner.dim() }
    fn model_id(&self) -> &str { "switchable" }
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::embedding("model offline", self.retryable));
        }
        self.inner.embed(text)
    }
}

#[test]
fn failed_embedding_keeps_the_previous_version() {
    let embedder = Arc::new(Switchable { inner: HashEmbedder::new(DIM), failing: AtomicBool::new(false), retryable: true });
    let engine = HybridSearchEngine::new(config(), embedder.clone()).expect("engine");
    engine.ingest(&doc("v", "The first version talks about beehives.")).expect("v1");
    let checksum = engine.document("v").expect("doc").checksum;

    embedder.failing.store(true, Ordering::SeqCst);
    let err = engine.ingest(&doc("v", "The second version talks about orchards.")).expect_err("embedding fails");
    assert!(err.is_retryable());
    assert_eq!(err.stage(), Some(IngestStage::Embed));
    assert!(err.to_string().contains("'v'"));

    assert_eq!(engine.document("v").expect("doc").checksum, checksum);
    assert_eq!(engine.lexical_search("beehives", 5)[0].id, chunk_id("v", 0));
    assert!(engine.lexical_search("orchards", 5).is_empty());
}

#[test]
fn search_degrades_to_the_remaining_index() {
    let embedder = Arc::new(Switchable { inner: HashEmbedder::new(DIM), failing: AtomicBool::new(false), retryable: false });
    let engine = HybridSearchEngine::new(config(), embedder.clone()).expect("engine");
    engine.ingest(&doc("g", "Garlic is planted in autumn before the frost.")).expect("g");

    embedder.failing.store(true, Ordering::SeqCst);
    let response = engine.search("garlic frost", 5).expect("lexical only");
    assert!(response.degraded);
    assert_eq!(response.chunk_ids(), vec![chunk_id("g", 0).as_str()]);
    assert!(response.items[0].result.vector_score.is_none());
    assert!(response.warnings[0].contains("embedding"));
    embedder.failing.store(false, Ordering::SeqCst);

    engine.set_index_available(SourceKind::Text, false);
    let response = engine.search("garlic frost", 5).expect("vector only");
    assert!(response.degraded);
    assert!(response.items.iter().all(|i| i.result.lexical_score.is_none()));
    assert!(!response.items.is_empty());

    engine.set_index_available(SourceKind::Vector, false);
    let response = engine.search("garlic frost", 5).expect("nothing available");
    assert!(response.degraded && response.items.is_empty());
    assert_eq!(response.warnings.len(), 2);

    engine.set_index_available(SourceKind::Text, true);
    engine.set_index_available(SourceKind::Vector, true);
    assert!(!engine.search("garlic frost", 5).expect("healthy").degraded);
}

#[test]
fn directory_ingestion_counts_files() {
    let tmp = tempfile::tempdir().expect("tmp");
    std::fs::write(tmp.path().join("a.txt"), "Rainwater barrels need screens against mosquitoes.").expect("a");
    std::fs::write(tmp.path().join("b.md"), "# Seeds\n\nSave seeds from open pollinated tomatoes.").expect("b");
    std::fs::write(tmp.path().join("c.bin"), [0u8, 159, 146, 150]).expect("c");
    std::fs::create_dir(tmp.path().join("nested")).expect("dir");
    std::fs::write(tmp.path().join("nested").join("d.txt"), "Rainwater barrels need screens against mosquitoes.").expect("d");
    std::fs::create_dir_all(tmp.path().join("nested").join("deeper")).expect("deeper");
    std::fs::write(tmp.path().join("nested").join("deeper").join("e.md"), "Chickens roost early in winter.").expect("e");
    std::fs::write(tmp.path().join("latin1.txt"), [b'c', b'a', b'f', 0xe9, b'\n']).expect("latin1");

    let engine = engine(config());
    let report = engine.ingest_directory(tmp.path(), false).expect("walk");
    assert_eq!(report.files, 5);
    assert_eq!(report.stored, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.failed, 1);
    assert!(report.errors[0].0.ends_with("latin1.txt"));
    assert!(report.errors[0].1.contains("UTF-8"));
    assert_eq!(engine.stats().documents, 4);
    assert!(engine.search("chickens roost", 1).expect("nested").items[0].source_path.ends_with("e.md"));

    let again = engine.ingest_directory(tmp.path(), false).expect("walk again");
    assert_eq!(again.unchanged, 4);
    assert_eq!(again.failed, 1);
    assert!(matches!(engine.ingest_directory(&tmp.path().join("missing"), false), Err(Error::NotFound(_))));

    let hit = &engine.search("tomatoes seeds", 1).expect("search").items[0];
    assert!(hit.source_path.ends_with("b.md"));
    assert_eq!(hit.title, "b.md");
}

fn ivf_engine(nprobe: usize) -> HybridSearchEngine {
    let mut cfg = config();
    cfg.vector.mode = ragdb_core::config::VectorMode::Ivf;
    cfg.vector.ivf_nlist = 8;
    cfg.vector.ivf_nprobe = nprobe;
    cfg.dedup.cross_document = false;
    let engine = engine(cfg);
    for i in 0..(MIN_TRAIN_SIZE + 44) {
        engine.ingest(&doc(&format!("n{i:03}"), &format!("Note {i} on plot {} row {} item{i}.", i % 7, i % 11))).expect("ingest");
    }
    engine
}

#[test]
fn ivf_mode_partitions_once_large_enough() {
    let engine = ivf_engine(8);
    let stats = engine.stats();
    assert_eq!(stats.chunks, MIN_TRAIN_SIZE + 44);
    assert!(stats.vector_partitioned);
    // searching every list finds everything exact search does
    assert!((engine.measure_recall(40, 5).expect("recall") - 1.0).abs() < 1e-12);
}

#[test]
fn ivf_searching_one_list_still_finds_the_query_itself() {
    let engine = ivf_engine(1);
    assert!(engine.stats().vector_partitioned);
    let recall = engine.measure_recall(40, 5).expect("recall");
    assert!((0.2..=1.0).contains(&recall), "recall {recall}");
}

#[test]
fn evaluation_averages_over_labelled_queries() {
    let engine = engine(config());
    engine.ingest(&doc("bees", "Smoke calms bees before opening the hive.")).expect("bees");
    engine.ingest(&doc("goats", "Goats browse brush rather than grass.")).expect("goats");
    engine.ingest(&doc("soil", "Compost adds carbon to garden soil.")).expect("soil");
    let dataset = EvalDataset {
        key: RelevanceKey::DocumentId,
        queries: vec![
            EvalQuery { question: "smoke bees hive".into(), relevant_docs: vec!["bees".into()] },
            EvalQuery { question: "goats browse brush".into(), relevant_docs: vec!["goats".into()] },
        ],
    };
    let report = evaluate(&engine, &dataset, 3).expect("evaluate");
    assert_eq!((report.queries, report.k), (2, 3));
    assert!((report.mrr - 1.0).abs() < 1e-9);
    assert!((report.recall_at_k - 1.0).abs() < 1e-9);
    assert!((report.ndcg_at_k - 1.0).abs() < 1e-9);
    assert!(report.precision_at_k > 0.0 && report.precision_at_k <= 1.0);

    let unlabelled = EvalDataset { key: RelevanceKey::Title, queries: Vec::new() };
    assert!(evaluate(&engine, &unlabelled, 3).expect("empty").mrr.abs() < 1e-12);
}

struct Counting {
    inner: HashEmbedder,
    calls: AtomicUsize,
}

impl Embedder for Counting {
    fn dim(&self) -> usize { self.inner.dim() }
    fn model_id(&self) -> &str { "counting" }
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text)
    }
}

fn counting_engine(cfg: EngineConfig) -> (HybridSearchEngine, Arc<Counting>) {
    let embedder = Arc::new(Counting { inner: HashEmbedder::new(DIM), calls: AtomicUsize::new(0) });
    (HybridSearchEngine::new(cfg, embedder.clone()).expect("engine"), embedder)
}

#[test]
fn repeated_queries_are_served_from_cache_until_the_next_commit() {
    let (engine, embedder) = counting_engine(config());
    engine.ingest(&doc("a", "Sourdough starter needs daily feeding.")).expect("a");
    let calls = || embedder.calls.load(Ordering::SeqCst);

    let before = calls();
    let first = engine.search("sourdough feeding", 5).expect("first");
    let second = engine.search("sourdough feeding", 5).expect("second");
    assert_eq!(calls(), before + 1);
    assert_eq!(second, first);
    engine.vector_search("sourdough feeding", 5).expect("vector");
    engine.vector_search("sourdough feeding", 5).expect("vector again");
    assert_eq!(calls(), before + 2);

    engine.ingest(&doc("b", "Rye flour makes a sour starter.")).expect("b");
    let before = calls();
    let third = engine.search("sourdough feeding", 5).expect("third");
    assert_eq!(calls(), before + 1);
    assert!(third.version > first.version);
}

#[test]
fn zero_capacity_turns_the_cache_off() {
    let mut cfg = config();
    cfg.cache.capacity = 0;
    let (engine, embedder) = counting_engine(cfg);
    engine.ingest(&doc("a", "Sourdough starter needs daily feeding.")).expect("a");
    let before = embedder.calls.load(Ordering::SeqCst);
    engine.search("sourdough feeding", 5).expect("first");
    engine.search("sourdough feeding", 5).expect("second");
    assert_eq!(embedder.calls.load(Ordering::SeqCst), before + 2);
}

#[test]
fn degraded_results_are_not_cached() {
    let (engine, embedder) = counting_engine(config());
    engine.ingest(&doc("a", "Sourdough starter needs daily feeding.")).expect("a");
    engine.set_index_available(SourceKind::Vector, false);
    assert!(engine.search("sourdough feeding", 5).expect("degraded").degraded);
    engine.set_index_available(SourceKind::Vector, true);
    let before = embedder.calls.load(Ordering::SeqCst);
    assert!(!engine.search("sourdough feeding", 5).expect("healthy").degraded);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), before + 1);
}

const GOATS: &str = "Goats browse brush rather than grass.";

#[test]
fn deleting_the_holder_of_shared_text_keeps_it_searchable() {
    let engine = engine(small_chunks(6));
    engine.ingest(&doc("A", &format!("{GOATS} Something else entirely here."))).expect("A");
    let b = engine.ingest(&doc("B", GOATS)).expect("B");
    assert!(b.stored.is_empty());
    assert_eq!(b.duplicates.len(), 1);

    engine.delete_document("A").expect("delete");
    let response = engine.search("goats browse brush", 3).expect("search");
    assert_eq!(response.items[0].result.chunk_id, chunk_id("B", 0));
    assert_eq!(response.items[0].text, GOATS);
    assert_eq!(engine.document("B").expect("B").chunk_count, 1);
    assert!(engine.document("B").expect("B").superseded.is_empty());
    assert!(engine.ingest(&doc("B", GOATS)).expect("again").is_unchanged());
    engine.verify().expect("consistent");
}

#[test]
fn replacing_the_holder_of_shared_text_keeps_it_searchable() {
    let engine = engine(small_chunks(6));
    engine.ingest(&doc("A", &format!("{GOATS} Something else entirely here."))).expect("A");
    engine.ingest(&doc("B", GOATS)).expect("B");
    engine.ingest(&doc("C", GOATS)).expect("C");

    engine.ingest(&doc("A", "Sheep graze grass down to the roots.")).expect("replace A");
    let response = engine.search("goats browse brush", 5).expect("search");
    let goats: Vec<&str> = response.items.iter().filter(|i| i.text == GOATS).map(|i| i.document_id.as_str()).collect();
    assert_eq!(goats, vec!["B"]);
    let c = engine.document("C").expect("C");
    assert_eq!(c.chunk_count, 0);
    assert_eq!(c.superseded[0].by, chunk_id("B", 0));
    engine.verify().expect("consistent");

    engine.delete_document("B").expect("delete B");
    let response = engine.search("goats browse brush", 5).expect("search");
    assert_eq!(response.items[0].result.chunk_id, chunk_id("C", 0));
    engine.verify().expect("consistent");
}

fn hit_list(ids: &[u8], source: SourceKind) -> Vec<SearchHit> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            #[allow(clippy::cast_precision_loss)]
            let score = 100.0 - i as f32;
            SearchHit { id: format!("c{id}"), score, source }
        })
        .collect()
}

proptest! {
    #[test]
    fn fusion_is_deterministic_and_tie_broken_by_id(
        lexical in proptest::collection::vec(0u8..30, 0..20),
        vector in proptest::collection::vec(0u8..30, 0..20),
        k in 1usize..25,
    ) {
        let cfg = EngineConfig::default().fusion;
        let l = hit_list(&lexical, SourceKind::Text);
        let v = hit_list(&vector, SourceKind::Vector);
        let first = fuse(&l, &v, k, &cfg);
        prop_assert_eq!(&first, &fuse(&l, &v, k, &cfg));
        for pair in first.windows(2) {
            prop_assert!(pair[0].fused_score > pair[1].fused_score || (pair[0].fused_score == pair[1].fused_score && pair[0].chunk_id < pair[1].chunk_id));
        }
        let ids: BTreeSet<&str> = first.iter().map(|i| i.chunk_id.as_str()).collect();
        prop_assert_eq!(ids.len(), first.len());
    }
}
