//! Hybrid retrieval over a local corpus: BM25 and vector search fused into
//! one ranking, fed by an ingestion pipeline that chunks, deduplicates and
//! embeds documents and commits each one atomically.

pub mod cache;
pub mod concurrency;
pub mod engine;
pub mod eval;
pub mod fusion;
pub mod persist;
pub mod pipeline;
pub mod state;

pub use cache::{QueryCache, QueryKey, SearchMode};
pub use concurrency::CancellationToken;
pub use engine::{DirectoryReport, EngineStats, HybridSearchEngine, RankedChunk, SearchResponse};
pub use eval::{evaluate, mean_reciprocal_rank, ndcg_at_k, precision_at_k, recall_at_k, EvalDataset, EvalQuery, EvalReport, RelevanceKey};
pub use fusion::fuse;
pub use persist::Manifest;
pub use pipeline::{DuplicateRecord, IngestOptions, IngestOutcome, IngestReport, SkipReason};
