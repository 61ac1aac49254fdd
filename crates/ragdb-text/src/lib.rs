pub mod analyzer;
pub mod index;

pub use analyzer::Analyzers;
pub use index::{Bm25Params, CorpusStats, LexicalIndex, LexicalSnapshot};
