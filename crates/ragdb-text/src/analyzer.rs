//! ragdb-text
//!
//! Language-aware analysis chains built from Tantivy tokenizers. Tantivy only
//! tokenizes here; postings and BM25 scoring live in [`crate::index`].
use std::collections::HashMap;

use tantivy::tokenizer::{AsciiFoldingFilter, Language as Stemming, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter, TextAnalyzer};

use ragdb_core::types::Language;

const ENGLISH_STOP_WORDS: &[&str] = &[
	"a","an","and","are","as","at","be","by","for","from","has","he","in","is","it","its","of","on","that","the","to","was","will","with","or","but","not","this","these","they","them","their","there","then","than","so","if","when","where","why","how","what","which","who","whom","whose","can","could","should","would","may","might","must","shall","do","does","did","have","had","having",
];

fn stemming(language: Language) -> Option<Stemming> {
	match language {
		Language::English => Some(Stemming::English),
		Language::Spanish => Some(Stemming::Spanish),
		Language::French => Some(Stemming::French),
		Language::German => Some(Stemming::German),
		Language::Italian => Some(Stemming::Italian),
		Language::Portuguese => Some(Stemming::Portuguese),
		Language::Dutch => Some(Stemming::Dutch),
		Language::Unknown => None,
	}
}

/// Lowercase, drop overlong tokens, remove stop words, stem, fold accents.
/// [`Language::Unknown`] text is only lowercased and folded.
pub fn build_analyzer(language: Language) -> TextAnalyzer {
	let base = || TextAnalyzer::builder(SimpleTokenizer::default()).filter(RemoveLongFilter::limit(40)).filter(LowerCaser);
	let Some(stem) = stemming(language) else {
		return base().filter(AsciiFoldingFilter).build();
	};
	let stop_words = if language == Language::English {
		StopWordFilter::remove(ENGLISH_STOP_WORDS.iter().map(|s| (*s).to_string()))
	} else {
		StopWordFilter::new(stem).unwrap_or_else(|| StopWordFilter::remove(Vec::<String>::new()))
	};
	base().filter(stop_words).filter(Stemmer::new(stem)).filter(AsciiFoldingFilter).build()
}

/// One analyzer per language, built once and cloned per call since token
/// streams need exclusive access.
#[derive(Clone)]
pub struct Analyzers {
	by_language: HashMap<Language, TextAnalyzer>,
}

impl Default for Analyzers {
	fn default() -> Self {
		Self { by_language: Language::ALL.iter().map(|l| (*l, build_analyzer(*l))).collect() }
	}
}

impl std::fmt::Debug for Analyzers {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Analyzers").field("languages", &self.by_language.len()).finish()
	}
}

impl Analyzers {
	pub fn tokenize(&self, language: Language, text: &str) -> Vec<String> {
		let Some(analyzer) = self.by_language.get(&language) else { return Vec::new() };
		let mut analyzer = analyzer.clone();
		let mut stream = analyzer.token_stream(text);
		let mut out = Vec::new();
		while stream.advance() { out.push(stream.token().text.clone()); }
		out
	}
}
