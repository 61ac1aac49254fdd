//! Sentence-aware chunking with a word-window fallback.
//!
//! Sentences are packed into chunks of at most `max_tokens` words. Adjacent
//! chunks share up to `overlap_tokens` words of trailing whole sentences.
//! A sentence longer than the window is cut into overlapping word windows.

use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;
use crate::types::Section;

/// A chunk before deduplication and embedding. Offsets are in characters
/// relative to the section text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub text: String,
    pub token_count: usize,
    pub section: usize,
    pub page_number: Option<u32>,
    pub start_char: usize,
    pub end_char: usize,
}

/// Byte range of one whitespace-delimited word.
#[derive(Debug, Clone, Copy)]
struct Word {
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Self { Self { config } }

    pub fn config(&self) -> &ChunkingConfig { &self.config }

    /// Chunk every section independently; chunks never span sections.
    pub fn chunk_sections(&self, sections: &[Section]) -> Vec<ChunkDraft> {
        sections
            .iter()
            .enumerate()
            .flat_map(|(i, s)| self.chunk_text(&s.text, i, s.page_number))
            .collect()
    }

    pub fn chunk_text(&self, text: &str, section: usize, page_number: Option<u32>) -> Vec<ChunkDraft> {
        let max = self.config.max_tokens.max(1);
        let overlap = self.config.overlap_tokens.min(max - 1);
        let mut spans: Vec<(usize, usize)> = Vec::new();

        let mut current: Vec<Vec<Word>> = Vec::new();
        let mut current_len = 0usize;
        let mut fresh = false;

        for unit in self.units(text) {
            if unit.len() > max {
                if fresh { spans.push(span_of(&current)); }
                current.clear();
                current_len = 0;
                fresh = false;
                let stride = max - overlap;
                let mut start = 0;
                while start < unit.len() {
                    let end = (start + max).min(unit.len());
                    spans.push((unit[start].start, unit[end - 1].end));
                    if end == unit.len() { break; }
                    start += stride;
                }
                continue;
            }
            if current_len + unit.len() > max {
                if fresh { spans.push(span_of(&current)); }
                let carry = carry_sentences(&current, overlap);
                let carry_len: usize = carry.iter().map(Vec::len).sum();
                if carry_len + unit.len() <= max {
                    current = carry;
                    current_len = carry_len;
                } else {
                    current.clear();
                    current_len = 0;
                }
            }
            current_len += unit.len();
            current.push(unit);
            fresh = true;
        }
        if fresh { spans.push(span_of(&current)); }

        spans
            .into_iter()
            .filter_map(|(start, end)| {
                let chunk = &text[start..end];
                if chunk.chars().count() < self.config.min_chunk_chars { return None; }
                let start_char = text[..start].chars().count();
                Some(ChunkDraft {
                    text: chunk.to_string(),
                    token_count: crate::text::count_tokens(chunk),
                    section,
                    page_number,
                    start_char,
                    end_char: start_char + chunk.chars().count(),
                })
            })
            .collect()
    }

    /// Packing units: one per sentence, or the whole text when sentence
    /// boundaries are ignored.
    fn units(&self, text: &str) -> Vec<Vec<Word>> {
        let units: Vec<Vec<Word>> = if self.config.respect_sentences {
            text.split_sentence_bound_indices().map(|(offset, s)| words(s, offset)).collect()
        } else {
            vec![words(text, 0)]
        };
        units.into_iter().filter(|u| !u.is_empty()).collect()
    }
}

fn words(text: &str, offset: usize) -> Vec<Word> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, ch) in text.char_indices() {
        match (ch.is_whitespace(), start) {
            (true, Some(s)) => { out.push(Word { start: offset + s, end: offset + i }); start = None; }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start { out.push(Word { start: offset + s, end: offset + text.len() }); }
    out
}

fn span_of(sentences: &[Vec<Word>]) -> (usize, usize) {
    let first = sentences.first().and_then(|s| s.first()).map_or(0, |w| w.start);
    let last = sentences.last().and_then(|s| s.last()).map_or(first, |w| w.end);
    (first, last)
}

/// Trailing whole sentences of `current` totalling at most `overlap` words.
fn carry_sentences(current: &[Vec<Word>], overlap: usize) -> Vec<Vec<Word>> {
    let mut taken = 0;
    let mut keep = current.len();
    for sentence in current.iter().rev() {
        if taken + sentence.len() > overlap { break; }
        taken += sentence.len();
        keep -= 1;
    }
    current[keep..].to_vec()
}
