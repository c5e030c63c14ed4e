//! Sentence-aware splitting of document text into overlapping chunks.
//!
//! Sentences are never split. A sentence larger than `chunk_size` becomes a
//! chunk of its own, so every part of the input lands in some chunk.

use std::sync::Arc;

use crate::tokenize::{CharacterCounter, HeuristicTokenCounter, TokenCounter};
use crate::types::{Chunk, ChunkParams, ChunkUnit, Meta};

#[derive(Clone)]
pub struct Chunker {
    params: ChunkParams,
    counter: Arc<dyn TokenCounter>,
}

impl Chunker {
    /// Measures with the built-in counter for `params.unit`.
    pub fn new(params: ChunkParams) -> Self {
        let counter: Arc<dyn TokenCounter> = match params.unit {
            ChunkUnit::Tokens => Arc::new(HeuristicTokenCounter),
            ChunkUnit::Characters => Arc::new(CharacterCounter),
        };
        Self::with_counter(params, counter)
    }

    pub fn with_counter(params: ChunkParams, counter: Arc<dyn TokenCounter>) -> Self {
        Self { params, counter }
    }

    pub fn params(&self) -> ChunkParams {
        self.params
    }

    /// Same counter, different sizes.
    pub fn with_params(&self, params: ChunkParams) -> Self {
        Self { params, counter: Arc::clone(&self.counter) }
    }

    /// Splits `text` into chunk texts in document order.
    pub fn split(&self, text: &str) -> Vec<String> {
        let ChunkParams { chunk_size, overlap, .. } = self.params;
        let mut chunks = Vec::new();
        let mut buffer = String::new();

        for sentence in split_sentences(text) {
            if buffer.is_empty() {
                buffer.push_str(sentence);
                continue;
            }
            let candidate = format!("{buffer} {sentence}");
            if self.counter.count(&candidate) <= chunk_size {
                buffer = candidate;
                continue;
            }

            let sealed = buffer.trim().to_string();
            let tail = self.counter.tail(&sealed, overlap).trim();
            buffer = match tail {
                "" => sentence.to_string(),
                tail => format!("{tail} {sentence}"),
            };
            chunks.push(sealed);
        }

        let rest = buffer.trim();
        if !rest.is_empty() {
            chunks.push(rest.to_string());
        }
        chunks
    }

    /// Chunks one document, copying `metadata` onto every chunk and stamping
    /// `total_chunks` once the count is known.
    pub fn chunk_document(&self, document_id: &str, text: &str, metadata: &Meta) -> Vec<Chunk> {
        let texts = self.split(text);
        let total = texts.len();
        texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                document_id: document_id.to_string(),
                index,
                text,
                total_chunks: total,
                metadata: metadata.clone(),
            })
            .collect()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkParams::default())
    }
}

/// Convenience wrapper using the built-in counter for `params.unit`.
pub fn chunk_text(document_id: &str, text: &str, params: ChunkParams) -> Vec<Chunk> {
    Chunker::new(params).chunk_document(document_id, text, &Meta::new())
}

/// Sentences end at a run of whitespace that follows `.`, `!` or `?`.
/// Returned sentences are trimmed and never empty.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c.is_whitespace() && matches!(prev, Some('.' | '!' | '?')) {
            push_trimmed(&mut sentences, &text[start..i]);
            let mut end = i + c.len_utf8();
            while let Some(&(j, d)) = chars.peek() {
                if !d.is_whitespace() {
                    break;
                }
                end = j + d.len_utf8();
                chars.next();
            }
            start = end;
            prev = None;
        } else {
            prev = Some(c);
        }
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, s: &'a str) {
    let s = s.trim();
    if !s.is_empty() {
        out.push(s);
    }
}
