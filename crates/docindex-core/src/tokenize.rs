//! Size measurement for the chunker.
//!
//! The default token estimate is `characters / 4`. It needs no tokenizer
//! files and is stable across models. `HfTokenCounter` gives exact counts for
//! one specific model when a `tokenizer.json` is configured.

use std::path::Path;

use tokenizers::Tokenizer;
use tracing::warn;

use crate::error::{Error, Result};

const CHARS_PER_TOKEN: usize = 4;

pub trait TokenCounter: Send + Sync {
    /// Size of `text` in this counter's unit.
    fn count(&self, text: &str) -> usize;

    /// Trailing slice of `text` spanning at most `n` units.
    fn tail<'a>(&self, text: &'a str, n: usize) -> &'a str;
}

/// Measures in Unicode scalar values.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharacterCounter;

impl TokenCounter for CharacterCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count()
    }

    fn tail<'a>(&self, text: &'a str, n: usize) -> &'a str {
        char_tail(text, n)
    }
}

/// Approximates one token as four characters.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count(&self, text: &str) -> usize {
        text.chars().count() / CHARS_PER_TOKEN
    }

    fn tail<'a>(&self, text: &'a str, n: usize) -> &'a str {
        char_tail(text, n.saturating_mul(CHARS_PER_TOKEN))
    }
}

/// Exact counts from a Hugging Face `tokenizer.json`.
pub struct HfTokenCounter {
    tokenizer: Tokenizer,
}

impl HfTokenCounter {
    pub fn from_file(path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            Error::Configuration(format!("failed to load tokenizer from {}: {e}", path.display()))
        })?;
        Ok(Self { tokenizer })
    }
}

impl TokenCounter for HfTokenCounter {
    fn count(&self, text: &str) -> usize {
        match self.tokenizer.encode(text, false) {
            Ok(enc) => enc.get_ids().len(),
            Err(e) => {
                warn!(error = %e, "tokenizer failed, using character estimate");
                HeuristicTokenCounter.count(text)
            }
        }
    }

    fn tail<'a>(&self, text: &'a str, n: usize) -> &'a str {
        if n == 0 {
            return "";
        }
        let enc = match self.tokenizer.encode(text, false) {
            Ok(enc) => enc,
            Err(e) => {
                warn!(error = %e, "tokenizer failed, using character estimate");
                return HeuristicTokenCounter.tail(text, n);
            }
        };
        let offsets = enc.get_offsets();
        if offsets.len() <= n {
            return text;
        }
        let start = offsets[offsets.len() - n].0;
        if start <= text.len() && text.is_char_boundary(start) {
            &text[start..]
        } else {
            HeuristicTokenCounter.tail(text, n)
        }
    }
}

fn char_tail(text: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match text.char_indices().rev().nth(n - 1) {
        Some((start, _)) => &text[start..],
        None => text,
    }
}
