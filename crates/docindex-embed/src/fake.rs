//! Deterministic offline embedder. Each whitespace token is hashed into one
//! slot of the vector and the result is L2-normalized, so texts that share
//! words land close together.

use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use twox_hash::XxHash64;

use docindex_core::traits::EmbeddingBackend;
use docindex_core::types::{EmbedMode, Embedding};
use docindex_core::Result;

pub struct FakeEmbedder {
    dimension: usize,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn embed_one(&self, text: &str) -> Embedding {
        let mut v = vec![0f32; self.dimension];
        if self.dimension == 0 {
            return v;
        }
        for token in text.split_whitespace() {
            let token = token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let slot = usize::try_from(h % self.dimension as u64).unwrap_or(0);
            let weight = 0.5 + f32::from(u16::try_from(h >> 48).unwrap_or(0)) / f32::from(u16::MAX);
            v[slot] += weight;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

#[async_trait]
impl EmbeddingBackend for FakeEmbedder {
    fn name(&self) -> &str {
        "fake"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String], _mode: EmbedMode) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
