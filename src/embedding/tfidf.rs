//! Offline hashed-term embedder
//!
//! Deterministic and dependency free. It backs `EMBEDDING_PROVIDER=tfidf`,
//! the in-memory index and the test suite. Memories and queries go through
//! the same [`terms`] pipeline, so a query that repeats a memory's wording
//! lands on the same buckets.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;

use crate::embedding::Embedder;
use crate::error::Result;

/// Words that carry no topic on their own
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "the", "to", "was", "with",
];

/// Weight of a bigram relative to a single term
const BIGRAM_WEIGHT: f32 = 0.5;

/// Lowercased word terms, punctuation and stop words removed
pub(crate) fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Feature-hashing embedder over terms and adjacent term pairs
pub struct TfIdfEmbedder {
    dimensions: usize,
}

impl TfIdfEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Bucket and sign for a feature, both taken from one hash
    fn slot(&self, feature: &[&str]) -> (usize, f32) {
        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        let h = hasher.finish();
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        ((h % self.dimensions as u64) as usize, sign)
    }

    /// Synchronous embedding; all-zero for text without terms
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let terms = terms(text);
        let mut vector = vec![0.0_f32; self.dimensions];
        if terms.is_empty() {
            return vector;
        }

        let mut counts: HashMap<&str, u32> = HashMap::new();
        for term in &terms {
            *counts.entry(term.as_str()).or_default() += 1;
        }

        // Sublinear term frequency; longer terms stand in for rarer ones
        for (term, count) in counts {
            let tf = 1.0 + (count as f32).ln();
            let rarity = 1.0 + (term.chars().count() as f32 * 0.1).min(1.0);
            let (idx, sign) = self.slot(&[term]);
            vector[idx] += sign * tf * rarity;
        }

        for pair in terms.windows(2) {
            let (idx, sign) = self.slot(&[pair[0].as_str(), pair[1].as_str()]);
            vector[idx] += sign * BIGRAM_WEIGHT;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for TfIdfEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "tfidf"
    }
}
