//! Term-frequency vectors and cosine similarity.
//!
//! The reference stores score text against text without an embedding
//! service: each text becomes a sparse vector of lowercase word counts.

use std::collections::HashMap;

/// Split text into lowercase alphanumeric terms.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// A sparse term-frequency vector with its norm precomputed.
#[derive(Debug, Clone, Default)]
pub struct TermVector {
    weights: HashMap<String, f32>,
    norm: f32,
}

impl TermVector {
    pub fn from_text(text: &str) -> Self {
        let mut weights: HashMap<String, f32> = HashMap::new();
        for term in tokenize(text) {
            *weights.entry(term).or_insert(0.0) += 1.0;
        }
        let norm = weights.values().map(|w| w * w).sum::<f32>().sqrt();
        Self { weights, norm }
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Cosine similarity in `[0, 1]`. Empty vectors score 0.
    pub fn cosine(&self, other: &TermVector) -> f32 {
        if self.norm < 1e-10 || other.norm < 1e-10 {
            return 0.0;
        }

        // Iterate the smaller map
        let (small, large) = if self.weights.len() <= other.weights.len() {
            (&self.weights, &other.weights)
        } else {
            (&other.weights, &self.weights)
        };

        let dot: f32 = small
            .iter()
            .filter_map(|(term, w)| large.get(term).map(|v| w * v))
            .sum();

        (dot / (self.norm * other.norm)).clamp(0.0, 1.0)
    }
}

/// Rank `candidates` by similarity to `query`, best first, keeping `limit`.
///
/// Returns `(index, score)` pairs. Zero-similarity candidates are dropped.
pub fn rank<'a>(
    query: &TermVector,
    candidates: impl Iterator<Item = &'a TermVector>,
    limit: usize,
) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = candidates
        .enumerate()
        .map(|(i, v)| (i, query.cosine(v)))
        .filter(|(_, s)| *s > 0.0)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}
