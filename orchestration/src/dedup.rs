//! Near-duplicate detection within a scope.
//!
//! Similarity is pluggable through [`Similarity`]. The default
//! [`HashedEmbedder`] needs no model: tokens, token bigrams and character
//! trigrams are hashed (blake3) into a fixed-size vector, L2-normalised and
//! compared by cosine.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

pub const EMBED_DIM: usize = 256;

/// Default similarity at or above which two texts are duplicates.
pub const DEFAULT_DEDUP_THRESHOLD: f32 = 0.92;

/// Scores two texts in `[0, 1]` (cosine may dip below 0 for exotic inputs).
pub trait Similarity: Send + Sync {
    fn similarity(&self, left: &str, right: &str) -> f32;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HashedEmbedder;

impl HashedEmbedder {
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; EMBED_DIM];
        let tokens = tokenize(text);

        for token in &tokens {
            accumulate_feature(&mut vec, token, 1.0);
            for trigram in char_ngrams(token, 3) {
                accumulate_feature(&mut vec, &format!("tri:{trigram}"), 0.35);
            }
        }
        for pair in tokens.windows(2) {
            accumulate_feature(&mut vec, &format!("bi:{}_{}", pair[0], pair[1]), 0.8);
        }

        normalize_vector(&mut vec);
        vec
    }
}

impl Similarity for HashedEmbedder {
    fn similarity(&self, left: &str, right: &str) -> f32 {
        cosine_similarity(&self.embed(left), &self.embed(right))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn accumulate_feature(vec: &mut [f32], feature: &str, weight: f32) {
    let hash = blake3::hash(feature.as_bytes());
    let bytes = hash.as_bytes();
    let idx = ((bytes[0] as usize) << 8 | bytes[1] as usize) % EMBED_DIM;
    vec[idx] += weight;
}

fn normalize_vector(vec: &mut [f32]) {
    let norm = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vec {
            *value /= norm;
        }
    }
}

fn char_ngrams(token: &str, n: usize) -> Vec<String> {
    let chars = token.chars().collect::<Vec<_>>();
    if chars.len() < n {
        return vec![token.to_string()];
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    // Identical vectors are exactly 1.0, not 0.99999994.
    if left == right && left.iter().any(|v| *v != 0.0) {
        return 1.0;
    }
    let dot = left.iter().zip(right).map(|(a, b)| a * b).sum::<f32>();
    let left_norm = left.iter().map(|v| v * v).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|v| v * v).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    (dot / (left_norm * right_norm)).clamp(-1.0, 1.0)
}

/// A previously accepted artifact eligible for comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingArtifact {
    pub id: Uuid,
    pub scope_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub id: Uuid,
    pub score: f32,
}

pub struct Deduplicator {
    similarity: Box<dyn Similarity>,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(Box::new(HashedEmbedder))
    }
}

impl Deduplicator {
    pub fn new(similarity: Box<dyn Similarity>) -> Self {
        Self { similarity }
    }

    /// First artifact in `scope_id` (input order) scoring `>= threshold`.
    pub fn is_duplicate(
        &self,
        candidate: &str,
        existing: &[ExistingArtifact],
        scope_id: &str,
        threshold: f32,
    ) -> Option<DuplicateMatch> {
        for item in existing.iter().filter(|e| e.scope_id == scope_id) {
            let score = self.similarity.similarity(candidate, &item.content);
            if score >= threshold {
                debug!(duplicate_of = %item.id, score, threshold, "duplicate candidate");
                return Some(DuplicateMatch { id: item.id, score });
            }
        }
        None
    }
}
