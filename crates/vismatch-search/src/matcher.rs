//! Exact nearest-neighbour matching by cosine similarity.
//!
//! Every query is compared against every indexed vector. The best score wins;
//! equal scores resolve to the lowest scan position, also when the scan is
//! split across rayon workers.

use rayon::prelude::*;
use tracing::debug;
use vismatch_index::EmbeddingIndex;
use vismatch_types::{l2_norm, FeatureVector, MatchResult, DEFAULT_MATCH_THRESHOLD};

use crate::error::SearchError;

/// Cosine similarity of two equal-length vectors.
///
/// Zero-norm (or non-finite) input yields 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    cosine_with_norms(a, l2_norm(a), b, l2_norm(b))
}

fn cosine_with_norms(a: &[f32], norm_a: f64, b: &[f32], norm_b: f64) -> f64 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    let sim = dot / (norm_a * norm_b);
    if sim.is_finite() {
        sim.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Candidate position and score. `usize::MAX` marks "nothing seen yet".
type Best = (usize, f64);

const NONE_SEEN: Best = (usize::MAX, f64::NEG_INFINITY);

/// Higher score wins; on equal scores the lower position wins.
fn better(a: Best, b: Best) -> Best {
    if b.1 > a.1 || (b.1 == a.1 && b.0 < a.0) {
        b
    } else {
        a
    }
}

/// Threshold decision over an [`EmbeddingIndex`].
#[derive(Debug, Clone, Copy)]
pub struct Matcher {
    threshold: f32,
    parallel_scan_min: usize,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl Matcher {
    /// Sequential matcher with an inclusive `threshold`.
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            parallel_scan_min: usize::MAX,
        }
    }

    /// Split the scan across rayon workers once the index holds at least
    /// `min` vectors.
    pub fn with_parallel_scan_min(mut self, min: usize) -> Self {
        self.parallel_scan_min = min.max(1);
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Best match for `query`, or a miss carrying the best score seen.
    pub fn match_query(
        &self,
        query: &FeatureVector,
        index: &EmbeddingIndex,
    ) -> Result<MatchResult, SearchError> {
        if index.is_empty() {
            return Ok(MatchResult::empty());
        }
        if query.dimension() != index.dimension() {
            return Err(SearchError::DimensionMismatch {
                index: index.dimension(),
                query: query.dimension(),
            });
        }

        let (best_index, best_score) = if index.size() >= self.parallel_scan_min {
            scan_parallel(query, index)
        } else {
            scan(query, index)
        };
        let score = best_score as f32;

        let result = if score >= self.threshold {
            // best_index is in range: the index is non-empty and every
            // position scores a finite value
            MatchResult::hit(index.ids()[best_index], score)
        } else {
            MatchResult::miss(score)
        };
        debug!(
            found = result.found,
            score = result.score,
            threshold = self.threshold,
            scanned = index.size(),
            "Match decision"
        );
        Ok(result)
    }
}

/// Match with a sequential scan.
pub fn match_query(
    query: &FeatureVector,
    index: &EmbeddingIndex,
    threshold: f32,
) -> Result<MatchResult, SearchError> {
    Matcher::new(threshold).match_query(query, index)
}

fn score_at(query: &[f32], query_norm: f64, index: &EmbeddingIndex, i: usize) -> Best {
    let v = index.vectors()[i].as_slice();
    (i, cosine_with_norms(query, query_norm, v, index.norms()[i]))
}

fn scan(query: &FeatureVector, index: &EmbeddingIndex) -> Best {
    let q = query.as_slice();
    let q_norm = query.norm();
    (0..index.size())
        .map(|i| score_at(q, q_norm, index, i))
        .fold(NONE_SEEN, better)
}

fn scan_parallel(query: &FeatureVector, index: &EmbeddingIndex) -> Best {
    let q = query.as_slice();
    let q_norm = query.norm();
    (0..index.size())
        .into_par_iter()
        .map(|i| score_at(q, q_norm, index, i))
        .reduce(|| NONE_SEEN, better)
}
