//! Feature vectors and catalog identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an item in the external catalog.
///
/// The matcher never owns catalog content; it only hands this id back to the
/// surrounding system, which resolves it to full item details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogItemId(i64);

impl CatalogItemId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for CatalogItemId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for CatalogItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Image embedding produced by a feature extractor.
///
/// Unlike text embeddings the values are kept exactly as produced (no
/// normalization) so that a persisted index round-trips bit for bit. Cosine
/// similarity accounts for the norms at match time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Get the vector dimensionality
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.values
    }

    /// Euclidean norm, accumulated in f64.
    pub fn norm(&self) -> f64 {
        l2_norm(&self.values)
    }

    /// True when every component is zero (cosine is undefined).
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }
}

impl From<Vec<f32>> for FeatureVector {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

impl AsRef<[f32]> for FeatureVector {
    fn as_ref(&self) -> &[f32] {
        &self.values
    }
}

/// Euclidean norm of a raw slice, accumulated in f64.
pub fn l2_norm(values: &[f32]) -> f64 {
    values
        .iter()
        .map(|v| {
            let v = f64::from(*v);
            v * v
        })
        .sum::<f64>()
        .sqrt()
}
