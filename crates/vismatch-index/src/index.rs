//! Read-only embedding index.
//!
//! Holds the decoded index pair in memory along with the norm of every
//! vector, computed once at load so a query scan only needs the query norm.

use std::fs;

use tracing::info;
use vismatch_types::{CatalogItemId, FeatureVector};

use crate::codec::{self, IndexFiles};
use crate::error::IndexError;

/// Index statistics
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    /// Number of vectors in the index
    pub vector_count: usize,
    /// Embedding dimension
    pub dimension: usize,
    /// Combined size of both files in bytes
    pub size_bytes: u64,
    /// Whether both files are present
    pub available: bool,
}

impl IndexStats {
    /// Statistics for the file pair on disk.
    ///
    /// An absent pair is reported as unavailable; a pair with only one file
    /// present is an error naming the missing one.
    pub fn from_files(files: &IndexFiles) -> Result<Self, IndexError> {
        if !files.vectors.exists() && !files.ids.exists() {
            return Ok(Self::default());
        }
        let index = EmbeddingIndex::load(files)?;
        let size_bytes = fs::metadata(&files.vectors)?.len() + fs::metadata(&files.ids)?.len();
        Ok(Self {
            vector_count: index.size(),
            dimension: index.dimension(),
            size_bytes,
            available: true,
        })
    }
}

/// In-memory table of catalog id -> feature vector.
///
/// `ids[i]` and `vectors[i]` describe the same item. Every vector has the
/// same dimensionality. There is no mutation API.
#[derive(Debug, Clone)]
pub struct EmbeddingIndex {
    ids: Vec<CatalogItemId>,
    vectors: Vec<FeatureVector>,
    norms: Vec<f64>,
    dimension: usize,
}

impl EmbeddingIndex {
    /// Build an index from parallel sequences, inferring the dimension from
    /// the first vector.
    pub fn new(ids: Vec<CatalogItemId>, vectors: Vec<FeatureVector>) -> Result<Self, IndexError> {
        let dimension = vectors.first().map(FeatureVector::dimension).unwrap_or(0);
        Self::with_dimension(dimension, ids, vectors)
    }

    /// Build an index whose vectors must all have `dimension` components.
    pub fn with_dimension(
        dimension: usize,
        ids: Vec<CatalogItemId>,
        vectors: Vec<FeatureVector>,
    ) -> Result<Self, IndexError> {
        if ids.len() != vectors.len() {
            return Err(IndexError::InvalidInput(format!(
                "{} ids but {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.dimension() != dimension) {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: bad.dimension(),
            });
        }
        let norms = vectors.iter().map(FeatureVector::norm).collect();
        Ok(Self {
            ids,
            vectors,
            norms,
            dimension,
        })
    }

    /// Index with no entries.
    pub fn empty(dimension: usize) -> Self {
        Self {
            ids: Vec::new(),
            vectors: Vec::new(),
            norms: Vec::new(),
            dimension,
        }
    }

    /// Load the pair from disk.
    ///
    /// `Missing` when either file is absent, `Corrupt` when the pair cannot
    /// be decoded or is inconsistent.
    pub fn load(files: &IndexFiles) -> Result<Self, IndexError> {
        let arrays = codec::read_arrays(files)?;
        let index = Self::with_dimension(arrays.dimension, arrays.ids, arrays.vectors)
            .map_err(|e| IndexError::corrupt(&files.vectors, e.to_string()))?;
        info!(
            vectors = index.size(),
            dim = index.dimension,
            path = ?files.vectors,
            "Loaded embedding index"
        );
        Ok(index)
    }

    /// Publish this index to `files` atomically.
    pub fn save(&self, files: &IndexFiles) -> Result<(), IndexError> {
        codec::write_pair(files, &self.vectors, &self.ids, self.dimension)
    }

    /// Get the number of vectors in the index
    pub fn size(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Get the embedding dimension
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Entry at scan position `i`.
    pub fn at(&self, i: usize) -> Option<(CatalogItemId, &FeatureVector)> {
        Some((*self.ids.get(i)?, self.vectors.get(i)?))
    }

    /// Precomputed norm of the vector at scan position `i`.
    pub fn norm_at(&self, i: usize) -> Option<f64> {
        self.norms.get(i).copied()
    }

    pub fn ids(&self) -> &[CatalogItemId] {
        &self.ids
    }

    pub fn vectors(&self) -> &[FeatureVector] {
        &self.vectors
    }

    pub fn norms(&self) -> &[f64] {
        &self.norms
    }
}
