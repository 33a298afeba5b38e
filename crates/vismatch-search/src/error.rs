//! Matching error types.

use thiserror::Error;
use vismatch_types::VisualMatchError;

#[derive(Debug, Error)]
pub enum SearchError {
    /// Query was produced with a different dimensionality than the index
    #[error("Dimension mismatch: index has {index}, query has {query}")]
    DimensionMismatch { index: usize, query: usize },
}

impl From<SearchError> for VisualMatchError {
    fn from(err: SearchError) -> Self {
        // The extractor and the persisted index disagree on D
        VisualMatchError::Config(err.to_string())
    }
}
