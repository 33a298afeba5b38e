//! Index error types.

use std::path::PathBuf;

use thiserror::Error;
use vismatch_types::VisualMatchError;

/// Errors that can occur while reading, writing or building an index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// One of the backing files does not exist
    #[error("Index file not found: {}", .0.display())]
    Missing(PathBuf),

    /// File contents could not be decoded or the pair is inconsistent
    #[error("Corrupt index data in {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Caller handed the codec inconsistent sequences
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        IndexError::Corrupt {
            path: path.into().display().to_string(),
            reason: reason.into(),
        }
    }
}

impl From<IndexError> for VisualMatchError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Missing(path) => VisualMatchError::IndexMissing(path.display().to_string()),
            IndexError::Corrupt { .. } | IndexError::DimensionMismatch { .. } => {
                VisualMatchError::CorruptData(err.to_string())
            }
            IndexError::InvalidInput(msg) => VisualMatchError::CorruptData(msg),
            IndexError::Io(e) => VisualMatchError::Io(e.to_string()),
        }
    }
}
