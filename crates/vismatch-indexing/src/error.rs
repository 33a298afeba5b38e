//! Error types for the index builder.

use std::path::PathBuf;

use thiserror::Error;
use vismatch_embeddings::ExtractError;
use vismatch_index::IndexError;
use vismatch_types::VisualMatchError;

use crate::builder::BuildReport;

/// Errors that end a build run
#[derive(Error, Debug)]
pub enum BuildError {
    /// Catalog manifest could not be read or parsed
    #[error("Catalog manifest {}: {}", .path.display(), .reason)]
    Manifest { path: PathBuf, reason: String },

    /// Extractor could not be loaded before the batch started
    #[error("Extractor error: {0}")]
    Extractor(#[from] ExtractError),

    /// Every item was skipped or failed; nothing was published
    #[error("No catalog image could be processed ({} items seen)", .report.items.len())]
    NothingExtracted { report: Box<BuildReport> },

    /// Writing the new index pair failed; the previous pair is untouched
    #[error("Publish failed: {0}")]
    Publish(#[from] IndexError),
}

impl BuildError {
    /// The per-item report, when the batch ran to completion.
    pub fn report(&self) -> Option<&BuildReport> {
        match self {
            BuildError::NothingExtracted { report } => Some(report),
            _ => None,
        }
    }
}

impl From<BuildError> for VisualMatchError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Manifest { .. } => VisualMatchError::Config(err.to_string()),
            BuildError::Extractor(e) => e.into(),
            BuildError::Publish(e) => e.into(),
            BuildError::NothingExtracted { .. } => VisualMatchError::Io(err.to_string()),
        }
    }
}
