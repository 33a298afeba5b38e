//! Error taxonomy for the visual matcher.
//!
//! Each crate keeps its own `thiserror` enum for internal detail and converts
//! into [`VisualMatchError`] at the boundary. The [`ErrorKind`] tells the
//! wrapping service how to react: request-local errors are reported to the
//! caller only, everything else reflects cached process-wide state.

use thiserror::Error;

/// Coarse classification used by boundaries (CLI exit codes, HTTP status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Builder has never run
    IndexMissing,
    /// Persisted index is unreadable or inconsistent
    CorruptData,
    /// Feature extraction capability failed to initialize
    ExtractorUnavailable,
    /// Query image could not be decoded
    UnreadableImage,
    /// Filesystem failure during build/publish
    Io,
    /// Invalid settings
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::IndexMissing => "index_missing",
            ErrorKind::CorruptData => "corrupt_data",
            ErrorKind::ExtractorUnavailable => "extractor_unavailable",
            ErrorKind::UnreadableImage => "unreadable_image",
            ErrorKind::Io => "io",
            ErrorKind::Config => "config",
        }
    }
}

/// Unified error type for matcher operations.
#[derive(Debug, Clone, Error)]
pub enum VisualMatchError {
    /// Index files are absent
    #[error("Embedding index not found at {0}; run the index builder")]
    IndexMissing(String),

    /// Index files are unreadable or inconsistent
    #[error("Corrupt index data: {0}")]
    CorruptData(String),

    /// Extractor could not be initialized
    #[error("Feature extractor unavailable: {0}")]
    ExtractorUnavailable(String),

    /// Per-request decode failure
    #[error("Unreadable image: {0}")]
    UnreadableImage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl VisualMatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VisualMatchError::IndexMissing(_) => ErrorKind::IndexMissing,
            VisualMatchError::CorruptData(_) => ErrorKind::CorruptData,
            VisualMatchError::ExtractorUnavailable(_) => ErrorKind::ExtractorUnavailable,
            VisualMatchError::UnreadableImage(_) => ErrorKind::UnreadableImage,
            VisualMatchError::Io(_) => ErrorKind::Io,
            VisualMatchError::Config(_) => ErrorKind::Config,
        }
    }

    /// Errors that concern only the failing request and leave no trace in
    /// process-wide state.
    pub fn is_request_local(&self) -> bool {
        matches!(self, VisualMatchError::UnreadableImage(_))
    }

    /// Errors a service should surface as "temporarily unavailable".
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            VisualMatchError::IndexMissing(_) | VisualMatchError::ExtractorUnavailable(_)
        )
    }
}

impl From<std::io::Error> for VisualMatchError {
    fn from(err: std::io::Error) -> Self {
        VisualMatchError::Io(err.to_string())
    }
}
