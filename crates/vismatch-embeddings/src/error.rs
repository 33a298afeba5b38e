//! Feature extraction error types.

use thiserror::Error;
use vismatch_types::VisualMatchError;

/// Errors that can occur while initializing or running the extractor.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Backend could not be initialized (weights, runtime)
    #[error("Extractor unavailable: {0}")]
    Unavailable(String),

    /// Input could not be decoded as a supported image
    #[error("Unreadable image: {0}")]
    UnreadableImage(String),

    /// Backend output does not have the configured dimensionality
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Candle model error
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Model file not found
    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    /// Download error
    #[error("Failed to download model: {0}")]
    Download(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for ExtractError {
    fn from(err: image::ImageError) -> Self {
        ExtractError::UnreadableImage(err.to_string())
    }
}

impl From<ExtractError> for VisualMatchError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Unavailable(_)
            | ExtractError::ModelNotFound(_)
            | ExtractError::Download(_) => VisualMatchError::ExtractorUnavailable(err.to_string()),
            ExtractError::UnreadableImage(msg) => VisualMatchError::UnreadableImage(msg),
            // Backend output disagrees with the configured D
            ExtractError::DimensionMismatch { .. } => VisualMatchError::Config(err.to_string()),
            // Inference failed on this particular input
            ExtractError::Candle(e) => {
                VisualMatchError::UnreadableImage(format!("inference failed: {e}"))
            }
            ExtractError::Io(e) => VisualMatchError::Io(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vismatch_types::ErrorKind;

    #[test]
    fn test_taxonomy_mapping() {
        let cases = [
            (ExtractError::Unavailable("no weights".into()), ErrorKind::ExtractorUnavailable),
            (ExtractError::Download("offline".into()), ErrorKind::ExtractorUnavailable),
            (ExtractError::UnreadableImage("bad png".into()), ErrorKind::UnreadableImage),
            (
                ExtractError::DimensionMismatch {
                    expected: 2048,
                    actual: 512,
                },
                ErrorKind::Config,
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(VisualMatchError::from(err).kind(), kind);
        }
    }

    #[test]
    fn test_error_display() {
        let err = ExtractError::DimensionMismatch {
            expected: 2048,
            actual: 512,
        };
        assert_eq!(err.to_string(), "Dimension mismatch: expected 2048, got 512");
    }
}
