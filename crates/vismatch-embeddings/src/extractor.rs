//! Feature extractor adapter.
//!
//! Wraps an [`ImageBackend`] with the contract the rest of the system relies
//! on: inputs are decoded and resized here, backend failures are mapped onto
//! [`ExtractError`], and every returned vector has the configured dimension.

use std::path::Path;
use std::sync::Arc;

use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use tracing::{debug, info, warn};
use vismatch_types::{ExtractorSettings, FeatureVector};

use crate::error::ExtractError;
use crate::model::{BackendInfo, BackendLoader, ImageBackend};

/// Shape every extracted vector must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractorConfig {
    /// Expected output dimension `D`
    pub dimension: usize,
    /// Square edge images are resized to
    pub input_size: u32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            dimension: 2048,
            input_size: 224,
        }
    }
}

impl From<&ExtractorSettings> for ExtractorConfig {
    fn from(settings: &ExtractorSettings) -> Self {
        Self {
            dimension: settings.dimension,
            input_size: settings.input_size,
        }
    }
}

/// Result of the one-time capability check.
#[derive(Clone)]
pub enum ExtractorState {
    Ready(Arc<FeatureExtractor>),
    /// Initialization failed; carries the reason for every later request
    Unavailable(String),
}

impl ExtractorState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ExtractorState::Ready(_))
    }

    /// The extractor, or the cached initialization failure.
    pub fn extractor(&self) -> Result<Arc<FeatureExtractor>, ExtractError> {
        match self {
            ExtractorState::Ready(extractor) => Ok(extractor.clone()),
            ExtractorState::Unavailable(reason) => Err(ExtractError::Unavailable(reason.clone())),
        }
    }
}

impl std::fmt::Debug for ExtractorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractorState::Ready(e) => f.debug_tuple("Ready").field(&e.info().name).finish(),
            ExtractorState::Unavailable(r) => f.debug_tuple("Unavailable").field(r).finish(),
        }
    }
}

/// Adapter around the inference backend.
pub struct FeatureExtractor {
    backend: Arc<dyn ImageBackend>,
    config: ExtractorConfig,
}

impl FeatureExtractor {
    pub fn new(backend: Arc<dyn ImageBackend>, config: ExtractorConfig) -> Self {
        Self { backend, config }
    }

    /// Load the backend and verify it produces `config.dimension` values.
    ///
    /// Never fails: an unusable backend becomes [`ExtractorState::Unavailable`].
    pub fn initialize(loader: &dyn BackendLoader, config: ExtractorConfig) -> ExtractorState {
        let backend = match loader.load() {
            Ok(backend) => backend,
            Err(e) => {
                warn!(error = %e, "Feature extractor failed to initialize");
                return ExtractorState::Unavailable(e.to_string());
            }
        };

        let extractor = Self::new(backend, config);
        // A blank probe image surfaces a wrong-D backend at startup rather
        // than on the first query.
        let probe = RgbImage::from_pixel(config.input_size, config.input_size, Rgb([0, 0, 0]));
        match extractor.extract_decoded(&probe) {
            Ok(_) => {
                info!(
                    backend = %extractor.info().name,
                    dim = config.dimension,
                    input = config.input_size,
                    "Feature extractor ready"
                );
                ExtractorState::Ready(Arc::new(extractor))
            }
            Err(e) => {
                warn!(error = %e, "Feature extractor failed its startup probe");
                ExtractorState::Unavailable(format!("startup probe failed: {e}"))
            }
        }
    }

    pub fn info(&self) -> &BackendInfo {
        self.backend.info()
    }

    pub fn config(&self) -> ExtractorConfig {
        self.config
    }

    /// Extract the feature vector of an encoded image (PNG, JPEG, WebP).
    pub fn extract(&self, image_bytes: &[u8]) -> Result<FeatureVector, ExtractError> {
        let image = decode_image(image_bytes, self.config.input_size)?;
        self.extract_decoded(&image)
    }

    /// Extract from an image file on disk.
    pub fn extract_path(&self, path: &Path) -> Result<FeatureVector, ExtractError> {
        let bytes = std::fs::read(path)?;
        self.extract(&bytes)
    }

    /// Run the backend on an image that is already `input_size` square.
    pub fn extract_decoded(&self, image: &RgbImage) -> Result<FeatureVector, ExtractError> {
        let values = self.backend.embed(image)?;
        if values.len() != self.config.dimension {
            return Err(ExtractError::DimensionMismatch {
                expected: self.config.dimension,
                actual: values.len(),
            });
        }
        debug!(dim = values.len(), "Extracted feature vector");
        Ok(FeatureVector::new(values))
    }
}

/// Decode an encoded image and resize it to `size` x `size` RGB.
///
/// The aspect ratio is not preserved, matching how the catalog vectors were
/// produced.
pub fn decode_image(bytes: &[u8], size: u32) -> Result<RgbImage, ExtractError> {
    if bytes.is_empty() {
        return Err(ExtractError::UnreadableImage("empty input".to_string()));
    }
    let decoded = image::load_from_memory(bytes)?;
    Ok(decoded.resize_exact(size, size, FilterType::Triangle).to_rgb8())
}
