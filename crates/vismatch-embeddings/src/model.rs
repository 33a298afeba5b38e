//! Backend trait for the external inference capability.

use std::sync::Arc;

use image::RgbImage;

use crate::error::ExtractError;

/// Backend information
#[derive(Debug, Clone)]
pub struct BackendInfo {
    /// Model name (e.g., "resnet50")
    pub name: String,
    /// Output dimension
    pub dimension: usize,
    /// Square input edge in pixels
    pub input_size: u32,
}

/// Image -> vector inference capability.
///
/// Implementations receive an RGB image already resized to
/// `info().input_size` and must be thread-safe (Send + Sync) for concurrent
/// queries.
pub trait ImageBackend: Send + Sync {
    /// Get backend information
    fn info(&self) -> &BackendInfo;

    /// Compute the raw feature vector for one image.
    fn embed(&self, image: &RgbImage) -> Result<Vec<f32>, ExtractError>;
}

/// Creates a backend; called once at startup and on explicit reload.
pub trait BackendLoader: Send + Sync {
    fn load(&self) -> Result<Arc<dyn ImageBackend>, ExtractError>;
}

impl<F> BackendLoader for F
where
    F: Fn() -> Result<Arc<dyn ImageBackend>, ExtractError> + Send + Sync,
{
    fn load(&self) -> Result<Arc<dyn ImageBackend>, ExtractError> {
        self()
    }
}
