//! Candle-based image backend.
//!
//! Uses ResNet-50 with its classification layer removed; the global average
//! pool yields one 2048-dimensional vector per image.

use std::path::Path;
use std::sync::Arc;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Func, VarBuilder};
use candle_transformers::models::resnet;
use image::RgbImage;
use tracing::{debug, info};

use crate::cache::{get_or_download_model, ModelCache};
use crate::error::ExtractError;
use crate::model::{BackendInfo, BackendLoader, ImageBackend};

/// Output dimension of ResNet-50 after average pooling
pub const FEATURE_DIM: usize = 2048;

/// Input edge the backbone was trained on
pub const INPUT_SIZE: u32 = 224;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// ResNet-50 feature backbone running on the CPU.
pub struct ResnetBackend {
    model: Func<'static>,
    device: Device,
    info: BackendInfo,
}

impl ResnetBackend {
    /// Load the backbone from cache (downloading if needed).
    pub fn load(cache: &ModelCache, offline: bool) -> Result<Self, ExtractError> {
        let paths = get_or_download_model(cache, offline)?;
        Self::load_from_path(&paths.weights)
    }

    pub fn load_default() -> Result<Self, ExtractError> {
        Self::load(&ModelCache::default(), false)
    }

    /// Load from an explicit safetensors file
    pub fn load_from_path(weights_path: &Path) -> Result<Self, ExtractError> {
        if !weights_path.exists() {
            return Err(ExtractError::ModelNotFound(
                weights_path.display().to_string(),
            ));
        }
        info!(path = ?weights_path, "Loading ResNet-50 backbone...");

        let device = Device::Cpu;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path.to_path_buf()], DType::F32, &device)?
        };
        let model = resnet::resnet50_no_final_layer(vb)?;

        info!(dim = FEATURE_DIM, input = INPUT_SIZE, "Model loaded successfully");

        Ok(Self {
            model,
            device,
            info: BackendInfo {
                name: "resnet50".to_string(),
                dimension: FEATURE_DIM,
                input_size: INPUT_SIZE,
            },
        })
    }

    /// HWC u8 image -> normalized 1xCxHxW tensor.
    fn preprocess(&self, image: &RgbImage) -> Result<Tensor, ExtractError> {
        let (width, height) = image.dimensions();
        let data = Tensor::from_vec(
            image.as_raw().clone(),
            (height as usize, width as usize, 3),
            &self.device,
        )?
        .permute((2, 0, 1))?;

        let mean = Tensor::new(&IMAGENET_MEAN, &self.device)?.reshape((3, 1, 1))?;
        let std = Tensor::new(&IMAGENET_STD, &self.device)?.reshape((3, 1, 1))?;

        let normalized = (data.to_dtype(DType::F32)? / 255.)?
            .broadcast_sub(&mean)?
            .broadcast_div(&std)?;
        Ok(normalized.unsqueeze(0)?)
    }
}

impl ImageBackend for ResnetBackend {
    fn info(&self) -> &BackendInfo {
        &self.info
    }

    fn embed(&self, image: &RgbImage) -> Result<Vec<f32>, ExtractError> {
        let input = self.preprocess(image)?;
        let features = self.model.forward(&input)?.squeeze(0)?;
        let values: Vec<f32> = features.to_vec1()?;
        debug!(dim = values.len(), "Backbone forward pass complete");
        Ok(values)
    }
}

/// Loads [`ResnetBackend`] through the model cache.
#[derive(Debug, Clone, Default)]
pub struct ResnetLoader {
    pub cache: ModelCache,
    /// Never download; fail when the weights are not cached
    pub offline: bool,
}

impl ResnetLoader {
    pub fn new(cache: ModelCache, offline: bool) -> Self {
        Self { cache, offline }
    }
}

impl BackendLoader for ResnetLoader {
    fn load(&self) -> Result<Arc<dyn ImageBackend>, ExtractError> {
        let backend = ResnetBackend::load(&self.cache, self.offline)?;
        Ok(Arc::new(backend))
    }
}
