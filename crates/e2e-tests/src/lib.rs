//! End-to-end test infrastructure for vismatch.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering the build -> publish -> load -> match pipeline.
//!
//! The convolutional backbone is replaced by [`ColorHistogram`], a tiny
//! deterministic backend whose vectors depend only on pixel colours, so the
//! scenarios run without model weights.

use std::path::PathBuf;
use std::sync::Arc;

use image::{Rgb, RgbImage};
use rand::Rng;

use vismatch_embeddings::{
    BackendInfo, BackendLoader, ExtractError, ExtractorConfig, FeatureExtractor, ImageBackend,
};
use vismatch_index::IndexFiles;
use vismatch_indexing::CatalogItem;
use vismatch_search::ServiceConfig;
use vismatch_types::{CatalogItemId, FeatureVector};

/// Output dimension of the test backend.
pub const TEST_DIM: usize = 6;

/// Square edge length images are resized to for the test backend.
pub const TEST_INPUT: u32 = 8;

/// Mean and spread of each RGB channel.
pub struct ColorHistogram {
    info: BackendInfo,
}

impl ColorHistogram {
    pub fn new() -> Self {
        Self {
            info: BackendInfo {
                name: "color-histogram".to_string(),
                dimension: TEST_DIM,
                input_size: TEST_INPUT,
            },
        }
    }
}

impl Default for ColorHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBackend for ColorHistogram {
    fn info(&self) -> &BackendInfo {
        &self.info
    }

    fn embed(&self, image: &RgbImage) -> Result<Vec<f32>, ExtractError> {
        let n = (image.width() * image.height()) as f32;
        let mut mean = [0f32; 3];
        for p in image.pixels() {
            for (m, c) in mean.iter_mut().zip(p.0) {
                *m += f32::from(c) / n;
            }
        }
        let mut spread = [0f32; 3];
        for p in image.pixels() {
            for ((s, m), c) in spread.iter_mut().zip(mean).zip(p.0) {
                *s += (f32::from(c) - m).abs() / n;
            }
        }
        Ok(mean.into_iter().chain(spread).collect())
    }
}

/// Loader producing a fresh [`ColorHistogram`].
pub fn color_loader() -> Arc<dyn BackendLoader> {
    Arc::new(|| -> Result<Arc<dyn ImageBackend>, ExtractError> {
        Ok(Arc::new(ColorHistogram::new()))
    })
}

/// Loader that always fails as if the weights were missing.
pub fn missing_weights_loader() -> Arc<dyn BackendLoader> {
    Arc::new(|| -> Result<Arc<dyn ImageBackend>, ExtractError> {
        Err(ExtractError::ModelNotFound("model.safetensors".to_string()))
    })
}

pub fn extractor_config() -> ExtractorConfig {
    ExtractorConfig {
        dimension: TEST_DIM,
        input_size: TEST_INPUT,
    }
}

/// Ready extractor around [`ColorHistogram`].
pub fn test_extractor() -> Arc<FeatureExtractor> {
    Arc::new(FeatureExtractor::new(
        Arc::new(ColorHistogram::new()),
        extractor_config(),
    ))
}

/// Shared test harness for E2E tests.
///
/// Provides a media directory for catalog images, the index file pair
/// location, and a staging directory for query uploads.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub media_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub files: IndexFiles,
}

impl TestHarness {
    /// Create a new test harness with temp directory layout.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let media_dir = temp_dir.path().join("media");
        let staging_dir = temp_dir.path().join("staging");
        std::fs::create_dir_all(&media_dir).expect("Failed to create media dir");
        std::fs::create_dir_all(&staging_dir).expect("Failed to create staging dir");
        let files = IndexFiles::in_dir(temp_dir.path().join("ia_embeddings"));

        Self {
            _temp_dir: temp_dir,
            media_dir,
            staging_dir,
            files,
        }
    }

    /// Service config pointing at this harness.
    pub fn service_config(&self, threshold: f32) -> ServiceConfig {
        ServiceConfig {
            files: self.files.clone(),
            threshold,
            parallel_scan_min: 4096,
            max_image_bytes: 1 << 20,
            staging_dir: Some(self.staging_dir.clone()),
            extractor: extractor_config(),
        }
    }

    /// Write a solid-colour PNG under the media dir.
    pub fn write_image(&self, name: &str, color: [u8; 3]) -> PathBuf {
        let path = self.media_dir.join(name);
        solid_image(color).save(&path).expect("Failed to write image");
        path
    }

    /// One catalog item per colour, ids starting at 1.
    pub fn write_catalog(&self, colors: &[[u8; 3]]) -> Vec<CatalogItem> {
        colors
            .iter()
            .enumerate()
            .map(|(i, color)| {
                let id = i as i64 + 1;
                let path = self.write_image(&format!("product_{id}.png"), *color);
                CatalogItem::new(id, Some(path))
            })
            .collect()
    }

    /// Number of files currently staged for queries.
    pub fn staged_count(&self) -> usize {
        std::fs::read_dir(&self.staging_dir)
            .expect("Failed to read staging dir")
            .count()
    }

    pub fn read_index_bytes(&self) -> (Vec<u8>, Vec<u8>) {
        (
            std::fs::read(&self.files.vectors).expect("Failed to read vectors"),
            std::fs::read(&self.files.ids).expect("Failed to read ids"),
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn solid_image(color: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(16, 16, Rgb(color))
}

/// PNG-encoded solid-colour image.
pub fn png_bytes(color: [u8; 3]) -> Vec<u8> {
    let mut out = std::io::Cursor::new(Vec::new());
    solid_image(color)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("Failed to encode PNG");
    out.into_inner()
}

/// Up to six colours, each nearest to itself under [`ColorHistogram`].
pub fn distinct_colors(n: usize) -> Vec<[u8; 3]> {
    const BASE: [[u8; 3]; 6] = [
        [240, 10, 10],
        [10, 240, 10],
        [10, 10, 240],
        [240, 240, 10],
        [10, 240, 240],
        [240, 10, 240],
    ];
    BASE.iter().cycle().take(n).copied().collect()
}

/// `n` random vectors of dimension `dim` with ids 0..n.
pub fn random_entries(
    rng: &mut impl Rng,
    n: usize,
    dim: usize,
) -> (Vec<CatalogItemId>, Vec<FeatureVector>) {
    let ids = (0..n as i64).map(CatalogItemId::new).collect();
    let vectors = (0..n)
        .map(|_| FeatureVector::new((0..dim).map(|_| rng.random_range(-1.0..1.0)).collect()))
        .collect();
    (ids, vectors)
}
