//! # vismatch-embeddings
//!
//! Image feature extraction for the visual product matcher.
//!
//! The convolutional backbone is an external capability behind the
//! [`ImageBackend`] trait. [`FeatureExtractor`] is the adapter the rest of the
//! system talks to: it decodes and resizes the input, runs the backend, checks
//! the output dimensionality and maps every failure onto the error taxonomy.
//!
//! ## Features
//! - Local inference via Candle (ResNet-50 without its classifier, 2048-d)
//! - Weights cached locally, downloaded from the Hugging Face Hub on first use
//! - Scoped staging of uploads in temp files that are removed on every exit path
//! - Capability check once at startup: [`ExtractorState::Ready`] or a
//!   permanent [`ExtractorState::Unavailable`]

pub mod cache;
pub mod candle;
pub mod error;
pub mod extractor;
pub mod model;
pub mod staging;

pub use crate::candle::{ResnetBackend, ResnetLoader};
pub use cache::{get_or_download_model, ModelCache, ModelPaths, DEFAULT_MODEL_REPO, MODEL_FILES};
pub use error::ExtractError;
pub use extractor::{decode_image, ExtractorConfig, ExtractorState, FeatureExtractor};
pub use model::{BackendInfo, BackendLoader, ImageBackend};
pub use staging::{StagedImage, Stager};
