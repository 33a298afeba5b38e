//! Model weight caching.
//!
//! Downloads the backbone weights from the Hugging Face Hub once and keeps
//! them in a local cache directory.

use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::ExtractError;

/// Default model repository on HuggingFace
pub const DEFAULT_MODEL_REPO: &str = "timm/resnet50.a1_in1k";

/// Required model files
pub const MODEL_FILES: &[&str] = &["model.safetensors"];

/// Model cache configuration
#[derive(Debug, Clone)]
pub struct ModelCache {
    /// Cache directory path
    pub cache_dir: PathBuf,
    /// Model repository ID
    pub repo_id: String,
}

impl Default for ModelCache {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from(".cache"))
            .join("vismatch")
            .join("models");

        Self {
            cache_dir,
            repo_id: DEFAULT_MODEL_REPO.to_string(),
        }
    }
}

impl ModelCache {
    pub fn new(cache_dir: impl Into<PathBuf>, repo_id: impl Into<String>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            repo_id: repo_id.into(),
        }
    }

    /// Get the model directory path
    pub fn model_dir(&self) -> PathBuf {
        self.cache_dir.join(self.repo_id.replace('/', "_"))
    }

    /// Check if all model files are cached
    pub fn is_cached(&self) -> bool {
        let model_dir = self.model_dir();
        MODEL_FILES.iter().all(|f| model_dir.join(f).exists())
    }

    pub fn file_path(&self, filename: &str) -> PathBuf {
        self.model_dir().join(filename)
    }
}

/// Paths to model files
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub weights: PathBuf,
}

/// Get or download model files.
///
/// With `offline` set, a cache miss is reported as `ModelNotFound` instead of
/// reaching out to the Hub.
pub fn get_or_download_model(cache: &ModelCache, offline: bool) -> Result<ModelPaths, ExtractError> {
    let model_dir = cache.model_dir();

    if cache.is_cached() {
        debug!(path = ?model_dir, "Using cached model");
    } else if offline {
        return Err(ExtractError::ModelNotFound(format!(
            "{} not cached in {}",
            cache.repo_id,
            model_dir.display()
        )));
    } else {
        info!(repo = %cache.repo_id, "Downloading model files...");
        download_model_files(cache)?;
    }

    Ok(ModelPaths {
        weights: model_dir.join("model.safetensors"),
    })
}

fn download_model_files(cache: &ModelCache) -> Result<(), ExtractError> {
    use hf_hub::api::sync::Api;

    let api = Api::new().map_err(|e| ExtractError::Download(e.to_string()))?;
    let repo = api.model(cache.repo_id.clone());

    std::fs::create_dir_all(cache.model_dir())?;

    for filename in MODEL_FILES {
        info!(file = filename, "Downloading...");
        let source_path = repo
            .get(filename)
            .map_err(|e| ExtractError::Download(format!("{}: {}", filename, e)))?;

        let dest_path = cache.file_path(filename);
        std::fs::copy(&source_path, &dest_path)?;
        debug!(file = filename, "Downloaded to {:?}", dest_path);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cache_default() {
        let cache = ModelCache::default();
        assert!(cache.cache_dir.to_string_lossy().contains("vismatch"));
        assert_eq!(cache.repo_id, DEFAULT_MODEL_REPO);
    }

    #[test]
    fn test_is_cached_empty() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::new(temp.path(), "test/model");
        assert!(!cache.is_cached());
        assert!(cache.model_dir().ends_with("test_model"));
    }

    #[test]
    fn test_offline_miss_is_model_not_found() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::new(temp.path(), "test/model");
        let err = get_or_download_model(&cache, true).unwrap_err();
        assert!(matches!(err, ExtractError::ModelNotFound(_)));
    }

    #[test]
    fn test_cached_files_are_used() {
        let temp = TempDir::new().unwrap();
        let cache = ModelCache::new(temp.path(), "test/model");
        std::fs::create_dir_all(cache.model_dir()).unwrap();
        std::fs::write(cache.file_path("model.safetensors"), b"weights").unwrap();

        let paths = get_or_download_model(&cache, true).unwrap();
        assert_eq!(paths.weights, cache.file_path("model.safetensors"));
    }
}
