//! Configuration loading for vismatch.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/vismatch/config.toml`
//! (platform equivalent via `directories`).

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::VisualMatchError;

/// Similarity a best match must reach to count as found (inclusive).
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.70;

/// Feature extractor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorSettings {
    /// Hugging Face repository holding the backbone weights
    #[serde(default = "default_model_repo")]
    pub model_repo: String,

    /// Local directory the weights are cached in
    #[serde(default = "default_model_cache_dir")]
    pub cache_dir: String,

    /// Expected output dimensionality of every feature vector
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Square edge (pixels) images are resized to before inference
    #[serde(default = "default_input_size")]
    pub input_size: u32,
}

fn default_model_repo() -> String {
    "timm/resnet50.a1_in1k".to_string()
}

fn default_model_cache_dir() -> String {
    ProjectDirs::from("", "", "vismatch")
        .map(|p| p.cache_dir().join("models"))
        .unwrap_or_else(|| PathBuf::from(".cache/vismatch/models"))
        .to_string_lossy()
        .to_string()
}

fn default_dimension() -> usize {
    2048
}

fn default_input_size() -> u32 {
    224
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            model_repo: default_model_repo(),
            cache_dir: default_model_cache_dir(),
            dimension: default_dimension(),
            input_size: default_input_size(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding the persisted index pair
    #[serde(default = "default_index_dir")]
    pub index_dir: String,

    /// File name of the vectors array inside `index_dir`
    #[serde(default = "default_vectors_file")]
    pub vectors_file: String,

    /// File name of the ids array inside `index_dir`
    #[serde(default = "default_ids_file")]
    pub ids_file: String,

    /// Root that relative catalog image paths are resolved against
    #[serde(default = "default_media_root")]
    pub media_root: String,

    /// Catalog manifest consumed by the builder (defaults to `index_dir/catalog.json`)
    #[serde(default)]
    pub catalog_manifest: Option<String>,

    /// Inclusive similarity threshold for a match
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,

    /// Index size from which the scan is split across worker threads
    #[serde(default = "default_parallel_scan_min")]
    pub parallel_scan_min: usize,

    /// Upper bound on a staged query image
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,

    /// Feature extractor configuration
    #[serde(default)]
    pub extractor: ExtractorSettings,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_index_dir() -> String {
    ProjectDirs::from("", "", "vismatch")
        .map(|p| p.data_local_dir().join("index"))
        .unwrap_or_else(|| PathBuf::from("./index"))
        .to_string_lossy()
        .to_string()
}

fn default_vectors_file() -> String {
    "product_embeddings.npy".to_string()
}

fn default_ids_file() -> String {
    "product_ids.npy".to_string()
}

fn default_media_root() -> String {
    ".".to_string()
}

fn default_match_threshold() -> f32 {
    DEFAULT_MATCH_THRESHOLD
}

fn default_parallel_scan_min() -> usize {
    4096
}

fn default_max_image_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            vectors_file: default_vectors_file(),
            ids_file: default_ids_file(),
            media_root: default_media_root(),
            catalog_manifest: None,
            match_threshold: default_match_threshold(),
            parallel_scan_min: default_parallel_scan_min(),
            max_image_bytes: default_max_image_bytes(),
            extractor: ExtractorSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/vismatch/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (VISMATCH_*, nested keys with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, VisualMatchError> {
        let config_dir = ProjectDirs::from("", "", "vismatch")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");
        let extractor = ExtractorSettings::default();

        let mut builder = Config::builder()
            .set_default("index_dir", default_index_dir())
            .map_err(config_err)?
            .set_default("vectors_file", default_vectors_file())
            .map_err(config_err)?
            .set_default("ids_file", default_ids_file())
            .map_err(config_err)?
            .set_default("media_root", default_media_root())
            .map_err(config_err)?
            .set_default("match_threshold", 0.70_f64)
            .map_err(config_err)?
            .set_default("parallel_scan_min", default_parallel_scan_min() as i64)
            .map_err(config_err)?
            .set_default("max_image_bytes", default_max_image_bytes() as i64)
            .map_err(config_err)?
            .set_default("log_level", default_log_level())
            .map_err(config_err)?
            .set_default("extractor.model_repo", extractor.model_repo)
            .map_err(config_err)?
            .set_default("extractor.cache_dir", extractor.cache_dir)
            .map_err(config_err)?
            .set_default("extractor.dimension", extractor.dimension as i64)
            .map_err(config_err)?
            .set_default("extractor.input_size", i64::from(extractor.input_size))
            .map_err(config_err)?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // VISMATCH_MATCH_THRESHOLD, VISMATCH_EXTRACTOR__DIMENSION, ...
        builder = builder.add_source(
            Environment::with_prefix("VISMATCH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(config_err)?
            .try_deserialize()
            .map_err(config_err)?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), VisualMatchError> {
        if !(-1.0..=1.0).contains(&self.match_threshold) {
            return Err(VisualMatchError::Config(format!(
                "match_threshold must be in [-1.0, 1.0], got {}",
                self.match_threshold
            )));
        }
        if self.extractor.dimension == 0 {
            return Err(VisualMatchError::Config(
                "extractor.dimension must be > 0".to_string(),
            ));
        }
        if self.extractor.input_size == 0 {
            return Err(VisualMatchError::Config(
                "extractor.input_size must be > 0".to_string(),
            ));
        }
        if self.vectors_file == self.ids_file {
            return Err(VisualMatchError::Config(
                "vectors_file and ids_file must differ".to_string(),
            ));
        }
        for name in [&self.vectors_file, &self.ids_file] {
            if std::path::Path::new(name).file_name() != Some(std::ffi::OsStr::new(name)) {
                return Err(VisualMatchError::Config(format!(
                    "index file name {name:?} must be a plain file name inside index_dir"
                )));
            }
        }
        Ok(())
    }

    /// Expanded index directory
    pub fn index_path(&self) -> PathBuf {
        expand_home(&self.index_dir)
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.index_path().join(&self.vectors_file)
    }

    pub fn ids_path(&self) -> PathBuf {
        self.index_path().join(&self.ids_file)
    }

    pub fn media_root_path(&self) -> PathBuf {
        expand_home(&self.media_root)
    }

    pub fn catalog_manifest_path(&self) -> PathBuf {
        match &self.catalog_manifest {
            Some(path) => expand_home(path),
            None => self.index_path().join("catalog.json"),
        }
    }

    pub fn model_cache_path(&self) -> PathBuf {
        expand_home(&self.extractor.cache_dir)
    }
}

fn config_err(err: config::ConfigError) -> VisualMatchError {
    VisualMatchError::Config(err.to_string())
}

/// Expand a leading `~/` to the user's home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}
