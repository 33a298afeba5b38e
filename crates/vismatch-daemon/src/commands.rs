//! Command implementations for the vismatch binary.
//!
//! Handles:
//! - build: load the extractor, run the builder over the catalog manifest,
//!   publish the index pair
//! - match: one query against the published index
//! - status: index and model cache state, without loading the extractor

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use vismatch_embeddings::{
    BackendLoader, ExtractorConfig, FeatureExtractor, ModelCache, ResnetLoader,
};
use vismatch_index::{IndexFiles, IndexStats};
use vismatch_indexing::{
    BuildConfig, BuildReport, IndexBuilder, LoggingProgressCallback, ManifestCatalog,
};
use vismatch_search::{ServiceConfig, VisualSearchService};
use vismatch_types::{CatalogItemId, ErrorKind, MatchResult, Settings, VisualMatchError};

/// Process exit codes (sysexits.h)
pub mod exit {
    pub const OK: u8 = 0;
    pub const FAILURE: u8 = 1;
    pub const DATAERR: u8 = 65;
    pub const UNAVAILABLE: u8 = 69;
    pub const IOERR: u8 = 74;
    pub const CONFIG: u8 = 78;
}

/// CLI values that take precedence over every config source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub index_dir: Option<String>,
    pub media_root: Option<String>,
    pub manifest: Option<String>,
    pub threshold: Option<f32>,
}

/// Load configuration (defaults -> file -> env) and apply CLI overrides.
pub fn load_settings(config_path: Option<&str>, overrides: &Overrides) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    if let Some(level) = &overrides.log_level {
        settings.log_level = level.clone();
    }
    if let Some(dir) = &overrides.index_dir {
        settings.index_dir = dir.clone();
    }
    if let Some(root) = &overrides.media_root {
        settings.media_root = root.clone();
    }
    if let Some(manifest) = &overrides.manifest {
        settings.catalog_manifest = Some(manifest.clone());
    }
    if let Some(threshold) = overrides.threshold {
        settings.match_threshold = threshold;
    }

    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

/// Install the tracing subscriber. Logs go to stderr so stdout stays
/// machine-readable.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// ResNet backend loader configured from settings.
pub fn resnet_loader(settings: &Settings, offline: bool) -> Arc<dyn BackendLoader> {
    let cache = ModelCache::new(settings.model_cache_path(), &settings.extractor.model_repo);
    Arc::new(ResnetLoader::new(cache, offline))
}

pub fn index_files(settings: &Settings) -> IndexFiles {
    IndexFiles::new(settings.vectors_path(), settings.ids_path())
}

/// Map an error chain onto a process exit code.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.chain().find_map(|e| e.downcast_ref::<VisualMatchError>()) {
        Some(e) if e.is_unavailable() => exit::UNAVAILABLE,
        Some(e) if e.is_request_local() => exit::DATAERR,
        Some(e) if e.kind() == ErrorKind::Config => exit::CONFIG,
        Some(_) => exit::IOERR,
        None => exit::FAILURE,
    }
}

/// Run the builder over the configured catalog manifest.
///
/// The extractor is loaded before the batch starts; failing to load it ends
/// the run without touching the index.
pub async fn run_build(
    settings: &Settings,
    loader: Arc<dyn BackendLoader>,
    batch_size: usize,
) -> Result<BuildReport> {
    let config = ExtractorConfig::from(&settings.extractor);
    let state = tokio::task::spawn_blocking(move || {
        FeatureExtractor::initialize(loader.as_ref(), config)
    })
    .await
    .context("Extractor initialization task failed")?;

    let catalog = ManifestCatalog::new(
        settings.catalog_manifest_path(),
        settings.media_root_path(),
    );
    info!(manifest = ?catalog.path(), "Building index from catalog manifest");

    let builder = IndexBuilder::from_state(&state, index_files(settings))
        .map_err(VisualMatchError::from)
        .context("Failed to load feature extractor")?
        .with_config(BuildConfig::default().with_batch_size(batch_size));

    let outcome =
        tokio::task::spawn_blocking(move || builder.run(&catalog, &LoggingProgressCallback))
            .await
            .context("Build task failed")?;

    match outcome {
        Ok(report) => Ok(report),
        Err(e) => {
            if let Some(report) = e.report() {
                print_build_report(report);
            }
            Err(VisualMatchError::from(e)).context("Index build failed")
        }
    }
}

/// Print the summary line and every item that was not extracted.
pub fn print_build_report(report: &BuildReport) {
    for item in report.not_extracted() {
        let image = item
            .image
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        let reason = match &item.outcome {
            vismatch_indexing::ItemOutcome::Failed(reason) => reason.as_str(),
            vismatch_indexing::ItemOutcome::SkippedMissingFile => "image file not found",
            vismatch_indexing::ItemOutcome::SkippedNoImage => "no image",
            vismatch_indexing::ItemOutcome::Extracted => continue,
        };
        println!("  item {} ({}): {}", item.id, image, reason);
    }
    println!("{}", report.summary());
}

/// JSON printed by `vismatch match`.
#[derive(Debug, Serialize)]
pub struct MatchOutput {
    pub match_found: bool,
    pub item_id: Option<CatalogItemId>,
    pub similarity_score: f32,
    pub message: String,
}

impl From<MatchResult> for MatchOutput {
    fn from(result: MatchResult) -> Self {
        Self {
            match_found: result.found,
            item_id: result.item_id,
            similarity_score: result.score,
            message: result.describe(),
        }
    }
}

/// Match one image file against the published index.
pub async fn run_match(
    settings: &Settings,
    loader: Arc<dyn BackendLoader>,
    image: &Path,
) -> Result<MatchOutput> {
    let service = VisualSearchService::start(ServiceConfig::from_settings(settings), loader)
        .await
        .context("Failed to start search service")?;
    let result = service
        .match_path(image)
        .await
        .with_context(|| format!("Failed to match {}", image.display()))?;
    Ok(MatchOutput::from(result))
}

/// Index and model cache state.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub vectors_path: PathBuf,
    pub ids_path: PathBuf,
    pub available: bool,
    pub vector_count: usize,
    pub dimension: usize,
    pub size_bytes: u64,
    pub error: Option<String>,
    pub model_repo: String,
    pub model_cached: bool,
}

pub fn run_status(settings: &Settings) -> StatusReport {
    let files = index_files(settings);
    let (stats, error) = match IndexStats::from_files(&files) {
        Ok(stats) => (stats, None),
        Err(e) => (IndexStats::default(), Some(VisualMatchError::from(e).to_string())),
    };
    let cache = ModelCache::new(settings.model_cache_path(), &settings.extractor.model_repo);

    StatusReport {
        vectors_path: files.vectors,
        ids_path: files.ids,
        available: stats.available,
        vector_count: stats.vector_count,
        dimension: stats.dimension,
        size_bytes: stats.size_bytes,
        error,
        model_repo: settings.extractor.model_repo.clone(),
        model_cached: cache.is_cached(),
    }
}

pub fn print_status(status: &StatusReport) {
    println!("Vectors file: {}", status.vectors_path.display());
    println!("Ids file:     {}", status.ids_path.display());
    match &status.error {
        Some(e) => println!("Index:        unreadable ({e})"),
        None if status.available => println!(
            "Index:        {} vectors, dimension {}, {} bytes",
            status.vector_count, status.dimension, status.size_bytes
        ),
        None => println!("Index:        not built (run `vismatch build`)"),
    }
    println!(
        "Model:        {} ({})",
        status.model_repo,
        if status.model_cached { "cached" } else { "not cached" }
    );
}
