//! Offline index builder.
//!
//! Walks the catalog once, extracts a vector for every item with a usable
//! image, and publishes the result as a new index pair. A failing item is
//! recorded and skipped; only a run where nothing could be extracted ends in
//! an error, and in that case the previously published pair is left alone.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use vismatch_embeddings::{ExtractorState, FeatureExtractor};
use vismatch_index::{EmbeddingIndex, IndexFiles};
use vismatch_types::{CatalogItemId, FeatureVector};

use crate::catalog::{CatalogItem, CatalogSource};
use crate::error::BuildError;

/// Configuration for a build run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Number of items to process between progress reports.
    pub batch_size: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

impl BuildConfig {
    /// Set the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }
}

/// What happened to one catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ItemOutcome {
    Extracted,
    /// Catalog entry has no image reference
    SkippedNoImage,
    /// Image reference points at a file that does not exist
    SkippedMissingFile,
    /// Decode or inference failed
    Failed(String),
}

impl ItemOutcome {
    /// Counted against the "failed" total of the summary.
    pub fn is_failure(&self) -> bool {
        matches!(self, ItemOutcome::SkippedMissingFile | ItemOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub id: CatalogItemId,
    pub image: Option<PathBuf>,
    pub outcome: ItemOutcome,
}

/// Running counters, handed to the [`ProgressCallback`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildProgress {
    /// Total items processed.
    pub total_processed: u64,
    pub extracted: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Whether the batch has been walked to the end.
    pub completed: bool,
}

impl BuildProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Extracted => self.extracted += 1,
            ItemOutcome::SkippedNoImage => self.skipped += 1,
            ItemOutcome::SkippedMissingFile | ItemOutcome::Failed(_) => self.failed += 1,
        }
        self.total_processed += 1;
    }

    fn mark_completed(&mut self) {
        self.completed = true;
    }
}

/// Trait for receiving build progress updates.
pub trait ProgressCallback: Send {
    /// Called after each batch of items is processed.
    fn on_progress(&self, progress: &BuildProgress);
}

/// A no-op progress callback for when progress reporting isn't needed.
pub struct NoOpProgressCallback;

impl ProgressCallback for NoOpProgressCallback {
    fn on_progress(&self, _progress: &BuildProgress) {}
}

/// A callback that logs progress at info level.
pub struct LoggingProgressCallback;

impl ProgressCallback for LoggingProgressCallback {
    fn on_progress(&self, progress: &BuildProgress) {
        info!(
            total = progress.total_processed,
            extracted = progress.extracted,
            skipped = progress.skipped,
            failed = progress.failed,
            completed = progress.completed,
            "Build progress"
        );
    }
}

/// Result of a build run.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub items: Vec<ItemReport>,
    pub progress: BuildProgress,
    /// Dimensionality of the published vectors (0 when nothing was extracted)
    pub dimension: usize,
    pub published: bool,
    pub elapsed_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl BuildReport {
    pub fn extracted(&self) -> u64 {
        self.progress.extracted
    }

    /// Items that referenced an image but produced no vector.
    pub fn failed(&self) -> u64 {
        self.progress.failed
    }

    /// Every item that was not extracted, with its outcome.
    pub fn not_extracted(&self) -> impl Iterator<Item = &ItemReport> {
        self.items
            .iter()
            .filter(|item| item.outcome != ItemOutcome::Extracted)
    }

    /// "<n> images processed successfully, <m> failed"
    pub fn summary(&self) -> String {
        format!(
            "{} images processed successfully, {} failed",
            self.extracted(),
            self.failed()
        )
    }
}

/// Builds and publishes the embedding index.
pub struct IndexBuilder {
    extractor: Arc<FeatureExtractor>,
    files: IndexFiles,
    config: BuildConfig,
}

impl IndexBuilder {
    pub fn new(extractor: Arc<FeatureExtractor>, files: IndexFiles) -> Self {
        Self {
            extractor,
            files,
            config: BuildConfig::default(),
        }
    }

    /// Builder over an initialized extractor; fails before any item is read
    /// when initialization did not succeed.
    pub fn from_state(state: &ExtractorState, files: IndexFiles) -> Result<Self, BuildError> {
        Ok(Self::new(state.extractor()?, files))
    }

    pub fn with_config(mut self, config: BuildConfig) -> Self {
        self.config = config;
        self
    }

    pub fn files(&self) -> &IndexFiles {
        &self.files
    }

    /// Run the batch and publish when at least one item was extracted.
    pub fn run<P: ProgressCallback>(
        &self,
        catalog: &dyn CatalogSource,
        progress_callback: &P,
    ) -> Result<BuildReport, BuildError> {
        let started = Instant::now();
        let items = catalog.items()?;
        info!(count = items.len(), path = ?self.files.vectors, "Starting index build...");

        let mut progress = BuildProgress::new();
        let mut reports = Vec::with_capacity(items.len());
        let mut ids = Vec::new();
        let mut vectors: Vec<FeatureVector> = Vec::new();
        let mut seen = HashSet::new();

        for item in items {
            let outcome = if seen.insert(item.id) {
                match self.extract_item(&item) {
                    Ok(vector) => {
                        ids.push(item.id);
                        vectors.push(vector);
                        ItemOutcome::Extracted
                    }
                    Err(outcome) => outcome,
                }
            } else {
                ItemOutcome::Failed("duplicate catalog id".to_string())
            };

            match &outcome {
                ItemOutcome::Extracted => debug!(id = %item.id, "Extracted"),
                ItemOutcome::SkippedNoImage => debug!(id = %item.id, "No image, skipping"),
                ItemOutcome::SkippedMissingFile => {
                    warn!(id = %item.id, image = ?item.image, "Image not found, skipping")
                }
                ItemOutcome::Failed(reason) => {
                    warn!(id = %item.id, image = ?item.image, error = %reason, "Failed to process image")
                }
            }

            progress.record(&outcome);
            reports.push(ItemReport {
                id: item.id,
                image: item.image,
                outcome,
            });

            if progress
                .total_processed
                .is_multiple_of(self.config.batch_size as u64)
            {
                progress_callback.on_progress(&progress);
            }
        }
        progress.mark_completed();
        progress_callback.on_progress(&progress);

        let mut report = BuildReport {
            items: reports,
            progress,
            dimension: self.extractor.config().dimension,
            published: false,
            elapsed_ms: 0,
            finished_at: Utc::now(),
        };

        if vectors.is_empty() {
            report.dimension = 0;
            report.elapsed_ms = started.elapsed().as_millis() as u64;
            warn!(
                items = report.items.len(),
                "No embeddings generated; previous index left in place"
            );
            return Err(BuildError::NothingExtracted {
                report: Box::new(report),
            });
        }

        let index = EmbeddingIndex::with_dimension(report.dimension, ids, vectors)?;
        index.save(&self.files)?;

        report.published = true;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        report.finished_at = Utc::now();
        info!(
            extracted = report.extracted(),
            failed = report.failed(),
            skipped = report.progress.skipped,
            elapsed_ms = report.elapsed_ms,
            "Index build complete"
        );
        Ok(report)
    }

    fn extract_item(&self, item: &CatalogItem) -> Result<FeatureVector, ItemOutcome> {
        let Some(path) = &item.image else {
            return Err(ItemOutcome::SkippedNoImage);
        };
        if !path.is_file() {
            return Err(ItemOutcome::SkippedMissingFile);
        }
        self.extractor
            .extract_path(path)
            .map_err(|e| ItemOutcome::Failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use vismatch_embeddings::{BackendInfo, ExtractError, ExtractorConfig, ImageBackend};

    struct MeanColor(BackendInfo);

    impl ImageBackend for MeanColor {
        fn info(&self) -> &BackendInfo {
            &self.0
        }

        fn embed(&self, image: &RgbImage) -> Result<Vec<f32>, ExtractError> {
            let p = image.get_pixel(0, 0);
            Ok(p.0.iter().map(|c| f32::from(*c)).collect())
        }
    }

    fn extractor() -> Arc<FeatureExtractor> {
        let backend = MeanColor(BackendInfo {
            name: "mean-color".to_string(),
            dimension: 3,
            input_size: 4,
        });
        Arc::new(FeatureExtractor::new(
            Arc::new(backend),
            ExtractorConfig {
                dimension: 3,
                input_size: 4,
            },
        ))
    }

    fn write_png(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(6, 6, Rgb(color)).save(path).unwrap();
    }

    struct Recorder(Mutex<Vec<BuildProgress>>);

    impl ProgressCallback for Recorder {
        fn on_progress(&self, progress: &BuildProgress) {
            self.0.lock().unwrap().push(progress.clone());
        }
    }

    fn catalog(dir: &Path, n: i64) -> Vec<CatalogItem> {
        (1..=n)
            .map(|id| {
                let path = dir.join(format!("{id}.png"));
                write_png(&path, [id as u8 * 20, 100, 50]);
                CatalogItem::new(id, Some(path))
            })
            .collect()
    }

    #[test]
    fn test_build_publishes_all() {
        let temp = TempDir::new().unwrap();
        let files = IndexFiles::in_dir(temp.path().join("index"));
        let items = catalog(temp.path(), 4);

        let report = IndexBuilder::new(extractor(), files.clone())
            .run(&items, &NoOpProgressCallback)
            .unwrap();
        assert!(report.published);
        assert_eq!(report.extracted(), 4);
        assert_eq!(report.summary(), "4 images processed successfully, 0 failed");

        let index = EmbeddingIndex::load(&files).unwrap();
        assert_eq!(index.size(), 4);
        assert_eq!(index.dimension(), 3);
        assert_eq!(index.ids()[2], CatalogItemId::new(3));
    }

    #[test]
    fn test_unavailable_extractor_fails_before_build() {
        let temp = TempDir::new().unwrap();
        let files = IndexFiles::in_dir(temp.path().join("index"));
        let state = ExtractorState::Unavailable("model.safetensors not found".to_string());

        let err = IndexBuilder::from_state(&state, files.clone()).err().unwrap();
        assert!(matches!(err, BuildError::Extractor(ExtractError::Unavailable(_))));
        assert!(!files.vectors.exists());

        let ready = ExtractorState::Ready(extractor());
        let report = IndexBuilder::from_state(&ready, files.clone())
            .unwrap()
            .run(&catalog(temp.path(), 2), &NoOpProgressCallback)
            .unwrap();
        assert_eq!(report.extracted(), 2);
    }

    #[test]
    fn test_failing_item_is_skipped() {
        let temp = TempDir::new().unwrap();
        let files = IndexFiles::in_dir(temp.path().join("index"));
        let items = catalog(temp.path(), 5);
        std::fs::write(items[2].image.as_ref().unwrap(), b"corrupted").unwrap();

        let report = IndexBuilder::new(extractor(), files.clone())
            .run(&items, &NoOpProgressCallback)
            .unwrap();
        assert_eq!(report.extracted(), 4);
        assert_eq!(report.failed(), 1);

        let failed: Vec<_> = report.not_extracted().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, CatalogItemId::new(3));
        assert!(matches!(failed[0].outcome, ItemOutcome::Failed(_)));

        let index = EmbeddingIndex::load(&files).unwrap();
        let ids: Vec<i64> = index.ids().iter().map(|id| id.get()).collect();
        assert_eq!(ids, vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_skips_are_classified() {
        let temp = TempDir::new().unwrap();
        let files = IndexFiles::in_dir(temp.path().join("index"));
        let mut items = catalog(temp.path(), 2);
        items.push(CatalogItem::new(3, None));
        items.push(CatalogItem::new(4, Some(temp.path().join("gone.png"))));
        items.push(CatalogItem::new(1, items[0].image.clone()));

        let report = IndexBuilder::new(extractor(), files)
            .run(&items, &NoOpProgressCallback)
            .unwrap();
        let outcomes: Vec<_> = report.items.iter().map(|i| i.outcome.clone()).collect();
        assert_eq!(outcomes[2], ItemOutcome::SkippedNoImage);
        assert_eq!(outcomes[3], ItemOutcome::SkippedMissingFile);
        assert!(matches!(outcomes[4], ItemOutcome::Failed(_)));
        assert_eq!(report.progress.skipped, 1);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.summary(), "2 images processed successfully, 2 failed");
    }

    #[test]
    fn test_nothing_extracted_keeps_previous_index() {
        let temp = TempDir::new().unwrap();
        let files = IndexFiles::in_dir(temp.path().join("index"));
        let items = catalog(temp.path(), 3);
        IndexBuilder::new(extractor(), files.clone())
            .run(&items, &NoOpProgressCallback)
            .unwrap();
        let vectors_before = std::fs::read(&files.vectors).unwrap();
        let ids_before = std::fs::read(&files.ids).unwrap();

        for item in &items {
            std::fs::write(item.image.as_ref().unwrap(), b"not an image").unwrap();
        }
        let err = IndexBuilder::new(extractor(), files.clone())
            .run(&items, &NoOpProgressCallback)
            .unwrap_err();
        let report = err.report().unwrap();
        assert!(!report.published);
        assert_eq!(report.failed(), 3);

        assert_eq!(std::fs::read(&files.vectors).unwrap(), vectors_before);
        assert_eq!(std::fs::read(&files.ids).unwrap(), ids_before);
    }

    #[test]
    fn test_empty_catalog_is_an_error() {
        let temp = TempDir::new().unwrap();
        let files = IndexFiles::in_dir(temp.path());
        let err = IndexBuilder::new(extractor(), files.clone())
            .run(&Vec::<CatalogItem>::new(), &NoOpProgressCallback)
            .unwrap_err();
        assert!(matches!(err, BuildError::NothingExtracted { .. }));
        assert!(!files.vectors.exists() && !files.ids.exists());
    }

    #[test]
    fn test_progress_reported_per_batch() {
        let temp = TempDir::new().unwrap();
        let files = IndexFiles::in_dir(temp.path().join("index"));
        let items = catalog(temp.path(), 5);
        let recorder = Recorder(Mutex::new(Vec::new()));

        IndexBuilder::new(extractor(), files)
            .with_config(BuildConfig::default().with_batch_size(2))
            .run(&items, &recorder)
            .unwrap();

        let calls = recorder.0.into_inner().unwrap();
        let totals: Vec<u64> = calls.iter().map(|p| p.total_processed).collect();
        assert_eq!(totals, vec![2, 4, 5]);
        assert!(calls.last().unwrap().completed);
    }
}
