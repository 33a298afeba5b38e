//! Query service.
//!
//! Owns the process-wide state a query needs: the lazily loaded index, the
//! extractor capability decided once at start, and the staging area for
//! uploads. Request handlers share one `VisualSearchService` behind an `Arc`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::io::AsyncRead;
use tracing::{debug, info, warn};
use vismatch_embeddings::{
    BackendLoader, ExtractError, ExtractorConfig, ExtractorState, FeatureExtractor, StagedImage,
    Stager,
};
use vismatch_index::{EmbeddingIndex, IndexCell, IndexFiles, IndexLoadState};
use vismatch_types::{MatchResult, Settings, VisualMatchError};

use crate::matcher::Matcher;

/// Serving parameters
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub files: IndexFiles,
    pub threshold: f32,
    pub parallel_scan_min: usize,
    pub max_image_bytes: u64,
    /// Where uploads are staged; the system temp dir when `None`
    pub staging_dir: Option<PathBuf>,
    pub extractor: ExtractorConfig,
}

impl ServiceConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            files: IndexFiles::new(settings.vectors_path(), settings.ids_path()),
            threshold: settings.match_threshold,
            parallel_scan_min: settings.parallel_scan_min,
            max_image_bytes: settings.max_image_bytes,
            staging_dir: None,
            extractor: ExtractorConfig::from(&settings.extractor),
        }
    }
}

/// Point-in-time view of the service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    /// "not_loaded", "loaded" or "failed"
    pub index_state: &'static str,
    pub vector_count: Option<usize>,
    pub dimension: Option<usize>,
    pub index_error: Option<String>,
    pub extractor_available: bool,
    pub extractor_error: Option<String>,
    pub threshold: f32,
}

/// Visual query entry point.
pub struct VisualSearchService {
    index: IndexCell,
    loader: Arc<dyn BackendLoader>,
    extractor: RwLock<ExtractorState>,
    matcher: Matcher,
    stager: Stager,
    extractor_config: ExtractorConfig,
}

impl VisualSearchService {
    /// Build the service, running the extractor capability check on the
    /// current thread.
    pub fn new(config: ServiceConfig, loader: Arc<dyn BackendLoader>) -> Self {
        let state = FeatureExtractor::initialize(loader.as_ref(), config.extractor);
        Self::with_state(config, loader, state, None)
    }

    /// Build the service with the capability check on the blocking pool.
    pub async fn start(
        config: ServiceConfig,
        loader: Arc<dyn BackendLoader>,
    ) -> Result<Self, VisualMatchError> {
        let state = initialize_blocking(loader.clone(), config.extractor).await?;
        Ok(Self::with_state(config, loader, state, None))
    }

    /// Serve an index that is already in memory.
    pub fn with_index(
        config: ServiceConfig,
        loader: Arc<dyn BackendLoader>,
        index: EmbeddingIndex,
    ) -> Self {
        let state = FeatureExtractor::initialize(loader.as_ref(), config.extractor);
        Self::with_state(config, loader, state, Some(index))
    }

    fn with_state(
        config: ServiceConfig,
        loader: Arc<dyn BackendLoader>,
        state: ExtractorState,
        index: Option<EmbeddingIndex>,
    ) -> Self {
        let index = match index {
            Some(index) => IndexCell::preloaded(config.files.clone(), index),
            None => IndexCell::new(config.files.clone()),
        };
        let stager = match config.staging_dir {
            Some(dir) => Stager::in_dir(dir, config.max_image_bytes),
            None => Stager::new(config.max_image_bytes),
        };
        info!(
            threshold = config.threshold,
            extractor_ready = state.is_ready(),
            path = ?config.files.vectors,
            "Visual search service created"
        );
        Self {
            index,
            loader,
            extractor: RwLock::new(state),
            matcher: Matcher::new(config.threshold)
                .with_parallel_scan_min(config.parallel_scan_min),
            stager,
            extractor_config: config.extractor,
        }
    }

    pub fn index(&self) -> &IndexCell {
        &self.index
    }

    pub fn threshold(&self) -> f32 {
        self.matcher.threshold()
    }

    /// Match an in-memory upload.
    pub async fn match_bytes(&self, bytes: &[u8]) -> Result<MatchResult, VisualMatchError> {
        let extractor = self.extractor()?;
        let index = self.index.get().await?;
        let staged = self.stager.stage_bytes(bytes)?;
        self.run(extractor, index, staged).await
    }

    /// Match an upload streamed from `reader`.
    pub async fn match_reader<R>(&self, reader: R) -> Result<MatchResult, VisualMatchError>
    where
        R: AsyncRead + Unpin,
    {
        let extractor = self.extractor()?;
        let index = self.index.get().await?;
        let staged = self.stager.stage_reader(reader).await?;
        self.run(extractor, index, staged).await
    }

    /// Match an image file on disk.
    pub async fn match_path(&self, path: &Path) -> Result<MatchResult, VisualMatchError> {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            VisualMatchError::UnreadableImage(format!("{}: {e}", path.display()))
        })?;
        self.match_reader(file).await
    }

    /// Clear cached failures: re-run the extractor capability check and
    /// load the index again.
    pub async fn reload(&self) -> ServiceStatus {
        match initialize_blocking(self.loader.clone(), self.extractor_config).await {
            Ok(state) => {
                *self
                    .extractor
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = state;
            }
            Err(e) => warn!(error = %e, "Extractor reload task failed"),
        }
        if let Err(e) = self.index.reload().await {
            warn!(error = %e, "Index reload failed");
        }
        self.status()
    }

    pub fn status(&self) -> ServiceStatus {
        let index_state = self.index.state();
        let (vector_count, dimension, index_error) = match &index_state {
            IndexLoadState::Loaded(index) => (Some(index.size()), Some(index.dimension()), None),
            IndexLoadState::NotLoaded => (None, None, None),
            IndexLoadState::FailedPermanently(e) => (None, None, Some(e.to_string())),
        };
        let extractor = self
            .extractor
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let extractor_error = match &*extractor {
            ExtractorState::Ready(_) => None,
            ExtractorState::Unavailable(reason) => Some(reason.clone()),
        };
        ServiceStatus {
            index_state: index_state.as_str(),
            vector_count,
            dimension,
            index_error,
            extractor_available: extractor.is_ready(),
            extractor_error,
            threshold: self.matcher.threshold(),
        }
    }

    fn extractor(&self) -> Result<Arc<FeatureExtractor>, VisualMatchError> {
        let state = self
            .extractor
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(state.extractor()?)
    }

    /// Extract and scan on the blocking pool.
    ///
    /// The staged file moves into the task and is removed when the task
    /// ends, even if the calling future has been dropped by then.
    async fn run(
        &self,
        extractor: Arc<FeatureExtractor>,
        index: Arc<EmbeddingIndex>,
        staged: StagedImage,
    ) -> Result<MatchResult, VisualMatchError> {
        let matcher = self.matcher;
        let task = tokio::task::spawn_blocking(move || -> Result<MatchResult, VisualMatchError> {
            let bytes = staged.read_bytes()?;
            let query = extractor.extract(&bytes)?;
            drop(staged);
            Ok(matcher.match_query(&query, &index)?)
        });

        let result = task
            .await
            .map_err(|e| VisualMatchError::Io(format!("query task failed: {e}")))?;
        match &result {
            Ok(m) => debug!(found = m.found, score = m.score, "Query complete"),
            Err(e) if e.is_request_local() => debug!(error = %e, "Query rejected"),
            Err(e) => warn!(error = %e, "Query failed"),
        }
        result
    }
}

async fn initialize_blocking(
    loader: Arc<dyn BackendLoader>,
    config: ExtractorConfig,
) -> Result<ExtractorState, VisualMatchError> {
    tokio::task::spawn_blocking(move || FeatureExtractor::initialize(loader.as_ref(), config))
        .await
        .map_err(|e| {
            VisualMatchError::from(ExtractError::Unavailable(format!(
                "initialization task failed: {e}"
            )))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use vismatch_embeddings::{BackendInfo, ImageBackend};
    use vismatch_types::{CatalogItemId, ErrorKind, FeatureVector};

    /// Mean colour of the image as a 3-d vector.
    struct MeanColor(BackendInfo);

    impl MeanColor {
        fn new() -> Self {
            Self(BackendInfo {
                name: "mean-color".to_string(),
                dimension: 3,
                input_size: 4,
            })
        }
    }

    impl ImageBackend for MeanColor {
        fn info(&self) -> &BackendInfo {
            &self.0
        }

        fn embed(&self, image: &RgbImage) -> Result<Vec<f32>, ExtractError> {
            let n = (image.width() * image.height()) as f32;
            let mut v = vec![0f32; 3];
            for p in image.pixels() {
                for (acc, c) in v.iter_mut().zip(p.0) {
                    *acc += f32::from(c) / n;
                }
            }
            Ok(v)
        }
    }

    fn ready_loader() -> Arc<dyn BackendLoader> {
        Arc::new(|| -> Result<Arc<dyn ImageBackend>, ExtractError> { Ok(Arc::new(MeanColor::new())) })
    }

    fn png(color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(10, 10, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn config(dir: &Path) -> ServiceConfig {
        ServiceConfig {
            files: IndexFiles::in_dir(dir),
            threshold: 0.70,
            parallel_scan_min: 4096,
            max_image_bytes: 1 << 20,
            staging_dir: Some(dir.join("staging")),
            extractor: ExtractorConfig {
                dimension: 3,
                input_size: 4,
            },
        }
    }

    fn palette_index() -> EmbeddingIndex {
        EmbeddingIndex::new(
            vec![CatalogItemId::new(1), CatalogItemId::new(2)],
            vec![
                FeatureVector::new(vec![255.0, 0.0, 0.0]),
                FeatureVector::new(vec![0.0, 0.0, 255.0]),
            ],
        )
        .unwrap()
    }

    fn setup() -> (TempDir, ServiceConfig) {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("staging")).unwrap();
        let config = config(temp.path());
        (temp, config)
    }

    fn staging_is_empty(config: &ServiceConfig) -> bool {
        let dir = config.staging_dir.as_ref().unwrap();
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_match_hit_and_miss() {
        let (_temp, config) = setup();
        palette_index().save(&config.files).unwrap();
        let service = VisualSearchService::start(config.clone(), ready_loader())
            .await
            .unwrap();

        let hit = service.match_bytes(&png([250, 10, 0])).await.unwrap();
        assert!(hit.found);
        assert_eq!(hit.item_id, Some(CatalogItemId::new(1)));

        let miss = service.match_bytes(&png([0, 255, 0])).await.unwrap();
        assert!(!miss.found);
        assert_eq!(miss.score, 0.0);

        assert!(staging_is_empty(&config));
        assert_eq!(service.index().physical_loads(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_image_is_request_local() {
        let (_temp, config) = setup();
        let service = VisualSearchService::with_index(config.clone(), ready_loader(), palette_index());

        let err = service.match_bytes(b"definitely not an image").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnreadableImage);
        assert!(staging_is_empty(&config));

        // Index state is untouched; the next request succeeds
        assert!(service.match_bytes(&png([0, 0, 200])).await.unwrap().found);
        assert_eq!(service.status().index_state, "loaded");
    }

    #[tokio::test]
    async fn test_missing_index_reports_unavailable() {
        let (_temp, config) = setup();
        let service = VisualSearchService::new(config.clone(), ready_loader());

        let err = service.match_bytes(&png([1, 2, 3])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexMissing);
        let status = service.status();
        assert_eq!(status.index_state, "failed");
        assert!(status.index_error.is_some());

        palette_index().save(&config.files).unwrap();
        let status = service.reload().await;
        assert_eq!(status.index_state, "loaded");
        assert_eq!(status.vector_count, Some(2));
        assert!(service.match_bytes(&png([255, 0, 0])).await.unwrap().found);
    }

    #[tokio::test]
    async fn test_extractor_unavailable_is_cached_until_reload() {
        let (_temp, config) = setup();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let loader: Arc<dyn BackendLoader> =
            Arc::new(move || -> Result<Arc<dyn ImageBackend>, ExtractError> {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ExtractError::ModelNotFound("weights".to_string()))
                } else {
                    Ok(Arc::new(MeanColor::new()))
                }
            });

        let service = VisualSearchService::with_index(config, loader, palette_index());
        for _ in 0..3 {
            let err = service.match_bytes(&png([255, 0, 0])).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ExtractorUnavailable);
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!service.status().extractor_available);

        let status = service.reload().await;
        assert!(status.extractor_available);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_match_path_and_missing_file() {
        let (temp, config) = setup();
        let service = VisualSearchService::with_index(config.clone(), ready_loader(), palette_index());

        let path = temp.path().join("query.png");
        std::fs::write(&path, png([0, 0, 255])).unwrap();
        let result = service.match_path(&path).await.unwrap();
        assert_eq!(result.item_id, Some(CatalogItemId::new(2)));

        let err = service.match_path(&temp.path().join("nope.png")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnreadableImage);
        assert!(staging_is_empty(&config));
    }

    #[tokio::test]
    async fn test_status_serializes() {
        let (_temp, config) = setup();
        let service = VisualSearchService::new(config, ready_loader());
        let json = serde_json::to_value(service.status()).unwrap();
        assert_eq!(json["index_state"], "not_loaded");
        assert_eq!(json["extractor_available"], true);
    }
}
