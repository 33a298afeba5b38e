//! Load-once holder for the served index.
//!
//! The first caller of [`IndexCell::get`] reads the pair from disk on the
//! blocking pool; concurrent first callers wait on the same load instead of
//! starting their own. The outcome is cached either way: a failure stays
//! `FailedPermanently` for every later request until [`IndexCell::reload`]
//! starts a fresh generation.
//!
//! The current generation sits behind an [`ArcSwap`], so once an index is
//! published a request reaches it without taking a lock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use vismatch_types::VisualMatchError;

use crate::codec::IndexFiles;
use crate::index::EmbeddingIndex;

type LoadOutcome = Result<Arc<EmbeddingIndex>, VisualMatchError>;

/// Snapshot of the served index.
#[derive(Debug, Clone)]
pub enum IndexLoadState {
    /// No load attempted in the current generation
    NotLoaded,
    /// Index is resident
    Loaded(Arc<EmbeddingIndex>),
    /// Load failed; cached until an explicit reload
    FailedPermanently(VisualMatchError),
}

impl IndexLoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexLoadState::NotLoaded => "not_loaded",
            IndexLoadState::Loaded(_) => "loaded",
            IndexLoadState::FailedPermanently(_) => "failed",
        }
    }
}

/// Guarded lazy holder of the embedding index.
pub struct IndexCell {
    files: IndexFiles,
    generation: ArcSwap<OnceCell<LoadOutcome>>,
    physical_loads: AtomicUsize,
}

impl IndexCell {
    pub fn new(files: IndexFiles) -> Self {
        Self {
            files,
            generation: ArcSwap::from_pointee(OnceCell::new()),
            physical_loads: AtomicUsize::new(0),
        }
    }

    /// Cell that is already loaded with `index` (no file access).
    pub fn preloaded(files: IndexFiles, index: EmbeddingIndex) -> Self {
        let cell = OnceCell::new_with(Some(Ok(Arc::new(index))));
        Self {
            files,
            generation: ArcSwap::from_pointee(cell),
            physical_loads: AtomicUsize::new(0),
        }
    }

    pub fn files(&self) -> &IndexFiles {
        &self.files
    }

    /// Get the index, loading it on first use.
    ///
    /// Returns the cached failure without touching the filesystem when a
    /// previous load in this generation failed.
    pub async fn get(&self) -> Result<Arc<EmbeddingIndex>, VisualMatchError> {
        let generation = self.current();
        generation.get_or_init(|| self.load()).await.clone()
    }

    /// Discard the cached outcome and load again.
    ///
    /// Requests holding the previous index keep using it until they finish.
    pub async fn reload(&self) -> Result<Arc<EmbeddingIndex>, VisualMatchError> {
        let fresh = Arc::new(OnceCell::new());
        self.generation.store(fresh.clone());
        info!(path = ?self.files.vectors, "Reloading embedding index");
        fresh.get_or_init(|| self.load()).await.clone()
    }

    pub fn state(&self) -> IndexLoadState {
        match self.generation.load().get() {
            None => IndexLoadState::NotLoaded,
            Some(Ok(index)) => IndexLoadState::Loaded(index.clone()),
            Some(Err(e)) => IndexLoadState::FailedPermanently(e.clone()),
        }
    }

    /// Number of times the files were actually read.
    pub fn physical_loads(&self) -> usize {
        self.physical_loads.load(Ordering::SeqCst)
    }

    fn current(&self) -> Arc<OnceCell<LoadOutcome>> {
        self.generation.load_full()
    }

    async fn load(&self) -> LoadOutcome {
        self.physical_loads.fetch_add(1, Ordering::SeqCst);
        let files = self.files.clone();

        let outcome = match tokio::task::spawn_blocking(move || EmbeddingIndex::load(&files)).await
        {
            Ok(Ok(index)) => Ok(Arc::new(index)),
            Ok(Err(e)) => Err(VisualMatchError::from(e)),
            Err(e) => Err(VisualMatchError::Io(format!("index load task failed: {e}"))),
        };

        if let Err(e) = &outcome {
            warn!(
                error = %e,
                kind = e.kind().as_str(),
                "Embedding index unavailable; cached until reload"
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vismatch_types::{CatalogItemId, ErrorKind, FeatureVector};

    fn write_sample(files: &IndexFiles, n: usize) {
        let ids = (0..n as i64).map(CatalogItemId::new).collect::<Vec<_>>();
        let vectors = (0..n)
            .map(|i| FeatureVector::new(vec![i as f32, 1.0, 2.0]))
            .collect();
        EmbeddingIndex::new(ids, vectors).unwrap().save(files).unwrap();
    }

    #[tokio::test]
    async fn test_load_on_first_use() {
        let temp = TempDir::new().unwrap();
        let files = IndexFiles::in_dir(temp.path());
        write_sample(&files, 3);

        let cell = IndexCell::new(files);
        assert!(matches!(cell.state(), IndexLoadState::NotLoaded));

        let index = cell.get().await.unwrap();
        assert_eq!(index.size(), 3);
        assert!(matches!(cell.state(), IndexLoadState::Loaded(_)));

        cell.get().await.unwrap();
        assert_eq!(cell.physical_loads(), 1);
    }

    #[tokio::test]
    async fn test_missing_index_is_cached_until_reload() {
        let temp = TempDir::new().unwrap();
        let files = IndexFiles::in_dir(temp.path());
        let cell = IndexCell::new(files.clone());

        let err = cell.get().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexMissing);

        // Builder runs later; the cached failure is not retried per request
        write_sample(&files, 2);
        let err = cell.get().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexMissing);
        assert_eq!(cell.physical_loads(), 1);
        assert!(matches!(cell.state(), IndexLoadState::FailedPermanently(_)));

        let index = cell.reload().await.unwrap();
        assert_eq!(index.size(), 2);
        assert_eq!(cell.physical_loads(), 2);
        assert!(matches!(cell.state(), IndexLoadState::Loaded(_)));
    }

    #[tokio::test]
    async fn test_corrupt_index_is_cached() {
        let temp = TempDir::new().unwrap();
        let files = IndexFiles::in_dir(temp.path());
        std::fs::write(&files.vectors, b"junk").unwrap();
        std::fs::write(&files.ids, b"junk").unwrap();

        let cell = IndexCell::new(files);
        assert_eq!(cell.get().await.unwrap_err().kind(), ErrorKind::CorruptData);
        assert_eq!(cell.get().await.unwrap_err().kind(), ErrorKind::CorruptData);
        assert_eq!(cell.physical_loads(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_loads_once() {
        let temp = TempDir::new().unwrap();
        let files = IndexFiles::in_dir(temp.path());
        write_sample(&files, 64);

        let cell = Arc::new(IndexCell::new(files));
        let tasks = (0..32).map(|_| {
            let cell = cell.clone();
            tokio::spawn(async move { cell.get().await })
        });
        let results = futures::future::join_all(tasks).await;

        let indexes: Vec<Arc<EmbeddingIndex>> = results
            .into_iter()
            .map(|r| r.unwrap().unwrap())
            .collect();
        assert_eq!(cell.physical_loads(), 1);
        assert!(indexes.iter().all(|i| Arc::ptr_eq(i, &indexes[0])));
    }

    #[tokio::test]
    async fn test_reload_keeps_old_index_alive_for_holders() {
        let temp = TempDir::new().unwrap();
        let files = IndexFiles::in_dir(temp.path());
        write_sample(&files, 2);

        let cell = IndexCell::new(files.clone());
        let before = cell.get().await.unwrap();

        write_sample(&files, 5);
        let after = cell.reload().await.unwrap();

        assert_eq!(before.size(), 2);
        assert_eq!(after.size(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_during_reloads_always_see_an_index() {
        let temp = TempDir::new().unwrap();
        let files = IndexFiles::in_dir(temp.path());
        write_sample(&files, 4);

        let cell = Arc::new(IndexCell::new(files));
        cell.get().await.unwrap();

        let readers = (0..8).map(|_| {
            let cell = cell.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    assert_eq!(cell.get().await.unwrap().size(), 4);
                    assert!(!matches!(cell.state(), IndexLoadState::FailedPermanently(_)));
                    tokio::task::yield_now().await;
                }
            })
        });
        for _ in 0..10 {
            cell.reload().await.unwrap();
        }
        for reader in futures::future::join_all(readers).await {
            reader.unwrap();
        }
        assert!(matches!(cell.state(), IndexLoadState::Loaded(_)));
    }

    #[tokio::test]
    async fn test_preloaded_cell_skips_disk() {
        let temp = TempDir::new().unwrap();
        let files = IndexFiles::in_dir(temp.path());
        let index = EmbeddingIndex::new(
            vec![CatalogItemId::new(1)],
            vec![FeatureVector::new(vec![1.0])],
        )
        .unwrap();

        let cell = IndexCell::preloaded(files, index);
        assert_eq!(cell.get().await.unwrap().size(), 1);
        assert_eq!(cell.physical_loads(), 0);
    }
}
