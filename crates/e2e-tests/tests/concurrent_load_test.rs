//! Concurrent first-use E2E tests for vismatch.
//!
//! Many simultaneous first queries share a single physical index load.

use std::sync::Arc;

use futures::future::join_all;
use pretty_assertions::assert_eq;

use e2e_tests::{color_loader, distinct_colors, png_bytes, random_entries, TestHarness};
use vismatch_index::{EmbeddingIndex, IndexCell};
use vismatch_indexing::{IndexBuilder, NoOpProgressCallback};
use vismatch_search::VisualSearchService;
use vismatch_types::CatalogItemId;

const CONCURRENT_QUERIES: usize = 32;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_queries_load_once() {
    // 1. Publish an index of three products
    let harness = TestHarness::new();
    let colors = distinct_colors(3);
    let items = harness.write_catalog(&colors);
    IndexBuilder::new(e2e_tests::test_extractor(), harness.files.clone())
        .run(&items, &NoOpProgressCallback)
        .unwrap();

    // 2. Fire the first queries all at once
    let service = Arc::new(
        VisualSearchService::start(harness.service_config(0.70), color_loader())
            .await
            .unwrap(),
    );
    assert_eq!(service.index().physical_loads(), 0);

    let tasks = (0..CONCURRENT_QUERIES).map(|i| {
        let service = service.clone();
        let color = colors[i % colors.len()];
        tokio::spawn(async move { (i, service.match_bytes(&png_bytes(color)).await) })
    });

    // 3. Every query answered correctly
    for joined in join_all(tasks).await {
        let (i, result) = joined.unwrap();
        let result = result.unwrap();
        let expected = CatalogItemId::new((i % colors.len()) as i64 + 1);
        assert_eq!(result.item_id, Some(expected));
    }

    // 4. One physical load, nothing left staged
    assert_eq!(service.index().physical_loads(), 1);
    assert_eq!(harness.staged_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_cell_access_shares_instance() {
    let harness = TestHarness::new();
    let mut rng = rand::rng();
    let (ids, vectors) = random_entries(&mut rng, 500, 64);
    EmbeddingIndex::new(ids, vectors)
        .unwrap()
        .save(&harness.files)
        .unwrap();

    let cell = Arc::new(IndexCell::new(harness.files.clone()));
    let tasks = (0..CONCURRENT_QUERIES).map(|_| {
        let cell = cell.clone();
        tokio::spawn(async move { cell.get().await })
    });
    let loaded: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(cell.physical_loads(), 1);
    assert!(loaded.iter().all(|index| Arc::ptr_eq(index, &loaded[0])));
    assert_eq!(loaded[0].size(), 500);
    assert_eq!(loaded[0].dimension(), 64);
}

/// Concurrent first callers against a missing index all see the same
/// cached failure.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_queries_share_failure() {
    let harness = TestHarness::new();
    let service = Arc::new(VisualSearchService::new(
        harness.service_config(0.70),
        color_loader(),
    ));

    let tasks = (0..CONCURRENT_QUERIES).map(|_| {
        let service = service.clone();
        tokio::spawn(async move { service.match_bytes(&png_bytes([1, 2, 3])).await })
    });
    for joined in join_all(tasks).await {
        let err = joined.unwrap().unwrap_err();
        assert!(err.is_unavailable());
    }

    assert_eq!(service.index().physical_loads(), 1);
    assert_eq!(service.status().index_state, "failed");
}
