//! Rebuild E2E tests for vismatch.
//!
//! A rebuild either publishes a complete new pair or leaves the previous
//! pair byte-identical and servable.

use pretty_assertions::assert_eq;

use e2e_tests::{color_loader, distinct_colors, png_bytes, test_extractor, TestHarness};
use vismatch_indexing::{BuildError, CatalogItem, IndexBuilder, NoOpProgressCallback};
use vismatch_search::VisualSearchService;
use vismatch_types::CatalogItemId;

/// Rebuild where every image is missing keeps the old index.
#[tokio::test]
async fn test_failed_rebuild_keeps_previous_index() {
    // 1. Publish an initial index of three products
    let harness = TestHarness::new();
    let colors = distinct_colors(3);
    let items = harness.write_catalog(&colors);
    let builder = IndexBuilder::new(test_extractor(), harness.files.clone());
    builder.run(&items, &NoOpProgressCallback).unwrap();
    let before = harness.read_index_bytes();

    // 2. Rebuild from a catalog whose images are all gone
    let gone = vec![
        CatalogItem::new(7, Some(harness.media_dir.join("gone_7.png"))),
        CatalogItem::new(8, None),
    ];
    let err = builder.run(&gone, &NoOpProgressCallback).unwrap_err();
    let report = err.report().expect("report attached");
    assert!(!report.published);
    assert_eq!(report.summary(), "0 images processed successfully, 1 failed");
    assert!(matches!(err, BuildError::NothingExtracted { .. }));

    // 3. Files untouched
    assert_eq!(harness.read_index_bytes(), before);

    // 4. Still servable, before and after an explicit reload
    let service = VisualSearchService::start(harness.service_config(0.70), color_loader())
        .await
        .unwrap();
    let result = service.match_bytes(&png_bytes(colors[1])).await.unwrap();
    assert_eq!(result.item_id, Some(CatalogItemId::new(2)));

    let status = service.reload().await;
    assert_eq!(status.index_state, "loaded");
    assert_eq!(status.vector_count, Some(3));
}

/// A successful rebuild is picked up by a running service only on reload.
#[tokio::test]
async fn test_reload_picks_up_new_index() {
    let harness = TestHarness::new();
    let colors = distinct_colors(4);
    let builder = IndexBuilder::new(test_extractor(), harness.files.clone());
    let first = harness.write_catalog(&colors[..2]);
    builder.run(&first, &NoOpProgressCallback).unwrap();

    let service = VisualSearchService::start(harness.service_config(0.70), color_loader())
        .await
        .unwrap();
    assert_eq!(service.index().get().await.unwrap().size(), 2);

    // Publish a larger catalog underneath the running service
    let second = harness.write_catalog(&colors);
    builder.run(&second, &NoOpProgressCallback).unwrap();
    assert_eq!(service.index().get().await.unwrap().size(), 2);

    let status = service.reload().await;
    assert_eq!(status.vector_count, Some(4));
    assert_eq!(service.index().physical_loads(), 2);

    let result = service.match_bytes(&png_bytes(colors[3])).await.unwrap();
    assert!(result.found);
    assert_eq!(result.item_id, Some(CatalogItemId::new(4)));
}

/// Queries holding the previous index are unaffected by a reload.
#[tokio::test]
async fn test_reload_does_not_invalidate_held_index() {
    let harness = TestHarness::new();
    let colors = distinct_colors(2);
    let items = harness.write_catalog(&colors);
    let builder = IndexBuilder::new(test_extractor(), harness.files.clone());
    builder.run(&items, &NoOpProgressCallback).unwrap();

    let service = VisualSearchService::start(harness.service_config(0.70), color_loader())
        .await
        .unwrap();
    let held = service.index().get().await.unwrap();

    std::fs::remove_file(&harness.files.vectors).unwrap();
    let status = service.reload().await;
    assert_eq!(status.index_state, "failed");

    assert_eq!(held.size(), 2);
    assert_eq!(held.ids(), &[CatalogItemId::new(1), CatalogItemId::new(2)]);
}
