//! ResNet-50 E2E tests for vismatch.
//!
//! These download the pretrained weights on first use and are ignored by
//! default. Run with `cargo test -p e2e-tests -- --ignored`.

use std::sync::{Arc, OnceLock};

use image::{Rgb, RgbImage};
use pretty_assertions::assert_eq;

use e2e_tests::TestHarness;
use vismatch_embeddings::{ExtractorConfig, FeatureExtractor, ResnetBackend};
use vismatch_index::EmbeddingIndex;
use vismatch_indexing::{CatalogItem, IndexBuilder, NoOpProgressCallback};
use vismatch_search::{match_query, Matcher};
use vismatch_types::CatalogItemId;

fn resnet() -> Arc<FeatureExtractor> {
    static EXTRACTOR: OnceLock<Arc<FeatureExtractor>> = OnceLock::new();
    EXTRACTOR
        .get_or_init(|| {
            let backend = ResnetBackend::load_default().expect("Failed to load ResNet-50");
            Arc::new(FeatureExtractor::new(
                Arc::new(backend),
                ExtractorConfig::default(),
            ))
        })
        .clone()
}

fn stripes(period: u32) -> RgbImage {
    RgbImage::from_fn(256, 256, |x, _| {
        if (x / period).is_multiple_of(2) {
            Rgb([220, 40, 40])
        } else {
            Rgb([250, 250, 250])
        }
    })
}

fn checkerboard(cell: u32) -> RgbImage {
    RgbImage::from_fn(256, 256, |x, y| {
        if ((x / cell) + (y / cell)).is_multiple_of(2) {
            Rgb([20, 20, 120])
        } else {
            Rgb([240, 200, 40])
        }
    })
}

#[test]
#[ignore = "requires model download"]
fn test_resnet_vectors_are_pooled_activations() {
    let vector = resnet().extract_decoded(&stripes(16)).unwrap();
    assert_eq!(vector.dimension(), 2048);
    assert!(vector.as_slice().iter().all(|v| v.is_finite() && *v >= 0.0));
    assert!(!vector.is_zero());
}

#[test]
#[ignore = "requires model download"]
fn test_resnet_build_and_match_same_image() {
    let harness = TestHarness::new();
    let images = [stripes(16), checkerboard(32), stripes(4)];
    let items: Vec<CatalogItem> = images
        .iter()
        .enumerate()
        .map(|(i, image)| {
            let path = harness.media_dir.join(format!("pattern_{i}.png"));
            image.save(&path).unwrap();
            CatalogItem::new(i as i64 + 1, Some(path))
        })
        .collect();

    let report = IndexBuilder::new(resnet(), harness.files.clone())
        .run(&items, &NoOpProgressCallback)
        .unwrap();
    assert_eq!(report.extracted(), 3);
    assert_eq!(report.dimension, 2048);

    let index = EmbeddingIndex::load(&harness.files).unwrap();
    let query = resnet()
        .extract_path(&harness.media_dir.join("pattern_1.png"))
        .unwrap();
    let result = match_query(&query, &index, 0.70).unwrap();
    assert!(result.found);
    assert_eq!(result.item_id, Some(CatalogItemId::new(2)));
    assert!(result.score > 0.999);

    let parallel = Matcher::new(0.70)
        .with_parallel_scan_min(1)
        .match_query(&query, &index)
        .unwrap();
    assert_eq!(parallel, result);
}
