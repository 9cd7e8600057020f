//! End-to-end tests for the double-buffered prefetch pipeline.
//!
//! Covers:
//! - batch assembly in stream order with correct labels and pixels
//! - batch pool identity: buffers cycle, none leak, none get minted
//! - backpressure: a stalled consumer caps buffered batches at the pool size
//! - transform integration (crop and mean subtraction) and two-stream loads

mod common;
use common::{labeled_store, snippet_dataset, write_clip_frames};

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use video_data::{
    LoaderConfig, Modality, Phase, ReaderRegistry, Source, TransformConfig, VideoLoader,
};

fn store_loader_config(batch_size: usize, depth: usize, records: i32) -> LoaderConfig {
    LoaderConfig::builder(
        "pipeline",
        Source::Store { path: "db".into(), store: labeled_store(records) },
    )
    .phase(Phase::Test)
    .batch_size(batch_size)
    .prefetch_depth(depth)
    .build()
    .unwrap()
}

#[test]
fn test_batches_carry_labels_and_pixels_in_order() -> Result<()> {
    let registry = Arc::new(ReaderRegistry::new());
    let loader = VideoLoader::new(store_loader_config(2, 2, 6), &registry)?;

    let expected = [[0, 1], [2, 3], [4, 5], [0, 1]]; // fourth batch wraps
    for labels in expected {
        let batch = loader.next_batch()?;
        assert_eq!(batch.labels, labels);
        assert_eq!(batch.data.len(), 1);
        assert_eq!(batch.data[0].shape(), &[2, 1, 2, 2]);
        // The identity transform copies the payload straight through, and
        // the test payload is the label repeated.
        for (item, &label) in labels.iter().enumerate() {
            assert_eq!(batch.data[0][[item, 0, 0, 0]], label as f32);
            assert_eq!(batch.data[0][[item, 0, 1, 1]], label as f32);
        }
    }
    Ok(())
}

#[test]
fn test_batch_pool_keeps_exactly_k_identities() -> Result<()> {
    let depth = 3;
    let registry = Arc::new(ReaderRegistry::new());
    let loader = VideoLoader::new(store_loader_config(2, depth, 6), &registry)?;

    let mut seen = HashSet::new();
    for _ in 0..4 * depth {
        let batch = loader.next_batch()?;
        assert!(batch.id < depth, "unexpected batch identity {}", batch.id);
        seen.insert(batch.id);
    }
    // Every buffer cycles through; none were minted or lost.
    assert_eq!(seen.len(), depth);
    Ok(())
}

#[test]
fn test_stalled_consumer_caps_buffered_batches() -> Result<()> {
    let depth = 3;
    let registry = Arc::new(ReaderRegistry::new());
    let loader = VideoLoader::new(store_loader_config(1, depth, 8), &registry)?;

    // Consume nothing: the fill thread runs ahead, then must block on the
    // free queue with exactly `depth` batches completed.
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(loader.prefetched(), depth);

    // Draining one lets the fill thread complete exactly one more.
    drop(loader.next_batch()?);
    std::thread::sleep(Duration::from_millis(500));
    assert_eq!(loader.prefetched(), depth);
    Ok(())
}

#[test]
fn test_crop_and_mean_subtraction_apply() -> Result<()> {
    let registry = Arc::new(ReaderRegistry::new());
    let config = LoaderConfig::builder(
        "cropper",
        Source::Store { path: "db".into(), store: labeled_store(4) },
    )
    .phase(Phase::Test)
    .batch_size(1)
    .transform(TransformConfig {
        crop_size: 1,
        mirror: false,
        scale: 2.0,
        mean_values: vec![1.0],
    })
    .build()?;
    let loader = VideoLoader::new(config, &registry)?;

    // Record 0 is all zeros: (0 - 1) * 2 = -2, cropped to 1x1.
    let batch = loader.next_batch()?;
    assert_eq!(batch.data[0].shape(), &[1, 1, 1, 1]);
    assert_eq!(batch.data[0][[0, 0, 0, 0]], -2.0);
    Ok(())
}

#[test]
fn test_snippet_manifest_loader() -> Result<()> {
    let (_root, manifest) = snippet_dataset(3, 4);
    let registry = Arc::new(ReaderRegistry::new());
    let config = LoaderConfig::builder("snippets", Source::SnippetManifest { path: manifest })
        .phase(Phase::Test)
        .modality(Modality::Rgb)
        .batch_size(3)
        .snippet_len(2)
        .build()?;
    let loader = VideoLoader::new(config, &registry)?;

    let batch = loader.next_batch()?;
    assert_eq!(batch.labels, [0, 1, 2]);
    // 3 rgb channels x 2 frames fold into the channel axis; frames are 4x4.
    assert_eq!(batch.data[0].shape(), &[3, 6, 4, 4]);
    Ok(())
}

#[test]
fn test_two_stream_loader_pairs_rgb_and_flow() -> Result<()> {
    let root = TempDir::new().unwrap();
    let mut rgb_lines = String::new();
    let mut flow_lines = String::new();
    for clip in 0..2 {
        let clip_dir = root.path().join(format!("clip{}", clip));
        std::fs::create_dir(&clip_dir).unwrap();
        write_clip_frames(&clip_dir, 3);
        rgb_lines.push_str(&format!("{} 1 {}\n", clip_dir.display(), clip + 10));
        flow_lines.push_str(&format!("{} 1 {}\n", clip_dir.display(), clip + 10));
    }
    let rgb_manifest = root.path().join("rgb.txt");
    let flow_manifest = root.path().join("flow.txt");
    std::fs::write(&rgb_manifest, rgb_lines).unwrap();
    std::fs::write(&flow_manifest, flow_lines).unwrap();

    let registry = Arc::new(ReaderRegistry::new());
    let config = LoaderConfig::builder(
        "twostream",
        Source::TwoStream { rgb: rgb_manifest, flow: flow_manifest },
    )
    .phase(Phase::Test)
    .batch_size(2)
    .snippet_len(2)
    .build()?;
    let loader = VideoLoader::new(config, &registry)?;

    let batch = loader.next_batch()?;
    assert_eq!(batch.data.len(), 2);
    assert_eq!(batch.labels, [10, 11]);
    // Stream 0 is rgb (3 channels per frame), stream 1 flow (2 per frame).
    assert_eq!(batch.data[0].shape(), &[2, 6, 4, 4]);
    assert_eq!(batch.data[1].shape(), &[2, 4, 4, 4]);
    Ok(())
}

#[test]
fn test_teardown_releases_registry() -> Result<()> {
    let registry = Arc::new(ReaderRegistry::new());
    let loader = VideoLoader::new(store_loader_config(1, 2, 4), &registry)?;
    drop(loader.next_batch()?);
    drop(loader);
    assert_eq!(registry.len(), 0);
    Ok(())
}
