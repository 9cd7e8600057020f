//! src/reader/strategy.rs
//!
//! Per-variant `read_one` behavior behind one interface, so a single reader
//! body serves every source flavor: whole stored records, windowed stored
//! clips, manifest-listed snippets and clips, and paired two-stream reads.
//!
//! Every strategy follows the same discipline: pop a free record slot (this
//! blocks when the pool is exhausted, which is what bounds memory), fill it,
//! push it to the full queue, advance the underlying stream, and rewind the
//! stream at its end. Data failures propagate; the body treats them as
//! fatal.

use super::StreamQueues;
use crate::config::{LoaderConfig, Modality, Phase, Source};
use crate::frames::fill_from_frames;
use crate::manifest::{Manifest, PairedManifest};
use crate::record::Record;
use crate::sampler::segment_offsets;
use crate::store::Cursor;
use anyhow::{ensure, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

pub(crate) trait ReadStrategy: Send {
    /// Reads exactly one record (or one lockstep record per stream) into the
    /// consumer's queues.
    fn read_one(&mut self, queues: &StreamQueues) -> Result<()>;
}

/// Builds the strategy for `config`, opening the underlying source. Open
/// failures surface here, before the reader thread exists.
pub(crate) fn build(config: &LoaderConfig) -> Result<Box<dyn ReadStrategy>> {
    let seed = config.seed.unwrap_or_else(|| rand::rng().random());
    match &config.source {
        Source::Store { path, store } => {
            let cursor = store
                .open_cursor()
                .with_context(|| format!("failed to open record store: {}", path))?;
            if config.windowed {
                Ok(Box::new(WindowedStoreStrategy {
                    cursor,
                    scratch: Record::blank(),
                    per_frame: config.modality.frame_channels(),
                    num_segments: config.num_segments,
                    snippet_len: config.snippet_len,
                    phase: config.phase,
                    rng: StdRng::seed_from_u64(seed),
                }))
            } else {
                Ok(Box::new(StoreStrategy { cursor }))
            }
        }
        Source::SnippetManifest { path } => Ok(Box::new(SnippetStrategy {
            manifest: Manifest::open(path, config.shuffle, seed)?,
            modality: config.modality,
            snippet_len: config.snippet_len,
            preserve_temporal: config.preserve_temporal,
            resize: config.resize,
        })),
        Source::ClipManifest { path } => Ok(Box::new(ClipStrategy {
            manifest: Manifest::open(path, config.shuffle, seed)?,
            modality: config.modality,
            num_segments: config.num_segments,
            snippet_len: config.snippet_len,
            preserve_temporal: config.preserve_temporal,
            resize: config.resize,
            phase: config.phase,
            rng: StdRng::seed_from_u64(seed),
        })),
        Source::TwoStream { rgb, flow } => Ok(Box::new(TwoStreamStrategy {
            manifest: PairedManifest::open(rgb, flow, config.shuffle, seed)?,
            snippet_len: config.snippet_len,
            preserve_temporal: config.preserve_temporal,
            resize: config.resize,
        })),
    }
}

fn advance(cursor: &mut dyn Cursor) {
    cursor.next();
    if !cursor.valid() {
        debug!("restarting record stream from the start");
        cursor.seek_to_first();
    }
}

/// Delivers stored records whole, in cursor order, wrapping at the end.
struct StoreStrategy {
    cursor: Box<dyn Cursor>,
}

impl ReadStrategy for StoreStrategy {
    fn read_one(&mut self, queues: &StreamQueues) -> Result<()> {
        let pair = queues.pair(0);
        let mut record = pair.free.pop_logged("waiting for a free record slot")?;
        record
            .decode_from(self.cursor.value())
            .context("undecodable record entry")?;
        pair.full.push(record);
        advance(self.cursor.as_mut());
        Ok(())
    }
}

/// Delivers a trimmed snippet window sliced out of each stored clip instead
/// of the whole clip. The full clip is deserialized into a scratch record
/// that never enters the pool.
struct WindowedStoreStrategy {
    cursor: Box<dyn Cursor>,
    scratch: Record,
    per_frame: u32,
    num_segments: u32,
    snippet_len: u32,
    phase: Phase,
    rng: StdRng,
}

impl ReadStrategy for WindowedStoreStrategy {
    fn read_one(&mut self, queues: &StreamQueues) -> Result<()> {
        let pair = queues.pair(0);
        let mut record = pair.free.pop_logged("waiting for a free record slot")?;

        self.scratch
            .decode_from(self.cursor.value())
            .context("undecodable record entry")?;
        let clip = &self.scratch;
        ensure!(
            clip.length == 1 && clip.channels % self.per_frame == 0,
            "stored clip has {} channels (length {}), not a flat multiple of {} per frame",
            clip.channels,
            clip.length,
            self.per_frame
        );
        ensure!(
            clip.payload.len() == clip.element_count(),
            "stored clip payload holds {} bytes, dimensions say {}",
            clip.payload.len(),
            clip.element_count()
        );

        let video_len = clip.channels / self.per_frame;
        let offsets = segment_offsets(
            self.phase,
            video_len,
            self.num_segments,
            self.snippet_len,
            &mut self.rng,
        )?;

        let frame_bytes = (self.per_frame * clip.height * clip.width) as usize;
        record.clear();
        record.channels = self.per_frame * self.snippet_len * self.num_segments;
        record.length = 1;
        record.height = clip.height;
        record.width = clip.width;
        record.label = clip.label;
        for &offset in &offsets {
            let start = offset as usize * frame_bytes;
            let len = self.snippet_len as usize * frame_bytes;
            record.payload.extend_from_slice(&clip.payload[start..start + len]);
        }

        pair.full.push(record);
        advance(self.cursor.as_mut());
        Ok(())
    }
}

/// Manifest lines carry a fixed 1-based start frame; one snippet per line.
struct SnippetStrategy {
    manifest: Manifest,
    modality: Modality,
    snippet_len: u32,
    preserve_temporal: bool,
    resize: Option<(u32, u32)>,
}

impl ReadStrategy for SnippetStrategy {
    fn read_one(&mut self, queues: &StreamQueues) -> Result<()> {
        let pair = queues.pair(0);
        let mut record = pair.free.pop_logged("waiting for a free record slot")?;
        let entry = self.manifest.next_entry();
        let offsets = [entry.frames.saturating_sub(1)];
        fill_from_frames(
            &entry.path,
            entry.label,
            &offsets,
            self.snippet_len,
            self.modality,
            self.resize,
            self.preserve_temporal,
            &mut record,
        )
        .with_context(|| format!("failed to read snippet from {}", entry.path.display()))?;
        pair.full.push(record);
        Ok(())
    }
}

/// Manifest lines carry the clip length; snippets are sampled from
/// `num_segments` temporal segments per clip.
struct ClipStrategy {
    manifest: Manifest,
    modality: Modality,
    num_segments: u32,
    snippet_len: u32,
    preserve_temporal: bool,
    resize: Option<(u32, u32)>,
    phase: Phase,
    rng: StdRng,
}

impl ReadStrategy for ClipStrategy {
    fn read_one(&mut self, queues: &StreamQueues) -> Result<()> {
        let pair = queues.pair(0);
        let mut record = pair.free.pop_logged("waiting for a free record slot")?;
        let entry = self.manifest.next_entry();

        let average_duration = entry.frames / self.num_segments;
        let offsets = if average_duration >= self.snippet_len {
            segment_offsets(
                self.phase,
                entry.frames,
                self.num_segments,
                self.snippet_len,
                &mut self.rng,
            )?
        } else {
            // Clip too short for sampled windows: read every segment from
            // frame 0 rather than rejecting the clip.
            debug!(clip = %entry.path.display(), frames = entry.frames, "clip shorter than snippet window");
            vec![0; self.num_segments as usize]
        };

        fill_from_frames(
            &entry.path,
            entry.label,
            &offsets,
            self.snippet_len,
            self.modality,
            self.resize,
            self.preserve_temporal,
            &mut record,
        )
        .with_context(|| format!("failed to read clip from {}", entry.path.display()))?;
        pair.full.push(record);
        Ok(())
    }
}

/// Paired rgb + flow snippets for the same temporal instant, read in
/// lockstep from paired manifests into the two queue pairs of one consumer.
struct TwoStreamStrategy {
    manifest: PairedManifest,
    snippet_len: u32,
    preserve_temporal: bool,
    resize: Option<(u32, u32)>,
}

impl ReadStrategy for TwoStreamStrategy {
    fn read_one(&mut self, queues: &StreamQueues) -> Result<()> {
        debug_assert_eq!(queues.stream_count(), 2);
        let rgb_pair = queues.pair(0);
        let flow_pair = queues.pair(1);

        let mut flow_record = flow_pair.free.pop_logged("waiting for a free flow slot")?;
        let mut rgb_record = match rgb_pair.free.pop_logged("waiting for a free rgb slot") {
            Ok(record) => record,
            Err(interrupted) => {
                // Return the half-claimed slot before unwinding.
                flow_pair.free.push(flow_record);
                return Err(interrupted.into());
            }
        };

        let (rgb_entry, flow_entry) = self.manifest.next_pair();

        let flow_offsets = [flow_entry.frames.saturating_sub(1)];
        fill_from_frames(
            &flow_entry.path,
            flow_entry.label,
            &flow_offsets,
            self.snippet_len,
            Modality::Flow,
            self.resize,
            self.preserve_temporal,
            &mut flow_record,
        )
        .with_context(|| format!("failed to read flow snippet from {}", flow_entry.path.display()))?;

        let rgb_offsets = [rgb_entry.frames.saturating_sub(1)];
        fill_from_frames(
            &rgb_entry.path,
            rgb_entry.label,
            &rgb_offsets,
            self.snippet_len,
            Modality::Rgb,
            self.resize,
            self.preserve_temporal,
            &mut rgb_record,
        )
        .with_context(|| format!("failed to read rgb snippet from {}", rgb_entry.path.display()))?;

        rgb_pair.full.push(rgb_record);
        flow_pair.full.push(flow_record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use crate::store::{MemStore, Store};
    use std::sync::Arc;

    fn stored_record(label: i32) -> Vec<u8> {
        Record {
            payload: vec![label as u8; 4],
            float_data: vec![],
            channels: 1,
            length: 1,
            height: 2,
            width: 2,
            label,
            encoded: false,
        }
        .encode()
    }

    fn store_with(n: i32) -> Arc<MemStore> {
        let mut store = MemStore::new();
        for i in 0..n {
            store.insert(format!("{:08}", i).into_bytes(), stored_record(i));
        }
        Arc::new(store)
    }

    fn store_config(store: Arc<MemStore>) -> LoaderConfig {
        LoaderConfig::builder(
            "test",
            Source::Store { path: "db".into(), store },
        )
        .build()
        .unwrap()
    }

    #[test]
    fn test_store_strategy_delivers_cursor_order_and_wraps() -> Result<()> {
        let mut strategy = build(&store_config(store_with(3)))?;
        let queues = StreamQueues::new(1, 8);

        for expected in [0, 1, 2, 0, 1] {
            strategy.read_one(&queues)?;
            let record = queues.pair(0).full.pop().unwrap();
            assert_eq!(record.label, expected);
            queues.pair(0).free.push(record);
        }
        Ok(())
    }

    #[test]
    fn test_store_strategy_blocks_via_free_pool() -> Result<()> {
        let mut strategy = build(&store_config(store_with(2)))?;
        let queues = StreamQueues::new(1, 2);

        strategy.read_one(&queues)?;
        strategy.read_one(&queues)?;
        assert_eq!(queues.pair(0).free.len(), 0);
        assert_eq!(queues.pair(0).full.len(), 2);

        // A third read would block; interrupt instead and check the
        // cancellation path comes back.
        queues.pair(0).free.interrupt();
        let err = strategy.read_one(&queues).unwrap_err();
        assert!(crate::queue::is_interrupted(&err));
        Ok(())
    }

    #[test]
    fn test_windowed_store_strategy_trims_clips() -> Result<()> {
        // One stored clip: 6 frames of 1x(2x2) planes, bytes = frame index.
        let mut payload = Vec::new();
        for frame in 0..6u8 {
            payload.extend_from_slice(&[frame; 4]);
        }
        let clip = Record {
            payload,
            float_data: vec![],
            channels: 6,
            length: 1,
            height: 2,
            width: 2,
            label: 9,
            encoded: false,
        };
        let mut store = MemStore::new();
        store.insert(*b"clip", clip.encode());

        // The synthetic clip uses 1-channel frames, so the per-frame channel
        // count is pinned directly instead of coming from a modality.
        let mut strategy = WindowedStoreStrategy {
            cursor: store.open_cursor()?,
            scratch: Record::blank(),
            per_frame: 1,
            num_segments: 2,
            snippet_len: 2,
            phase: Phase::Test,
            rng: StdRng::seed_from_u64(0),
        };

        let queues = StreamQueues::new(1, 2);
        strategy.read_one(&queues)?;
        let record = queues.pair(0).full.pop().unwrap();

        // 6 frames / 2 segments -> 3-frame segments, centered 2-frame
        // windows at offsets [1, 4] -> frames 1, 2, 4, 5.
        assert_eq!(record.channels, 4);
        assert_eq!(record.label, 9);
        let frames: Vec<u8> = record.payload.chunks(4).map(|c| c[0]).collect();
        assert_eq!(frames, vec![1, 2, 4, 5]);
        Ok(())
    }

    #[test]
    fn test_open_failure_is_reported_at_build() {
        let config = LoaderConfig::builder(
            "test",
            Source::ClipManifest { path: "/nonexistent/list.txt".into() },
        )
        .build()
        .unwrap();
        assert!(build(&config).is_err());
    }
}
