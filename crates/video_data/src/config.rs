//! src/config.rs
//!
//! Configuration for a video data loader instance.
//!
//! One `LoaderConfig` describes everything a consumer needs: where the
//! records come from, how temporal windows are sampled, how items are
//! transformed, and how deep the prefetch pipeline runs.
//!
//! Example:
//! ```ignore
//! let config = LoaderConfig::builder("rgb_train", Source::ClipManifest { path: list.into() })
//!     .phase(Phase::Train)
//!     .batch_size(16)
//!     .prefetch_depth(3)
//!     .num_segments(3)
//!     .snippet_len(5)
//!     .shuffle(true)
//!     .seed(42)
//!     .build()?;
//! ```

use crate::reader::SourceKey;
use crate::store::Store;
use crate::transform::TransformConfig;
use anyhow::{ensure, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Training vs evaluation. Train phase samples windows randomly and runs one
/// record stream per solver replica; test phase is deterministic and single
/// stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Test,
}

/// Pixel modality of a stream. Determines the per-frame channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Rgb,
    Flow,
    ColorFlow,
}

impl Modality {
    /// Channels contributed by one frame.
    pub fn frame_channels(self) -> u32 {
        match self {
            Modality::Rgb => 3,
            Modality::Flow => 2,
            Modality::ColorFlow => 3,
        }
    }
}

/// Where records come from.
#[derive(Clone)]
pub enum Source {
    /// Ordered key-value store of serialized records.
    Store { path: String, store: Arc<dyn Store> },
    /// Manifest of `<dir> <start_frame> <label>` lines; one fixed snippet
    /// per line starting at the given 1-based frame.
    SnippetManifest { path: PathBuf },
    /// Manifest of `<dir> <clip_length> <label>` lines; snippets are sampled
    /// from `num_segments` temporal segments of each clip.
    ClipManifest { path: PathBuf },
    /// Paired rgb/flow clip manifests read in lockstep.
    TwoStream { rgb: PathBuf, flow: PathBuf },
}

impl Source {
    /// Identifier used in the reader registry key.
    pub(crate) fn path_string(&self) -> String {
        match self {
            Source::Store { path, .. } => path.clone(),
            Source::SnippetManifest { path } | Source::ClipManifest { path } => {
                path.display().to_string()
            }
            Source::TwoStream { rgb, flow } => {
                format!("{}+{}", rgb.display(), flow.display())
            }
        }
    }

    /// Number of parallel record streams a consumer of this source owns.
    pub(crate) fn stream_count(&self) -> usize {
        match self {
            Source::TwoStream { .. } => 2,
            _ => 1,
        }
    }
}

/// Full configuration surface for one loader.
#[derive(Clone)]
pub struct LoaderConfig {
    /// Logical layer name. Part of the registry key, so two loaders with the
    /// same physical source but different names get isolated reader threads.
    pub name: String,
    pub source: Source,
    pub phase: Phase,
    pub modality: Modality,
    /// Items per batch.
    pub batch_size: usize,
    /// Number of preallocated batch buffers cycling through the prefetcher.
    pub prefetch_depth: usize,
    /// Temporal segments sampled per clip.
    pub num_segments: u32,
    /// Contiguous frames per snippet.
    pub snippet_len: u32,
    /// Store variant only: trim each stored clip down to sampled snippet
    /// windows instead of delivering it whole.
    pub windowed: bool,
    /// Keep the frame axis separate (`[C, L, H, W]` items) instead of folding
    /// frames into channels.
    pub preserve_temporal: bool,
    /// Manifest variants only: shuffle entries on load and on every rewind.
    pub shuffle: bool,
    /// Parallel training replicas sharing this source in train phase.
    pub solver_count: usize,
    /// Resize decoded frames to `(height, width)` before layout.
    pub resize: Option<(u32, u32)>,
    pub transform: TransformConfig,
    /// Seed for window sampling, shuffling, and random crops. A fresh random
    /// seed is drawn when absent.
    pub seed: Option<u64>,
}

impl LoaderConfig {
    pub fn builder(name: impl Into<String>, source: Source) -> LoaderConfigBuilder {
        LoaderConfigBuilder {
            config: LoaderConfig {
                name: name.into(),
                source,
                phase: Phase::Train,
                modality: Modality::Rgb,
                batch_size: 1,
                prefetch_depth: 3,
                num_segments: 1,
                snippet_len: 1,
                windowed: false,
                preserve_temporal: false,
                shuffle: false,
                solver_count: 1,
                resize: None,
                transform: TransformConfig::default(),
                seed: None,
            },
        }
    }

    pub(crate) fn source_key(&self) -> SourceKey {
        SourceKey {
            name: self.name.clone(),
            source: self.source.path_string(),
        }
    }

    /// Streams primed per attached consumer: one per solver replica when
    /// training, one otherwise.
    pub(crate) fn replica_count(&self) -> usize {
        match self.phase {
            Phase::Train => self.solver_count,
            Phase::Test => 1,
        }
    }

    /// Record pool population per queue pair.
    pub(crate) fn pool_size(&self) -> usize {
        self.prefetch_depth * self.batch_size
    }
}

/// Builder with method chaining, validated at `build`.
pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    pub fn phase(mut self, phase: Phase) -> Self {
        self.config.phase = phase;
        self
    }

    pub fn modality(mut self, modality: Modality) -> Self {
        self.config.modality = modality;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn prefetch_depth(mut self, depth: usize) -> Self {
        self.config.prefetch_depth = depth;
        self
    }

    pub fn num_segments(mut self, segments: u32) -> Self {
        self.config.num_segments = segments;
        self
    }

    pub fn snippet_len(mut self, len: u32) -> Self {
        self.config.snippet_len = len;
        self
    }

    pub fn windowed(mut self, windowed: bool) -> Self {
        self.config.windowed = windowed;
        self
    }

    pub fn preserve_temporal(mut self, preserve: bool) -> Self {
        self.config.preserve_temporal = preserve;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.config.shuffle = shuffle;
        self
    }

    pub fn solver_count(mut self, count: usize) -> Self {
        self.config.solver_count = count;
        self
    }

    pub fn resize(mut self, height: u32, width: u32) -> Self {
        self.config.resize = Some((height, width));
        self
    }

    pub fn transform(mut self, transform: TransformConfig) -> Self {
        self.config.transform = transform;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<LoaderConfig> {
        let config = self.config;
        ensure!(config.batch_size > 0, "batch_size must be greater than 0");
        ensure!(
            config.prefetch_depth > 0,
            "prefetch_depth must be greater than 0"
        );
        ensure!(config.num_segments > 0, "num_segments must be greater than 0");
        ensure!(config.snippet_len > 0, "snippet_len must be greater than 0");
        ensure!(config.solver_count > 0, "solver_count must be greater than 0");
        if config.windowed {
            ensure!(
                matches!(config.source, Source::Store { .. }),
                "windowed reads require a store source"
            );
        }
        Ok(config)
    }
}
