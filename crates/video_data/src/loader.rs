//! src/loader.rs
//!
//! The consumer-facing loader: one `VideoLoader` per training replica (or
//! per evaluation net). Construction attaches to the shared reader registry,
//! waits for the reader to prime this consumer's queues, and starts the
//! prefetch pipeline; `next_batch` then hands out completed batches without
//! ever blocking the caller on raw I/O.
//!
//! Example:
//! ```ignore
//! let registry = Arc::new(ReaderRegistry::new());
//! let config = LoaderConfig::builder("rgb_train", source)
//!     .phase(Phase::Train)
//!     .batch_size(16)
//!     .build()?;
//!
//! let loader = VideoLoader::new(config, &registry)?;
//! loop {
//!     let batch = loader.next_batch()?;
//!     // hand batch.data / batch.labels to the compute engine
//! }   // guard drop recycles the buffer
//! ```

use crate::config::LoaderConfig;
use crate::prefetch::{BatchGuard, Prefetcher};
use crate::reader::{ReaderHandle, ReaderRegistry};
use crate::transform::Transformer;
use anyhow::{Context, Result};
use rand::Rng;
use std::sync::Arc;

pub struct VideoLoader {
    // Field order matters for teardown: the prefetcher stops its fill thread
    // before the handle detaches from the reader.
    prefetcher: Prefetcher,
    handle: ReaderHandle,
    config: LoaderConfig,
}

impl VideoLoader {
    pub fn new(config: LoaderConfig, registry: &Arc<ReaderRegistry>) -> Result<Self> {
        let handle = registry
            .attach(&config)
            .with_context(|| format!("failed to attach loader '{}'", config.name))?;

        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let transformer = Transformer::new(config.transform.clone(), config.phase, seed);
        let prefetcher = Prefetcher::new(&handle, transformer, &config)
            .with_context(|| format!("failed to start prefetcher for '{}'", config.name))?;

        Ok(Self {
            prefetcher,
            handle,
            config,
        })
    }

    /// Blocks until the next completed batch. The guard returns the buffer
    /// to the pool when dropped, so hold it only for the duration of one
    /// consume step.
    pub fn next_batch(&self) -> Result<BatchGuard<'_>> {
        self.prefetcher
            .next_batch()
            .with_context(|| format!("loader '{}' stopped", self.config.name))
    }

    /// Completed batches currently buffered. Diagnostic snapshot only.
    pub fn prefetched(&self) -> usize {
        self.prefetcher.prefetched()
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Direct access to this consumer's record queues, for callers that
    /// bypass batching (feature extraction, inspection tools).
    pub fn reader_handle(&self) -> &ReaderHandle {
        &self.handle
    }
}
