//! Concurrent prefetching data loader for video snippet training.
//!
//! This crate streams labeled video records (rgb or optical-flow snippets)
//! from an ordered key-value store or flat manifests, samples temporal
//! windows, transforms them into fixed-shape float batches, and hands the
//! batches to a compute engine without blocking it on I/O.
//!
//! # Architecture Overview
//!
//! ```text
//!   store cursor / manifest
//!            │
//!            ▼
//!   SourceReaderBody ── one background thread per (name, source) key,
//!            │           deduplicated through the ReaderRegistry
//!            │  deterministic round-robin, one record per consumer per pass
//!            ▼
//!      StreamQueues ──── per-consumer free/full record pools
//!            │
//!            ▼
//!       Prefetcher ───── fill thread: record → transform → batch slice
//!            │
//!     batch_full queue
//!            │
//!            ▼
//!        consumer ────── next_batch() → BatchGuard → recycled on drop
//! ```
//!
//! Every cross-thread handoff goes through a [`queue::BlockingQueue`];
//! records and batches move by value, so exactly one owner exists at any
//! instant and pool sizes bound memory regardless of dataset size. One stop
//! signal (queue interruption) unblocks every waiting thread for prompt
//! teardown.

pub mod batch;
pub mod config;
pub mod frames;
pub mod loader;
pub mod manifest;
pub mod prefetch;
pub mod queue;
pub mod reader;
pub mod record;
pub mod sampler;
pub mod store;
pub mod transform;

pub use batch::Batch;
pub use config::{LoaderConfig, LoaderConfigBuilder, Modality, Phase, Source};
pub use loader::VideoLoader;
pub use prefetch::{BatchGuard, Prefetcher};
pub use reader::{ReaderHandle, ReaderRegistry, SourceKey};
pub use record::Record;
pub use store::{Cursor, MemStore, Store};
pub use transform::{TransformConfig, Transformer, View};
