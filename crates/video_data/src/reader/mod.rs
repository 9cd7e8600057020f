//! src/reader/mod.rs
//!
//! Shared record readers.
//!
//! Every unique `(name, source)` pair gets exactly one background reader
//! thread, however many consumers attach to it. Consumers attach through the
//! [`ReaderRegistry`] and receive a [`ReaderHandle`] owning their
//! [`StreamQueues`]; the reader thread round-robins records into the attached
//! queue sets in a fixed, attach-ordered rotation, which is what makes
//! multi-replica training reproducible for a fixed replica count.
//!
//! ```text
//!  store / manifest ──► SourceReaderBody (one thread per source key)
//!                            │ round-robin, one record per pass
//!             ┌──────────────┼──────────────┐
//!             ▼              ▼              ▼
//!        StreamQueues   StreamQueues   StreamQueues     (one per consumer)
//!         free ⇄ full    free ⇄ full    free ⇄ full
//! ```

mod body;
mod strategy;

pub(crate) use body::SourceReaderBody;

use crate::config::LoaderConfig;
use crate::queue::BlockingQueue;
use crate::record::Record;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Registry key: the logical layer name plus the physical source path, so
/// identical sources opened under different names stay isolated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub name: String,
    pub source: String,
}

/// A recycling pair of record queues. The pool invariant: every record of
/// the pair lives in exactly one of `free`/`full`, or is momentarily held by
/// the single thread that popped it.
pub struct QueuePair {
    pub free: BlockingQueue<Record>,
    pub full: BlockingQueue<Record>,
}

impl QueuePair {
    /// Creates a pair whose free queue is pre-populated with `pool_size`
    /// blank records. The pool size is what bounds reader-side memory.
    pub(crate) fn new(pool_size: usize) -> Self {
        let free = BlockingQueue::new();
        for _ in 0..pool_size {
            free.push(Record::blank());
        }
        Self { free, full: BlockingQueue::new() }
    }

    pub(crate) fn interrupt(&self) {
        self.free.interrupt();
        self.full.interrupt();
    }
}

/// The unit of attachment: one queue pair per modality stream (a single pair
/// normally, rgb + flow pairs for two-stream sources).
pub struct StreamQueues {
    pairs: Vec<QueuePair>,
}

impl StreamQueues {
    fn new(stream_count: usize, pool_size: usize) -> Self {
        Self {
            pairs: (0..stream_count).map(|_| QueuePair::new(pool_size)).collect(),
        }
    }

    pub fn pair(&self, stream: usize) -> &QueuePair {
        &self.pairs[stream]
    }

    pub fn stream_count(&self) -> usize {
        self.pairs.len()
    }

    pub fn interrupt(&self) {
        for pair in &self.pairs {
            pair.interrupt();
        }
    }
}

/// Process-wide map from source key to the reader body serving it.
///
/// Constructed once and handed to every consumer rather than living in a
/// global: `Arc<ReaderRegistry>` is the only state shared between unrelated
/// threads, and its lock is held only for map lookups, never across I/O.
pub struct ReaderRegistry {
    bodies: Mutex<HashMap<SourceKey, Weak<SourceReaderBody>>>,
    bodies_created: AtomicUsize,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self {
            bodies: Mutex::new(HashMap::new()),
            bodies_created: AtomicUsize::new(0),
        }
    }

    /// Attaches a consumer to the reader for `config`'s source key, starting
    /// the reader thread if this is the first attach. At most one body ever
    /// exists per key, even under concurrent attach calls.
    pub fn attach(self: &Arc<Self>, config: &LoaderConfig) -> Result<ReaderHandle> {
        let key = config.source_key();
        let queues = Arc::new(StreamQueues::new(
            config.source.stream_count(),
            config.pool_size(),
        ));

        let existing = self.bodies.lock().unwrap().get(&key).and_then(Weak::upgrade);
        let body = match existing {
            Some(body) => body,
            None => {
                // Open the source outside the registry lock, then re-check:
                // a concurrent attach may have created the body meanwhile,
                // in which case the freshly opened strategy is discarded.
                let opened = strategy::build(config)
                    .with_context(|| format!("failed to open source for '{}'", key.name))?;
                let mut bodies = self.bodies.lock().unwrap();
                match bodies.get(&key).and_then(Weak::upgrade) {
                    Some(body) => body,
                    None => {
                        let body = SourceReaderBody::spawn(config, opened)
                            .with_context(|| format!("failed to start reader for '{}'", key.name))?;
                        bodies.insert(key.clone(), Arc::downgrade(&body));
                        self.bodies_created.fetch_add(1, Ordering::Relaxed);
                        body
                    }
                }
            }
        };
        body.enqueue(queues.clone())?;

        Ok(ReaderHandle {
            key,
            queues,
            body: Some(body),
            registry: Arc::clone(self),
        })
    }

    /// Prunes the entry for `key` if its body is gone. Guarded against the
    /// race where another consumer re-created the body in the meantime.
    fn release(&self, key: &SourceKey) {
        let mut bodies = self.bodies.lock().unwrap();
        if let Some(weak) = bodies.get(key) {
            if weak.upgrade().is_none() {
                bodies.remove(key);
            }
        }
    }

    /// Number of live reader bodies.
    pub fn len(&self) -> usize {
        let bodies = self.bodies.lock().unwrap();
        bodies.values().filter(|w| w.upgrade().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total reader bodies ever spawned. Instrumentation for deduplication
    /// checks.
    pub fn bodies_created(&self) -> usize {
        self.bodies_created.load(Ordering::Relaxed)
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A consumer's attachment to a shared reader. Dropping the handle releases
/// the body reference; the last handle to go stops the reader thread and
/// prunes the registry entry.
pub struct ReaderHandle {
    key: SourceKey,
    queues: Arc<StreamQueues>,
    body: Option<Arc<SourceReaderBody>>,
    registry: Arc<ReaderRegistry>,
}

impl ReaderHandle {
    pub fn queues(&self) -> &Arc<StreamQueues> {
        &self.queues
    }

    pub fn key(&self) -> &SourceKey {
        &self.key
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        // Unblock the reader if it is mid-read into this consumer's queues,
        // then release the body before pruning the registry entry.
        self.queues.interrupt();
        self.body.take();
        self.registry.release(&self.key);
    }
}
