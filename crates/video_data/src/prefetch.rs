//! src/prefetch.rs
//!
//! Double-buffered batch assembly.
//!
//! A fixed pool of batch buffers cycles between two queues: the fill thread
//! pops an empty batch from `batch_free`, assembles it item by item from the
//! attached record stream (transforming each record directly into the batch
//! memory and recycling the record), and pushes it to `batch_full`; the
//! consumer pops a finished batch and its guard returns the buffer to
//! `batch_free` on drop. With the consumer behind, the fill thread blocks on
//! `batch_free`; with I/O behind, the consumer blocks on `batch_full`. Either
//! way at most `prefetch_depth` batches exist, ever.

use crate::batch::Batch;
use crate::config::LoaderConfig;
use crate::queue::{is_interrupted, BlockingQueue};
use crate::reader::{ReaderHandle, StreamQueues};
use crate::transform::Transformer;
use anyhow::{Context, Result};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

pub struct Prefetcher {
    batch_free: Arc<BlockingQueue<Batch>>,
    batch_full: Arc<BlockingQueue<Batch>>,
    queues: Arc<StreamQueues>,
    fill: Option<thread::JoinHandle<()>>,
}

impl Prefetcher {
    /// Sizes the batch pool by peeking the first primed record of every
    /// stream (blocking until the reader has primed this consumer), then
    /// starts the fill thread.
    pub fn new(
        handle: &ReaderHandle,
        transformer: Transformer,
        config: &LoaderConfig,
    ) -> Result<Self> {
        let queues = Arc::clone(handle.queues());

        let mut item_dims = Vec::with_capacity(queues.stream_count());
        for stream in 0..queues.stream_count() {
            let head = queues
                .pair(stream)
                .full
                .peek()
                .context("reader shut down before priming finished")?;
            item_dims.push(transformer.output_dims(&head));
        }

        let batch_free = Arc::new(BlockingQueue::new());
        let batch_full = Arc::new(BlockingQueue::new());
        for id in 0..config.prefetch_depth {
            batch_free.push(Batch::new(id, config.batch_size, &item_dims));
        }

        let fill = {
            let batch_free = batch_free.clone();
            let batch_full = batch_full.clone();
            let queues = queues.clone();
            let mut transformer = transformer;
            thread::Builder::new()
                .name(format!("batch-fill-{}", config.name))
                .spawn(move || {
                    match fill_loop(&batch_free, &batch_full, &queues, &mut transformer) {
                        Ok(()) => {}
                        Err(err) if is_interrupted(&err) => {
                            debug!("fill thread interrupted, shutting down");
                        }
                        Err(err) => {
                            error!(error = %format!("{:#}", err), "batch fill failed");
                            panic!("unrecoverable batch fill failure: {:#}", err);
                        }
                    }
                })
                .context("failed to spawn batch fill thread")?
        };

        Ok(Self {
            batch_free,
            batch_full,
            queues,
            fill: Some(fill),
        })
    }

    /// Blocks until a completed batch is ready, overlapping the caller's
    /// compute with the fill thread's I/O. The guard recycles the buffer.
    pub fn next_batch(&self) -> Result<BatchGuard<'_>> {
        let batch = self.batch_full.pop_logged("prefetch queue empty")?;
        Ok(BatchGuard {
            batch: Some(batch),
            free: &self.batch_free,
        })
    }

    /// Completed batches currently waiting. Diagnostic snapshot only.
    pub fn prefetched(&self) -> usize {
        self.batch_full.len()
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        // One stop signal reaches every blocking wait: batch queues for the
        // fill thread and consumer, record queues for the fill thread and,
        // transitively, the reader serving them.
        self.batch_free.interrupt();
        self.batch_full.interrupt();
        self.queues.interrupt();
        if let Some(fill) = self.fill.take() {
            let _ = fill.join();
        }
    }
}

fn fill_loop(
    batch_free: &BlockingQueue<Batch>,
    batch_full: &BlockingQueue<Batch>,
    queues: &StreamQueues,
    transformer: &mut Transformer,
) -> Result<()> {
    loop {
        let mut batch = batch_free.pop_logged("waiting for a free batch buffer")?;
        for item in 0..batch.batch_size() {
            for stream in 0..queues.stream_count() {
                let pair = queues.pair(stream);
                let record = match pair.full.pop_logged("waiting for data") {
                    Ok(record) => record,
                    Err(interrupted) => {
                        // Return the half-filled buffer before unwinding.
                        batch_free.push(batch);
                        return Err(interrupted.into());
                    }
                };

                let label = record.label;
                let transformed = batch
                    .item_slice_mut(stream, item)
                    .and_then(|out| transformer.transform(&record, out));
                // The drained record goes back to the pool regardless.
                pair.free.push(record);
                if let Err(err) = transformed {
                    batch_free.push(batch);
                    return Err(err);
                }
                if stream == 0 {
                    batch.labels[item] = label;
                }
            }
        }
        batch_full.push(batch);
    }
}

/// A completed batch on loan to the consumer; returns the buffer to the free
/// queue when dropped.
pub struct BatchGuard<'a> {
    batch: Option<Batch>,
    free: &'a BlockingQueue<Batch>,
}

impl Deref for BatchGuard<'_> {
    type Target = Batch;

    fn deref(&self) -> &Batch {
        self.batch.as_ref().expect("batch present until drop")
    }
}

impl DerefMut for BatchGuard<'_> {
    fn deref_mut(&mut self) -> &mut Batch {
        self.batch.as_mut().expect("batch present until drop")
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if let Some(batch) = self.batch.take() {
            self.free.push(batch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_recycles_batch_on_drop() {
        let free = BlockingQueue::new();
        let guard = BatchGuard {
            batch: Some(Batch::new(3, 1, &[[1, 1, 1, 1]])),
            free: &free,
        };
        assert_eq!(guard.id, 3);
        drop(guard);
        assert_eq!(free.len(), 1);
        assert_eq!(free.try_pop().map(|b| b.id), Some(3));
    }
}
