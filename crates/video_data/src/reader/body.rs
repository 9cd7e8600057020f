//! src/reader/body.rs
//!
//! The background worker owning one source. Lifecycle:
//!
//! 1. Created: the read strategy (cursor or manifest) is opened on the
//!    attaching thread so open failures surface to the caller, then the
//!    reader thread starts.
//! 2. Priming: one attachment is popped off the attach channel per expected
//!    replica, and exactly one record is read into it before waiting for the
//!    next. This pins the replica-to-shard assignment to attach order.
//! 3. Streaming: one record per attached consumer per pass, in priming
//!    order, until stopped. Attachments arriving after priming are a
//!    configuration error (two nets sharing a layer name and source), not a
//!    data error.
//! 4. Stopping: the stop flag plus queue interrupts unblock any wait; the
//!    thread unwinds and is joined on drop.

use super::strategy::ReadStrategy;
use super::StreamQueues;
use crate::config::LoaderConfig;
use crate::queue::is_interrupted;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

/// How often the priming wait rechecks the stop flag.
const ATTACH_POLL_MS: u64 = 100;

pub(crate) struct SourceReaderBody {
    stop: Arc<AtomicBool>,
    attach_tx: Sender<Arc<StreamQueues>>,
    attached: Arc<Mutex<Vec<Arc<StreamQueues>>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SourceReaderBody {
    /// Starts the reader thread over an already opened strategy.
    pub(crate) fn spawn(
        config: &LoaderConfig,
        strategy: Box<dyn ReadStrategy>,
    ) -> Result<Arc<Self>> {
        let replica_count = config.replica_count();
        let (attach_tx, attach_rx) = unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let attached = Arc::new(Mutex::new(Vec::with_capacity(replica_count)));

        let thread = {
            let stop = stop.clone();
            let attached = attached.clone();
            thread::Builder::new()
                .name(format!("source-reader-{}", config.name))
                .spawn(move || run(strategy, attach_rx, stop, attached, replica_count))
                .context("failed to spawn source reader thread")?
        };

        Ok(Arc::new(Self {
            stop,
            attach_tx,
            attached,
            thread: Mutex::new(Some(thread)),
        }))
    }

    /// Hands a freshly attached consumer's queues to the reader thread.
    pub(crate) fn enqueue(&self, queues: Arc<StreamQueues>) -> Result<()> {
        self.attach_tx
            .send(queues)
            .map_err(|_| anyhow!("reader thread is no longer accepting attachments"))
    }
}

impl Drop for SourceReaderBody {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for queues in self.attached.lock().unwrap().iter() {
            queues.interrupt();
        }
        if let Some(thread) = self.thread.lock().unwrap().take() {
            let _ = thread.join();
        }
    }
}

fn run(
    mut strategy: Box<dyn ReadStrategy>,
    attach_rx: Receiver<Arc<StreamQueues>>,
    stop: Arc<AtomicBool>,
    attached: Arc<Mutex<Vec<Arc<StreamQueues>>>>,
    replica_count: usize,
) {
    // Priming: read one record per replica as it attaches, so every replica
    // starts at a deterministic shard offset and can peek a record during its
    // own setup before the steady-state rotation begins.
    let mut queues = Vec::with_capacity(replica_count);
    for _ in 0..replica_count {
        let qs = loop {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            match attach_rx.recv_timeout(Duration::from_millis(ATTACH_POLL_MS)) {
                Ok(qs) => break qs,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        };
        attached.lock().unwrap().push(qs.clone());
        if !read_one_checked(strategy.as_mut(), &qs, &stop) {
            return;
        }
        queues.push(qs);
    }

    // Steady state: strict attach-ordered rotation, one record per consumer
    // per pass.
    while !stop.load(Ordering::Relaxed) {
        for qs in &queues {
            if !read_one_checked(strategy.as_mut(), qs, &stop) {
                return;
            }
        }
        // A consumer attaching after priming means two nets share a source
        // key, or the replica count is wrong. Not recoverable.
        if !attach_rx.is_empty() {
            error!(
                expected = replica_count,
                "consumer attached to a reader after priming finished"
            );
            panic!("more consumers attached than the configured replica count");
        }
    }
}

/// Runs one read; returns false when the thread should exit. A queue
/// interrupt is the expected shutdown path, anything else is a dataset or
/// configuration failure and is fatal.
fn read_one_checked(
    strategy: &mut dyn ReadStrategy,
    queues: &StreamQueues,
    stop: &AtomicBool,
) -> bool {
    match strategy.read_one(queues) {
        Ok(()) => true,
        Err(err) if is_interrupted(&err) => {
            debug!("reader interrupted, shutting down");
            false
        }
        Err(err) => {
            if stop.load(Ordering::Relaxed) {
                return false;
            }
            error!(error = %format!("{:#}", err), "failed to read record");
            panic!("unrecoverable read failure: {:#}", err);
        }
    }
}
