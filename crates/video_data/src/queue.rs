//! src/queue.rs
//!
//! Blocking FIFO used for every cross-thread handoff in the pipeline.
//!
//! The queue itself is unbounded: capacity is bounded indirectly by the
//! record/batch pools cycling through it, so `push` never blocks. `pop` and
//! `peek` block, and both observe the queue's interrupt flag so a single
//! shutdown signal unblocks every waiting thread.

use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::{Condvar, Mutex, MutexGuard};
use tracing::debug;

/// Returned from a blocking wait that was cut short by [`BlockingQueue::interrupt`].
///
/// This is the cancellation path: callers unwind and drain rather than treat
/// it as a data error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue wait interrupted by shutdown")
    }
}

impl std::error::Error for Interrupted {}

/// Returns true when `err` originated from an interrupted queue wait.
pub fn is_interrupted(err: &anyhow::Error) -> bool {
    err.downcast_ref::<Interrupted>().is_some()
}

struct Inner<T> {
    items: VecDeque<T>,
    interrupted: bool,
}

/// Thread-safe blocking FIFO.
pub struct BlockingQueue<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                interrupted: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Appends to the tail and wakes one blocked waiter. Never blocks.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock().unwrap();
        inner.items.push_back(item);
        self.cond.notify_one();
    }

    /// Removes and returns the head, blocking until an item is available.
    pub fn pop(&self) -> Result<T, Interrupted> {
        self.pop_impl(None)
    }

    /// Like [`pop`](Self::pop), but logs `reason` at debug level if the call
    /// actually has to wait.
    pub fn pop_logged(&self, reason: &str) -> Result<T, Interrupted> {
        self.pop_impl(Some(reason))
    }

    fn pop_impl(&self, reason: Option<&str>) -> Result<T, Interrupted> {
        let mut inner = self.inner.lock().unwrap();
        if inner.items.is_empty() {
            if let Some(reason) = reason {
                debug!(reason, "queue empty, waiting");
            }
        }
        loop {
            if inner.interrupted {
                return Err(Interrupted);
            }
            if let Some(item) = inner.items.pop_front() {
                return Ok(item);
            }
            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// Non-blocking pop. Still yields items after an interrupt so teardown
    /// code can drain the queue.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().unwrap().items.pop_front()
    }

    /// Blocks until the queue is non-empty, then returns a guard borrowing the
    /// head without removing it. The queue is locked for the guard's lifetime,
    /// so hold it briefly.
    pub fn peek(&self) -> Result<PeekGuard<'_, T>, Interrupted> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.interrupted {
                return Err(Interrupted);
            }
            if !inner.items.is_empty() {
                return Ok(PeekGuard { guard: inner });
            }
            inner = self.cond.wait(inner).unwrap();
        }
    }

    /// Racy size snapshot. Suitable for assertions and diagnostics only,
    /// never for control flow.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wakes every blocked waiter; all subsequent blocking calls return
    /// `Err(Interrupted)` immediately.
    pub fn interrupt(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.interrupted = true;
        self.cond.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.lock().unwrap().interrupted
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrow of the queue head produced by [`BlockingQueue::peek`].
pub struct PeekGuard<'a, T> {
    guard: MutexGuard<'a, Inner<T>>,
}

impl<T> Deref for PeekGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.items.front().expect("peek guard holds the lock on a non-empty queue")
    }
}
