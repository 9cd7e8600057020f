//! src/store.rs
//!
//! Ordered key-value store interface for the database-backed readers.
//!
//! The storage engine itself is an external collaborator: the pipeline only
//! needs a sequential, read-only cursor with wrap-to-start semantics. The
//! `MemStore` implementation stands in for LevelDB/LMDB-style engines in
//! tests and small jobs.

use anyhow::{ensure, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read-only cursor over an ordered store.
///
/// `key`/`value` may only be called while `valid()` is true.
pub trait Cursor: Send {
    fn seek_to_first(&mut self);
    fn next(&mut self);
    fn valid(&self) -> bool;
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
}

/// An openable source of cursors. One reader thread opens exactly one cursor
/// and owns it for its lifetime.
pub trait Store: Send + Sync {
    fn open_cursor(&self) -> Result<Box<dyn Cursor>>;
}

/// In-memory ordered store.
#[derive(Default)]
pub struct MemStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() == 0
    }
}

impl Store for MemStore {
    fn open_cursor(&self) -> Result<Box<dyn Cursor>> {
        ensure!(!self.entries.is_empty(), "cannot open a cursor over an empty store");
        let entries: Arc<[(Vec<u8>, Vec<u8>)]> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(MemCursor { entries, pos: 0 }))
    }
}

struct MemCursor {
    entries: Arc<[(Vec<u8>, Vec<u8>)]>,
    pos: usize,
}

impl Cursor for MemCursor {
    fn seek_to_first(&mut self) {
        self.pos = 0;
    }

    fn next(&mut self) {
        self.pos += 1;
    }

    fn valid(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn key(&self) -> &[u8] {
        &self.entries[self.pos].0
    }

    fn value(&self) -> &[u8] {
        &self.entries[self.pos].1
    }
}
