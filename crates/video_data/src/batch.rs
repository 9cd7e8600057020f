//! src/batch.rs
//!
//! Fixed-capacity batch buffers. A loader owns a small pool of these; they
//! are allocated once at setup and then only cycle between the free queue,
//! the full queue, the fill thread, and the consumer.

use anyhow::{anyhow, Result};
use ndarray::{ArrayD, Axis, IxDyn};

/// One batch of transformed items: one dense array per stream (shape
/// `[B, C, H, W]`, or `[B, C, L, H, W]` for temporal layouts) plus labels.
pub struct Batch {
    /// Stable identity within the pool, for diagnostics and pool-integrity
    /// assertions.
    pub id: usize,
    pub data: Vec<ArrayD<f32>>,
    pub labels: Vec<i32>,
}

impl Batch {
    /// Allocates one batch for `batch_size` items with the given per-stream
    /// item dimensions `[channels, length, height, width]`; a length of 1
    /// collapses into a 4-d batch.
    pub fn new(id: usize, batch_size: usize, item_dims: &[[usize; 4]]) -> Self {
        let data = item_dims
            .iter()
            .map(|&[c, l, h, w]| {
                let shape: Vec<usize> = if l > 1 {
                    vec![batch_size, c, l, h, w]
                } else {
                    vec![batch_size, c, h, w]
                };
                ArrayD::zeros(IxDyn(&shape))
            })
            .collect();
        Self {
            id,
            data,
            labels: vec![0; batch_size],
        }
    }

    pub fn batch_size(&self) -> usize {
        self.labels.len()
    }

    /// Mutable flat view of one item of one stream, for the transform to
    /// write into.
    pub(crate) fn item_slice_mut(&mut self, stream: usize, item: usize) -> Result<&mut [f32]> {
        let view = self.data[stream].index_axis_mut(Axis(0), item);
        // Axis-0 slices of a freshly allocated array are contiguous.
        view.into_slice()
            .ok_or_else(|| anyhow!("batch buffer is not contiguous"))
    }
}
