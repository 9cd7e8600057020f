//! src/sampler.rs
//!
//! Temporal window sampling.
//!
//! A clip of `total_frames` frames is divided into `num_segments` equal
//! segments and one snippet of `snippet_len` contiguous frames is placed in
//! each: uniformly at random within the segment when training, centered when
//! testing. The returned offsets are 0-based frame indices, consumed
//! immediately by the strategy that requested them.

use crate::config::Phase;
use anyhow::{ensure, Result};
use rand::rngs::StdRng;
use rand::Rng;

/// Computes one snippet start offset per segment.
///
/// Requires each segment to be at least `snippet_len` frames long; a clip too
/// short for the requested window is a caller error, not a silent wrap.
pub fn segment_offsets(
    phase: Phase,
    total_frames: u32,
    num_segments: u32,
    snippet_len: u32,
    rng: &mut StdRng,
) -> Result<Vec<u32>> {
    ensure!(num_segments > 0, "num_segments must be greater than 0");
    ensure!(snippet_len > 0, "snippet_len must be greater than 0");

    let average_duration = total_frames / num_segments;
    ensure!(
        average_duration >= snippet_len,
        "segment of {} frames ({} frames / {} segments) cannot hold a {}-frame snippet",
        average_duration,
        total_frames,
        num_segments,
        snippet_len
    );

    let slack = average_duration - snippet_len;
    let offsets = (0..num_segments)
        .map(|i| {
            let within = match phase {
                Phase::Train => rng.random_range(0..=slack),
                Phase::Test => (slack + 1) / 2,
            };
            within + i * average_duration
        })
        .collect();
    Ok(offsets)
}
