//! src/frames.rs
//!
//! Loads snippet windows from clip directories of per-frame images and lays
//! them out into a [`Record`].
//!
//! Frame files are 1-indexed: `img_00001.jpg` for rgb, `flow_x_00001.jpg` /
//! `flow_y_00001.jpg` for optical flow. Two payload layouts exist:
//!
//! - flat: frames fold into the channel axis, `channels = per_frame * L`,
//!   `length = 1`
//! - temporal: the frame axis survives, `channels = per_frame`, `length = L`
//!
//! where `L = offsets.len() * snippet_len`. A frame that is missing or fails
//! to decode is a dataset integrity error and propagates; nothing here
//! retries.

use crate::config::Modality;
use crate::record::Record;
use anyhow::{ensure, Context, Result};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage};
use std::path::Path;

fn open_frame(path: &Path, resize: Option<(u32, u32)>) -> Result<DynamicImage> {
    let img = image::open(path)
        .with_context(|| format!("failed to decode frame: {}", path.display()))?;
    Ok(match resize {
        Some((height, width)) => img.resize_exact(width, height, FilterType::Triangle),
        None => img,
    })
}

fn rgb_frame(dir: &Path, frame: u32, resize: Option<(u32, u32)>) -> Result<RgbImage> {
    let path = dir.join(format!("img_{:05}.jpg", frame));
    Ok(open_frame(&path, resize)?.to_rgb8())
}

fn flow_frame(dir: &Path, axis: char, frame: u32, resize: Option<(u32, u32)>) -> Result<GrayImage> {
    let path = dir.join(format!("flow_{}_{:05}.jpg", axis, frame));
    Ok(open_frame(&path, resize)?.to_luma8())
}

/// Reads `snippet_len` frames starting at each 0-based offset and fills
/// `record` in place, reusing its payload allocation.
pub fn fill_from_frames(
    dir: &Path,
    label: i32,
    offsets: &[u32],
    snippet_len: u32,
    modality: Modality,
    resize: Option<(u32, u32)>,
    preserve_temporal: bool,
    record: &mut Record,
) -> Result<()> {
    ensure!(!offsets.is_empty(), "at least one segment offset is required");
    let per_frame = modality.frame_channels();
    let total_frames = offsets.len() as u32 * snippet_len;

    record.clear();
    record.label = label;
    if preserve_temporal {
        record.channels = per_frame;
        record.length = total_frames;
    } else {
        record.channels = per_frame * total_frames;
        record.length = 1;
    }

    let mut dims: Option<(u32, u32)> = None;
    for (seg, &offset) in offsets.iter().enumerate() {
        for f in 0..snippet_len {
            let frame = offset + f + 1; // frame files are 1-indexed
            let slot = seg as u32 * snippet_len + f;
            match modality {
                Modality::Rgb => {
                    let img = rgb_frame(dir, frame, resize)?;
                    write_rgb_planes(record, &mut dims, &img, slot, total_frames, preserve_temporal)?;
                }
                Modality::Flow => {
                    let x = flow_frame(dir, 'x', frame, resize)?;
                    let y = flow_frame(dir, 'y', frame, resize)?;
                    write_flow_planes(record, &mut dims, &x, &y, slot, total_frames, preserve_temporal, false)?;
                }
                Modality::ColorFlow => {
                    let x = flow_frame(dir, 'x', frame, resize)?;
                    let y = flow_frame(dir, 'y', frame, resize)?;
                    write_flow_planes(record, &mut dims, &x, &y, slot, total_frames, preserve_temporal, true)?;
                }
            }
        }
    }
    Ok(())
}

/// On the first frame, fixes the record's spatial dimensions and sizes the
/// payload; afterwards, enforces that every frame matches.
fn settle_dims(
    record: &mut Record,
    dims: &mut Option<(u32, u32)>,
    height: u32,
    width: u32,
) -> Result<()> {
    match *dims {
        None => {
            *dims = Some((height, width));
            record.height = height;
            record.width = width;
            record.payload.resize(record.element_count(), 0);
            Ok(())
        }
        Some((h, w)) => {
            ensure!(
                (h, w) == (height, width),
                "inconsistent frame dimensions within clip: {}x{} vs {}x{}",
                h,
                w,
                height,
                width
            );
            Ok(())
        }
    }
}

fn plane_start(record: &Record, channel: u32, slot: u32, total_frames: u32, temporal: bool) -> usize {
    let hw = (record.height * record.width) as usize;
    if temporal {
        (channel * total_frames + slot) as usize * hw
    } else {
        let per_frame = record.channels / total_frames;
        (slot * per_frame + channel) as usize * hw
    }
}

fn write_rgb_planes(
    record: &mut Record,
    dims: &mut Option<(u32, u32)>,
    img: &RgbImage,
    slot: u32,
    total_frames: u32,
    temporal: bool,
) -> Result<()> {
    let (width, height) = img.dimensions();
    settle_dims(record, dims, height, width)?;
    let raw = img.as_raw();
    let hw = (height * width) as usize;
    for c in 0..3 {
        let start = plane_start(record, c, slot, total_frames, temporal);
        for i in 0..hw {
            record.payload[start + i] = raw[i * 3 + c as usize];
        }
    }
    Ok(())
}

fn write_flow_planes(
    record: &mut Record,
    dims: &mut Option<(u32, u32)>,
    x: &GrayImage,
    y: &GrayImage,
    slot: u32,
    total_frames: u32,
    temporal: bool,
    with_magnitude: bool,
) -> Result<()> {
    let (width, height) = x.dimensions();
    ensure!(
        y.dimensions() == (width, height),
        "flow x/y frames disagree on dimensions"
    );
    settle_dims(record, dims, height, width)?;
    let hw = (height * width) as usize;
    let x_raw = x.as_raw();
    let y_raw = y.as_raw();

    let x_start = plane_start(record, 0, slot, total_frames, temporal);
    let y_start = plane_start(record, 1, slot, total_frames, temporal);
    record.payload[x_start..x_start + hw].copy_from_slice(x_raw);
    record.payload[y_start..y_start + hw].copy_from_slice(y_raw);

    if with_magnitude {
        // Third plane: displacement magnitude around the 128 rest point.
        let m_start = plane_start(record, 2, slot, total_frames, temporal);
        for i in 0..hw {
            let dx = x_raw[i] as f32 - 128.0;
            let dy = y_raw[i] as f32 - 128.0;
            record.payload[m_start + i] = (dx * dx + dy * dy).sqrt().min(255.0) as u8;
        }
    }
    Ok(())
}
