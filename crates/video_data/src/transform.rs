//! src/transform.rs
//!
//! Per-item transform applied while a batch is being filled: optional crop,
//! optional horizontal mirror, scaling, and per-channel mean subtraction,
//! written directly into the destination batch slice.
//!
//! Train phase draws a random crop position and mirror flip per item from a
//! seeded rng; test phase uses the deterministic center crop. Evaluation can
//! instead request one of the ten canonical views (four corners plus center,
//! each mirrored) through [`View::ten_view`].

use crate::config::Phase;
use crate::record::Record;
use anyhow::{ensure, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Transform parameters shared by every item of a loader.
#[derive(Debug, Clone)]
pub struct TransformConfig {
    /// Square crop edge; 0 disables cropping.
    pub crop_size: u32,
    /// Allow horizontal mirroring in train phase.
    pub mirror: bool,
    /// Multiplier applied after mean subtraction.
    pub scale: f32,
    /// Per-channel means, cycled over the channel axis. One value applies to
    /// all channels; empty disables mean subtraction.
    pub mean_values: Vec<f32>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            crop_size: 0,
            mirror: false,
            scale: 1.0,
            mean_values: Vec::new(),
        }
    }
}

/// A concrete crop/mirror placement for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct View {
    pub h_off: u32,
    pub w_off: u32,
    pub mirror: bool,
}

impl View {
    /// The whole frame, unmirrored.
    pub fn full() -> Self {
        Self { h_off: 0, w_off: 0, mirror: false }
    }

    /// Center crop, unmirrored.
    pub fn center(height: u32, width: u32, crop: u32) -> Self {
        Self {
            h_off: (height - crop) / 2,
            w_off: (width - crop) / 2,
            mirror: false,
        }
    }

    /// One of the ten canonical evaluation views: index 0-4 are the four
    /// corners then the center, 5-9 repeat them mirrored.
    pub fn ten_view(view: usize, height: u32, width: u32, crop: u32) -> Result<Self> {
        ensure!(view < 10, "view index must be in 0..10, got {}", view);
        let h_max = height - crop;
        let w_max = width - crop;
        let (h_off, w_off) = match view % 5 {
            0 => (0, 0),
            1 => (0, w_max),
            2 => (h_max, 0),
            3 => (h_max, w_max),
            _ => (h_max / 2, w_max / 2),
        };
        Ok(Self { h_off, w_off, mirror: view >= 5 })
    }
}

/// Applies the configured transform to pooled records, one item at a time.
///
/// Owned by a single fill thread; the rng advances once per train-phase item,
/// so a fixed seed reproduces the exact augmentation sequence.
pub struct Transformer {
    config: TransformConfig,
    phase: Phase,
    rng: StdRng,
}

impl Transformer {
    pub fn new(config: TransformConfig, phase: Phase, seed: u64) -> Self {
        Self {
            config,
            phase,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Output dimensions `[channels, length, height, width]` for a record
    /// under this transform.
    pub fn output_dims(&self, record: &Record) -> [usize; 4] {
        let (h, w) = if self.config.crop_size > 0 {
            (self.config.crop_size, self.config.crop_size)
        } else {
            (record.height, record.width)
        };
        [record.channels as usize, record.length as usize, h as usize, w as usize]
    }

    /// Transforms one record into `out`, choosing the view per phase: random
    /// crop and mirror when training, center crop otherwise.
    pub fn transform(&mut self, record: &Record, out: &mut [f32]) -> Result<()> {
        let view = self.pick_view(record);
        self.transform_view(record, view, out)
    }

    fn pick_view(&mut self, record: &Record) -> View {
        let crop = self.config.crop_size;
        if crop == 0 || crop > record.height.min(record.width) {
            // An oversized crop falls through to transform_view, which
            // rejects it against the input dimensions.
            return View::full();
        }
        match self.phase {
            Phase::Train => View {
                h_off: self.rng.random_range(0..=record.height - crop),
                w_off: self.rng.random_range(0..=record.width - crop),
                mirror: self.config.mirror && self.rng.random_bool(0.5),
            },
            Phase::Test => View::center(record.height, record.width, crop),
        }
    }

    /// Transforms one record into `out` with an explicit view (the ten-view
    /// evaluation path). `out` must hold exactly the product of
    /// [`output_dims`](Self::output_dims).
    pub fn transform_view(&self, record: &Record, view: View, out: &mut [f32]) -> Result<()> {
        // Records carrying an encoded image are decoded to planar bytes
        // here; a payload that fails to decode is a dataset defect.
        let decoded = if record.encoded {
            Some(decode_payload(record)?)
        } else {
            None
        };
        let dims = self.output_dims(record);
        let expected: usize = dims.iter().product();
        ensure!(
            out.len() == expected,
            "output slice holds {} elements, transform produces {}",
            out.len(),
            expected
        );

        let (channels, length) = (record.channels as usize, record.length as usize);
        let (in_h, in_w) = (record.height as usize, record.width as usize);
        let (out_h, out_w) = (dims[2], dims[3]);
        let (h_off, w_off) = (view.h_off as usize, view.w_off as usize);
        ensure!(
            h_off + out_h <= in_h && w_off + out_w <= in_w,
            "crop window {}x{} at ({}, {}) exceeds input {}x{}",
            out_h,
            out_w,
            h_off,
            w_off,
            in_h,
            in_w
        );

        let means = &self.config.mean_values;
        let scale = self.config.scale;
        for c in 0..channels {
            let mean = if means.is_empty() { 0.0 } else { means[c % means.len()] };
            for l in 0..length {
                let in_plane = (c * length + l) * in_h * in_w;
                let out_plane = (c * length + l) * out_h * out_w;
                for y in 0..out_h {
                    let in_row = in_plane + (y + h_off) * in_w + w_off;
                    let out_row = out_plane + y * out_w;
                    for x in 0..out_w {
                        let out_x = if view.mirror { out_w - 1 - x } else { x };
                        let value = match &decoded {
                            Some(planes) => planes[in_row + x] as f32,
                            None => record.value_at(in_row + x),
                        };
                        out[out_row + out_x] = (value - mean) * scale;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Decodes an image payload into channel planes matching the record's
/// declared dimensions.
fn decode_payload(record: &Record) -> Result<Vec<u8>> {
    ensure!(
        record.channels == 3 && record.length == 1,
        "encoded records must be single 3-channel images"
    );
    let img = image::load_from_memory(&record.payload)
        .context("undecodable media payload")?
        .to_rgb8();
    let (width, height) = img.dimensions();
    ensure!(
        (height, width) == (record.height, record.width),
        "encoded payload is {}x{}, record metadata says {}x{}",
        height,
        width,
        record.height,
        record.width
    );
    let raw = img.as_raw();
    let hw = (height * width) as usize;
    let mut planes = vec![0u8; 3 * hw];
    for i in 0..hw {
        for c in 0..3 {
            planes[c * hw + i] = raw[i * 3 + c];
        }
    }
    Ok(planes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Phase;

    /// 1-channel 1-frame record counting up row-major: 3x3 -> 0..9.
    fn counting_record(height: u32, width: u32) -> Record {
        Record {
            payload: (0..height * width).map(|v| v as u8).collect(),
            float_data: vec![],
            channels: 1,
            length: 1,
            height,
            width,
            label: 0,
            encoded: false,
        }
    }

    fn transformer(config: TransformConfig, phase: Phase) -> Transformer {
        Transformer::new(config, phase, 0)
    }

    #[test]
    fn test_identity_transform() -> Result<()> {
        let record = counting_record(2, 3);
        let mut t = transformer(TransformConfig::default(), Phase::Test);
        let mut out = vec![0.0; 6];
        t.transform(&record, &mut out)?;
        assert_eq!(out, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        Ok(())
    }

    #[test]
    fn test_scale_and_mean() -> Result<()> {
        let record = counting_record(1, 4);
        let config = TransformConfig {
            scale: 0.5,
            mean_values: vec![2.0],
            ..TransformConfig::default()
        };
        let mut t = transformer(config, Phase::Test);
        let mut out = vec![0.0; 4];
        t.transform(&record, &mut out)?;
        assert_eq!(out, vec![-1.0, -0.5, 0.0, 0.5]);
        Ok(())
    }

    #[test]
    fn test_center_crop() -> Result<()> {
        let record = counting_record(4, 4);
        let config = TransformConfig { crop_size: 2, ..TransformConfig::default() };
        let mut t = transformer(config, Phase::Test);
        assert_eq!(t.output_dims(&record), [1, 1, 2, 2]);

        let mut out = vec![0.0; 4];
        t.transform(&record, &mut out)?;
        // Center 2x2 of a 4x4 counting grid.
        assert_eq!(out, vec![5.0, 6.0, 9.0, 10.0]);
        Ok(())
    }

    #[test]
    fn test_mirror_reverses_each_row() -> Result<()> {
        let record = counting_record(2, 3);
        let t = transformer(TransformConfig::default(), Phase::Test);
        let view = View { h_off: 0, w_off: 0, mirror: true };
        let mut out = vec![0.0; 6];
        t.transform_view(&record, view, &mut out)?;
        assert_eq!(out, vec![2.0, 1.0, 0.0, 5.0, 4.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_ten_view_geometry() -> Result<()> {
        // 10x10 input, 4x4 crop: corners at 0/6, center at 3.
        let corners = [(0, 0), (0, 6), (6, 0), (6, 6), (3, 3)];
        for (view, &(h, w)) in corners.iter().enumerate() {
            let plain = View::ten_view(view, 10, 10, 4)?;
            assert_eq!((plain.h_off, plain.w_off), (h, w));
            assert!(!plain.mirror);

            let mirrored = View::ten_view(view + 5, 10, 10, 4)?;
            assert_eq!((mirrored.h_off, mirrored.w_off), (h, w));
            assert!(mirrored.mirror);
        }
        assert!(View::ten_view(10, 10, 10, 4).is_err());
        Ok(())
    }

    #[test]
    fn test_train_crops_are_seed_deterministic() -> Result<()> {
        let record = counting_record(8, 8);
        let config = TransformConfig { crop_size: 4, mirror: true, ..TransformConfig::default() };

        let mut a = Transformer::new(config.clone(), Phase::Train, 11);
        let mut b = Transformer::new(config, Phase::Train, 11);
        for _ in 0..10 {
            let mut out_a = vec![0.0; 16];
            let mut out_b = vec![0.0; 16];
            a.transform(&record, &mut out_a)?;
            b.transform(&record, &mut out_b)?;
            assert_eq!(out_a, out_b);
        }
        Ok(())
    }

    #[test]
    fn test_encoded_payload_is_decoded() -> Result<()> {
        use image::{Rgb, RgbImage};
        use std::io::Cursor;

        let img = RgbImage::from_pixel(2, 2, Rgb([40, 80, 120]));
        let mut payload = Vec::new();
        img.write_to(&mut Cursor::new(&mut payload), image::ImageFormat::Png)?;

        let record = Record {
            payload,
            float_data: vec![],
            channels: 3,
            length: 1,
            height: 2,
            width: 2,
            label: 0,
            encoded: true,
        };
        let mut t = transformer(TransformConfig::default(), Phase::Test);
        let mut out = vec![0.0; 12];
        t.transform(&record, &mut out)?;
        // Planar layout: 4 reds, then 4 greens, then 4 blues.
        assert_eq!(&out[0..4], &[40.0; 4]);
        assert_eq!(&out[4..8], &[80.0; 4]);
        assert_eq!(&out[8..12], &[120.0; 4]);
        Ok(())
    }

    #[test]
    fn test_garbage_encoded_payload_rejected() {
        let record = Record {
            payload: vec![1, 2, 3],
            float_data: vec![],
            channels: 3,
            length: 1,
            height: 2,
            width: 2,
            label: 0,
            encoded: true,
        };
        let mut t = transformer(TransformConfig::default(), Phase::Test);
        let mut out = vec![0.0; 12];
        assert!(t.transform(&record, &mut out).is_err());
    }

    #[test]
    fn test_wrong_output_size_rejected() {
        let record = counting_record(2, 2);
        let mut t = transformer(TransformConfig::default(), Phase::Test);
        let mut out = vec![0.0; 3];
        assert!(t.transform(&record, &mut out).is_err());
    }

    #[test]
    fn test_oversized_crop_rejected() {
        let record = counting_record(4, 4);
        let config = TransformConfig { crop_size: 5, ..TransformConfig::default() };
        let mut t = transformer(config, Phase::Train);
        let mut out = vec![0.0; 25];
        assert!(t.transform(&record, &mut out).is_err());
    }
}
