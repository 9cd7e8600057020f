use image::{GrayImage, Luma, Rgb, RgbImage};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use video_data::{MemStore, Record};

/// Builds an ordered store of `n` records whose label equals their cursor
/// position and whose payload is the label repeated, 1x2x2 each.
pub fn labeled_store(n: i32) -> Arc<MemStore> {
    let mut store = MemStore::new();
    for i in 0..n {
        let record = Record {
            payload: vec![i as u8; 4],
            float_data: vec![],
            channels: 1,
            length: 1,
            height: 2,
            width: 2,
            label: i,
            encoded: false,
        };
        store.insert(format!("{:08}", i).into_bytes(), record.encode());
    }
    Arc::new(store)
}

/// Writes `frames` rgb frames plus matching flow x/y frames into `dir`,
/// 1-indexed, all 4x4.
pub fn write_clip_frames(dir: &Path, frames: u32) {
    for frame in 1..=frames {
        let rgb = RgbImage::from_pixel(4, 4, Rgb([frame as u8, 50, 100]));
        rgb.save(dir.join(format!("img_{:05}.jpg", frame))).unwrap();
        let x = GrayImage::from_pixel(4, 4, Luma([120]));
        let y = GrayImage::from_pixel(4, 4, Luma([130]));
        x.save(dir.join(format!("flow_x_{:05}.jpg", frame))).unwrap();
        y.save(dir.join(format!("flow_y_{:05}.jpg", frame))).unwrap();
    }
}

/// Creates `clips` frame directories and a manifest listing them as
/// `<dir> 1 <label>`. Returns the root tempdir and the manifest path.
pub fn snippet_dataset(clips: u32, frames_per_clip: u32) -> (TempDir, std::path::PathBuf) {
    let root = TempDir::new().unwrap();
    let manifest_path = root.path().join("list.txt");
    let mut lines = String::new();
    for clip in 0..clips {
        let clip_dir = root.path().join(format!("clip{}", clip));
        std::fs::create_dir(&clip_dir).unwrap();
        write_clip_frames(&clip_dir, frames_per_clip);
        lines.push_str(&format!("{} 1 {}\n", clip_dir.display(), clip));
    }
    std::fs::write(&manifest_path, lines).unwrap();
    (root, manifest_path)
}
