//! src/manifest.rs
//!
//! Plain-text manifests listing one clip per line:
//!
//! ```text
//! <path> <frames> <label>
//! ```
//!
//! where `<frames>` is either the clip length or a 1-based start frame,
//! depending on which reader variant consumes the manifest. Reaching the end
//! of the list is steady-state behavior: the reader rewinds to line 0 (and
//! reshuffles when shuffling is enabled). Paired rgb/flow manifests must
//! match line for line and rewind together.

use anyhow::{bail, ensure, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub path: PathBuf,
    /// Clip length or 1-based start frame, depending on the manifest flavor.
    pub frames: u32,
    pub label: i32,
}

fn parse_line(line: &str, line_num: usize, path: &Path) -> Result<ManifestEntry> {
    let mut fields = line.split_whitespace();
    let (Some(clip), Some(frames), Some(label)) = (fields.next(), fields.next(), fields.next())
    else {
        bail!(
            "malformed manifest line {} in {}: expected `<path> <frames> <label>`, got {:?}",
            line_num,
            path.display(),
            line
        );
    };
    Ok(ManifestEntry {
        path: PathBuf::from(clip),
        frames: frames.parse().with_context(|| {
            format!("invalid frame count on line {} of {}", line_num, path.display())
        })?,
        label: label.parse().with_context(|| {
            format!("invalid label on line {} of {}", line_num, path.display())
        })?,
    })
}

fn read_entries(path: &Path) -> Result<Vec<ManifestEntry>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to open manifest: {}", path.display()))?;
    let mut entries = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        entries.push(parse_line(line, i + 1, path)?);
    }
    ensure!(!entries.is_empty(), "manifest is empty: {}", path.display());
    Ok(entries)
}

/// A single manifest with circular iteration.
pub struct Manifest {
    entries: Vec<ManifestEntry>,
    pos: usize,
    rng: Option<StdRng>,
}

impl Manifest {
    /// Loads the manifest eagerly. With `shuffle`, entries are permuted on
    /// load and again on every rewind, deterministically under `seed`.
    pub fn open(path: &Path, shuffle: bool, seed: u64) -> Result<Self> {
        let entries = read_entries(path)?;
        info!(manifest = %path.display(), clips = entries.len(), "loaded manifest");
        let mut manifest = Self {
            entries,
            pos: 0,
            rng: shuffle.then(|| StdRng::seed_from_u64(seed)),
        };
        manifest.maybe_shuffle();
        Ok(manifest)
    }

    fn maybe_shuffle(&mut self) {
        if let Some(rng) = self.rng.as_mut() {
            self.entries.shuffle(rng);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the next entry, rewinding (and reshuffling) after the last.
    pub fn next_entry(&mut self) -> ManifestEntry {
        let entry = self.entries[self.pos].clone();
        self.pos += 1;
        if self.pos >= self.entries.len() {
            debug!("restarting manifest from the beginning");
            self.pos = 0;
            self.maybe_shuffle();
        }
        entry
    }
}

/// Paired rgb/flow manifests with strict one-to-one line correspondence.
pub struct PairedManifest {
    pairs: Vec<(ManifestEntry, ManifestEntry)>,
    pos: usize,
    rng: Option<StdRng>,
}

impl PairedManifest {
    pub fn open(rgb: &Path, flow: &Path, shuffle: bool, seed: u64) -> Result<Self> {
        let rgb_entries = read_entries(rgb)?;
        let flow_entries = read_entries(flow)?;
        ensure!(
            rgb_entries.len() == flow_entries.len(),
            "paired manifests must have the same length: {} has {} lines, {} has {}",
            rgb.display(),
            rgb_entries.len(),
            flow.display(),
            flow_entries.len()
        );
        info!(
            rgb = %rgb.display(),
            flow = %flow.display(),
            clips = rgb_entries.len(),
            "loaded paired manifests"
        );
        let mut manifest = Self {
            pairs: rgb_entries.into_iter().zip(flow_entries).collect(),
            pos: 0,
            rng: shuffle.then(|| StdRng::seed_from_u64(seed)),
        };
        manifest.maybe_shuffle();
        Ok(manifest)
    }

    fn maybe_shuffle(&mut self) {
        if let Some(rng) = self.rng.as_mut() {
            // Pairs shuffle as units so rgb and flow stay in lockstep.
            self.pairs.shuffle(rng);
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Returns the next rgb/flow pair, rewinding both streams together.
    pub fn next_pair(&mut self) -> (ManifestEntry, ManifestEntry) {
        let pair = self.pairs[self.pos].clone();
        self.pos += 1;
        if self.pos >= self.pairs.len() {
            debug!("restarting paired manifests from the beginning");
            self.pos = 0;
            self.maybe_shuffle();
        }
        pair
    }
}
