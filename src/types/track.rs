//! Track, segment and assembled-track types.
//!
//! A [`TrackSpec`] is configuration data describing one music track as an
//! ordered list of prompt variations. Each variation becomes one [`Segment`];
//! the assembler turns the segments into one [`AssembledTrack`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use super::plan::MergeStrategy;

/// Default nominal length of one generated segment in seconds.
pub const DEFAULT_SEGMENT_SECONDS: f64 = 22.0;

fn default_segment_seconds() -> f64 {
    DEFAULT_SEGMENT_SECONDS
}

/// Definition of one music track.
///
/// Immutable once loaded from the catalog. The order of `variations` is the
/// temporal order of the segments in the final track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSpec {
    /// Asset key, also the output file stem (e.g. "music-title").
    pub key: String,

    /// Style description shared by every segment.
    pub base: String,

    /// Per-segment prompt fragments, appended to `base`.
    pub variations: Vec<String>,

    /// Nominal length of each segment in seconds.
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: f64,
}

impl TrackSpec {
    /// Returns the number of segments this track is built from.
    pub fn segment_count(&self) -> usize {
        self.variations.len()
    }

    /// Returns the generation prompt for segment `index`.
    pub fn prompt_for(&self, index: usize) -> Option<String> {
        self.variations
            .get(index)
            .map(|variation| format!("{}, {}", self.base, variation))
    }
}

/// One independently generated audio clip belonging to a track.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Key of the owning track.
    pub track: String,
    /// 0-based position in the track.
    pub index: usize,
    /// Audio file on disk. Never modified in place.
    pub path: PathBuf,
    /// Measured duration in seconds.
    pub duration_sec: f64,
}

impl Segment {
    /// Returns a new segment with the same identity backed by another file.
    pub fn derived(&self, path: PathBuf, duration_sec: f64) -> Self {
        Self {
            track: self.track.clone(),
            index: self.index,
            path,
            duration_sec,
        }
    }
}

/// The final continuous audio asset for one track.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledTrack {
    /// Key of the track this asset was built from.
    pub key: String,
    /// Path of the encoded output.
    pub path: PathBuf,
    /// Strategy that produced it.
    pub strategy: MergeStrategy,
    /// Number of segments merged.
    pub segment_count: usize,
    /// Duration predicted from the plan and the segments.
    pub expected_duration_sec: f64,
    /// Duration probed from the output file.
    pub measured_duration_sec: f64,
    /// SHA-256 of the output file, 16 hex characters.
    pub digest: String,
}

impl AssembledTrack {
    /// Difference between the measured and the predicted duration.
    pub fn duration_drift(&self) -> f64 {
        self.measured_duration_sec - self.expected_duration_sec
    }
}

/// Computes a short content digest of a file.
///
/// The digest is the first 16 hex characters of the SHA-256 of the file
/// bytes, used to confirm that re-assembly reproduces identical output.
pub fn file_digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let result = hasher.finalize();
    Ok(hex::encode(&result[..8]))
}
