//! On-disk segment cache.
//!
//! Raw segments are stored as `{dir}/{track}_seg{NN}.{ext}`. Presence of the
//! file is the only cache key, so a completed file must never be partial:
//! bytes are written to a `.part` sibling and renamed into place.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{BakeError, Result};

/// Directory of cached raw segments.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    dir: PathBuf,
    extension: String,
}

impl SegmentStore {
    /// Creates a store rooted at `dir` holding files with `extension`.
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the canonical path of segment `index` of `track`.
    pub fn path_for(&self, track: &str, index: usize) -> PathBuf {
        self.dir
            .join(format!("{}_seg{:02}.{}", track, index, self.extension))
    }

    /// Checks whether a completed segment file exists.
    pub fn contains(&self, track: &str, index: usize) -> bool {
        fs::metadata(self.path_for(track, index))
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    /// Persists segment bytes atomically and returns the final path.
    pub fn store(&self, track: &str, index: usize, bytes: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| BakeError::io("create segment directory", &self.dir, e))?;

        let path = self.path_for(track, index);
        write_atomic(&path, bytes)?;

        debug!(track, segment = index, bytes = bytes.len(), "segment stored");
        Ok(path)
    }

    /// Removes every file in the store directory.
    pub fn purge(&self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&self.dir).map_err(|e| BakeError::io("remove", &self.dir, e))?;
        info!(dir = %self.dir.display(), "segment cache removed");
        Ok(())
    }
}

/// Writes `bytes` to `{path}.part` and renames it to `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    let mut file = fs::File::create(&part).map_err(|e| BakeError::io("create", &part, e))?;
    file.write_all(bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| BakeError::io("write", &part, e))?;
    drop(file);
    fs::rename(&part, path).map_err(|e| BakeError::io("rename", &part, e))
}
