//! Asset manifests.
//!
//! A manifest maps each asset key to the file name of its output, relative
//! to the manifest's directory. Keys are sorted so rewrites are stable.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BakeError, ErrorCode, Result};

/// Sorted asset key to file name map, serialized as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, filename: impl Into<String>) {
        self.entries.insert(key.into(), filename.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pretty JSON with a trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self).map_err(|e| {
            BakeError::with_source(ErrorCode::Io, "Failed to encode manifest", e)
        })?;
        json.push('\n');
        Ok(json)
    }

    /// Writes the manifest to `path`, creating its directory if needed.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BakeError::io("create manifest directory", parent, e))?;
        }
        std::fs::write(path, self.to_json()?).map_err(|e| BakeError::io("write", path, e))?;
        info!(path = %path.display(), entries = self.len(), "manifest written");
        Ok(())
    }
}
