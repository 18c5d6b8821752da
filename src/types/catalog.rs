//! Declarative asset catalog.
//!
//! The catalog lists every asset a run produces: one-shot sound effects,
//! spoken voice lines, and multi-segment music tracks. It is plain data;
//! the built-in catalog is embedded from `catalog/default.json`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use super::track::TrackSpec;
use crate::error::{BakeError, ErrorCode, Result};

const BUILTIN_CATALOG: &str = include_str!("../../catalog/default.json");

/// A one-shot sound effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipSpec {
    /// Asset key, also the output file stem.
    pub key: String,
    /// Generation prompt.
    pub prompt: String,
    /// Requested duration; the service picks one when absent.
    #[serde(default)]
    pub duration_sec: Option<f64>,
}

/// A text-to-speech line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceLine {
    /// Spoken text.
    pub text: String,
    /// Voice name, resolved through [`VoiceCatalog::voice_ids`].
    pub voice: String,
    /// Output file name inside the voices directory.
    pub filename: String,
}

impl VoiceLine {
    /// Manifest key for this line: `"{text}||{voice}"`.
    pub fn manifest_key(&self) -> String {
        format!("{}||{}", self.text, self.voice)
    }
}

/// Voice lines plus the voice-name to voice-id table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VoiceCatalog {
    /// Speech model identifier sent with every request.
    #[serde(default = "default_voice_model")]
    pub model_id: String,
    /// Voice used when a line's voice has no entry in `voice_ids`.
    #[serde(default)]
    pub default_voice: Option<String>,
    /// Voice name to service voice id.
    #[serde(default)]
    pub voice_ids: BTreeMap<String, String>,
    #[serde(default)]
    pub lines: Vec<VoiceLine>,
}

fn default_voice_model() -> String {
    "eleven_multilingual_v2".to_string()
}

impl VoiceCatalog {
    /// Resolves the service voice id for a voice name.
    pub fn voice_id(&self, voice: &str) -> Option<&str> {
        self.voice_ids
            .get(voice)
            .or_else(|| {
                self.default_voice
                    .as_ref()
                    .and_then(|fallback| self.voice_ids.get(fallback))
            })
            .map(String::as_str)
    }
}

/// Every asset produced by a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub sfx: Vec<ClipSpec>,
    #[serde(default)]
    pub voices: VoiceCatalog,
    #[serde(default)]
    pub music: Vec<TrackSpec>,
}

impl Catalog {
    /// Returns the catalog compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_CATALOG)
    }

    /// Loads and validates a catalog file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            BakeError::with_source(
                ErrorCode::InvalidCatalog,
                format!("Failed to read catalog {}", path.display()),
                e,
            )
        })?;
        Self::parse(&text)
    }

    /// Parses and validates catalog JSON.
    pub fn parse(text: &str) -> Result<Self> {
        let catalog: Catalog = serde_json::from_str(text).map_err(|e| {
            BakeError::with_source(ErrorCode::InvalidCatalog, "Malformed catalog JSON", e)
        })?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Keeps only the entries whose key appears in `keys`.
    ///
    /// Voice lines are matched by file name.
    pub fn retain_keys(&mut self, keys: &[String]) {
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        self.sfx.retain(|clip| wanted.contains(clip.key.as_str()));
        self.music.retain(|track| wanted.contains(track.key.as_str()));
        self.voices
            .lines
            .retain(|line| wanted.contains(line.filename.as_str()));
    }

    /// Total number of music segments across all tracks.
    pub fn segment_total(&self) -> usize {
        self.music.iter().map(TrackSpec::segment_count).sum()
    }

    fn validate(&self) -> Result<()> {
        let mut keys = HashSet::new();
        for key in self
            .sfx
            .iter()
            .map(|clip| &clip.key)
            .chain(self.music.iter().map(|track| &track.key))
        {
            if key.is_empty() || key.contains(['/', '\\']) {
                return Err(invalid(format!("invalid asset key {:?}", key)));
            }
            if !keys.insert(key.as_str()) {
                return Err(invalid(format!("duplicate asset key {:?}", key)));
            }
        }

        for track in &self.music {
            if track.variations.is_empty() {
                return Err(invalid(format!("track {} has no variations", track.key)));
            }
            if track.segment_seconds <= 0.0 {
                return Err(invalid(format!(
                    "track {} has a non-positive segment duration",
                    track.key
                )));
            }
        }

        let mut filenames = HashSet::new();
        for line in &self.voices.lines {
            if !filenames.insert(line.filename.as_str()) {
                return Err(invalid(format!("duplicate voice file {:?}", line.filename)));
            }
            if self.voices.voice_id(&line.voice).is_none() {
                return Err(invalid(format!(
                    "voice {:?} of {:?} has no voice id",
                    line.voice, line.filename
                )));
            }
        }

        Ok(())
    }
}

fn invalid(message: String) -> BakeError {
    BakeError::new(ErrorCode::InvalidCatalog, message)
}
