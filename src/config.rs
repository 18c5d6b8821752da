//! Run configuration module.
//!
//! Contains the runtime configuration for soundbake: output locations,
//! audio tool selection, concurrency limits, and the merge plan applied to
//! every music track.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::assembly::{DEFAULT_DURATION_TOLERANCE_SEC, DEFAULT_GUARD_SEC};
use crate::audio::SilenceParams;
use crate::error::{BakeError, ErrorCode, Result};
use crate::source::{RetryPolicy, DEFAULT_REQUEST_TIMEOUT};
use crate::types::MergePlan;

/// Environment variable holding the generation service key.
pub const API_KEY_ENV: &str = "ELEVENLABS_API_KEY";

/// Audio tool implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// External ffmpeg and ffprobe binaries.
    #[default]
    Ffmpeg,
    /// Built-in WAV processing. Segments must be WAV files.
    Native,
}

impl ToolKind {
    /// Returns the string representation of the tool.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Ffmpeg => "ffmpeg",
            ToolKind::Native => "native",
        }
    }

    /// Parses a tool from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "ffmpeg" => Some(ToolKind::Ffmpeg),
            "native" | "wav" => Some(ToolKind::Native),
            _ => None,
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a run does with missing assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Generate missing clips and segments, then assemble tracks.
    #[default]
    Generate,
    /// Only re-assemble tracks from cached segments. No requests are made.
    AssembleOnly,
}

/// Size and pacing of concurrent generation requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Requests issued together.
    pub size: usize,
    /// Pause between batches in milliseconds.
    pub pacing_ms: u64,
}

impl BatchSettings {
    pub fn new(size: usize, pacing_ms: u64) -> Self {
        Self { size, pacing_ms }
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// Runtime configuration for a bake run.
///
/// Typically loaded from environment variables and then overridden by
/// command-line arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BakeConfig {
    /// Directory receiving SFX, music tracks and their manifest.
    pub output_dir: PathBuf,

    /// Directory receiving voice lines and their manifest.
    pub voices_dir: PathBuf,

    /// Segment cache directory.
    /// If None, uses `_segments` inside the output directory.
    pub segments_dir: Option<PathBuf>,

    /// Parent of per-track scratch directories.
    /// If None, uses the platform-specific cache location.
    pub work_dir: Option<PathBuf>,

    /// Audio tool implementation.
    pub tool: ToolKind,

    /// ffmpeg binary.
    pub ffmpeg: PathBuf,

    /// ffprobe binary.
    pub ffprobe: PathBuf,

    /// Deadline for one audio tool invocation in seconds.
    pub tool_timeout_secs: u64,

    /// Deadline for one generation request in seconds.
    pub request_timeout_secs: u64,

    /// Attempts per request for transient failures.
    pub retry_attempts: u32,

    /// Backoff before the first retry in milliseconds.
    pub retry_backoff_ms: u64,

    /// Music tracks processed in parallel.
    pub jobs: usize,

    /// Sound effect request batching.
    pub sfx_batch: BatchSettings,

    /// Voice line request batching.
    pub voice_batch: BatchSettings,

    /// Music segment request batching.
    pub segment_batch: BatchSettings,

    /// How segments are merged.
    pub plan: MergePlan,

    pub mode: RunMode,

    /// Rebuild final tracks that already exist.
    pub reassemble: bool,

    /// Remove the segment cache after a run without failures.
    pub clean: bool,

    /// Keep the scratch directory of a failed track.
    pub keep_intermediates: bool,

    /// Skip the SFX and voice phase.
    pub skip_clips: bool,

    /// Extension of cached raw segments.
    pub segment_extension: String,

    /// Tolerated drift between predicted and probed duration in seconds.
    pub duration_tolerance_sec: f64,

    /// Noise floor of the gap check in dBFS.
    pub gap_noise_db: f64,

    /// Shortest silence the gap check reports, in seconds.
    pub gap_min_sec: f64,

    /// Silence within this many seconds of either track end is not a gap.
    pub gap_guard_sec: f64,

    /// Restrict the run to these asset keys. Empty means everything.
    pub only: Vec<String>,
}

impl BakeConfig {
    /// Creates a new BakeConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a BakeConfig from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `SOUNDBAKE_OUTPUT_DIR` - Output directory for SFX and music
    /// - `SOUNDBAKE_VOICES_DIR` - Output directory for voice lines
    /// - `SOUNDBAKE_SEGMENTS_DIR` - Segment cache directory
    /// - `SOUNDBAKE_FFMPEG` - ffmpeg binary
    /// - `SOUNDBAKE_FFPROBE` - ffprobe binary
    /// - `SOUNDBAKE_TOOL_TIMEOUT` - Tool deadline in seconds
    /// - `SOUNDBAKE_JOBS` - Parallel music tracks
    ///
    /// Falls back to defaults for unset or unparseable variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("SOUNDBAKE_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("SOUNDBAKE_VOICES_DIR") {
            config.voices_dir = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("SOUNDBAKE_SEGMENTS_DIR") {
            config.segments_dir = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("SOUNDBAKE_FFMPEG") {
            config.ffmpeg = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("SOUNDBAKE_FFPROBE") {
            config.ffprobe = PathBuf::from(path);
        }

        if let Ok(timeout_str) = std::env::var("SOUNDBAKE_TOOL_TIMEOUT") {
            if let Ok(timeout) = timeout_str.parse::<u64>() {
                if timeout > 0 {
                    config.tool_timeout_secs = timeout;
                }
            }
        }

        if let Ok(jobs_str) = std::env::var("SOUNDBAKE_JOBS") {
            if let Ok(jobs) = jobs_str.parse::<usize>() {
                if jobs > 0 {
                    config.jobs = jobs;
                }
            }
        }

        config
    }

    /// Returns the effective segment cache path.
    pub fn effective_segments_dir(&self) -> PathBuf {
        if let Some(ref path) = self.segments_dir {
            path.clone()
        } else {
            self.output_dir.join("_segments")
        }
    }

    /// Returns the effective scratch parent, using platform defaults if not specified.
    pub fn effective_work_dir(&self) -> PathBuf {
        if let Some(ref path) = self.work_dir {
            path.clone()
        } else {
            default_work_dir()
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    /// Silence rule of the continuity check.
    pub fn gap_silence(&self) -> SilenceParams {
        SilenceParams {
            noise_db: self.gap_noise_db,
            min_duration_sec: self.gap_min_sec,
        }
    }

    /// Returns true if this run issues generation requests.
    pub fn generates(&self) -> bool {
        self.mode == RunMode::Generate
    }

    /// Returns true if existing final tracks are rebuilt.
    pub fn rebuilds_tracks(&self) -> bool {
        self.reassemble || self.mode == RunMode::AssembleOnly
    }

    /// Validates the configuration.
    ///
    /// Returns an error message if validation fails, None otherwise.
    pub fn validate(&self) -> Option<String> {
        if self.jobs == 0 {
            return Some("jobs must be > 0".to_string());
        }
        if self.jobs > 64 {
            return Some(format!("jobs too high: {} (max 64)", self.jobs));
        }
        for (name, batch) in [
            ("sfx", &self.sfx_batch),
            ("voice", &self.voice_batch),
            ("segment", &self.segment_batch),
        ] {
            if batch.size == 0 {
                return Some(format!("{} batch size must be > 0", name));
            }
        }
        if self.tool_timeout_secs == 0 {
            return Some("tool timeout must be > 0".to_string());
        }
        if self.retry_attempts == 0 {
            return Some("retry attempts must be > 0".to_string());
        }
        if self.tool == ToolKind::Native && self.mode == RunMode::Generate {
            return Some(
                "the native tool reads only WAV segments; use --assemble-only with \
                 cached WAV segments or --tool ffmpeg to generate"
                    .to_string(),
            );
        }
        if self.plan.overlap_sec <= 0.0 {
            return Some(format!("overlap must be > 0, got {}", self.plan.overlap_sec));
        }
        if self.gap_min_sec <= 0.0 {
            return Some(format!("gap minimum must be > 0, got {}", self.gap_min_sec));
        }
        if self.gap_guard_sec < 0.0 {
            return Some(format!("gap guard must be >= 0, got {}", self.gap_guard_sec));
        }
        if self.segment_extension.is_empty() || self.segment_extension.contains('.') {
            return Some(format!(
                "invalid segment extension {:?}",
                self.segment_extension
            ));
        }
        None
    }
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("public/audio"),
            voices_dir: PathBuf::from("public/voices"),
            segments_dir: None,
            work_dir: None,
            tool: ToolKind::default(),
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            tool_timeout_secs: 600,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            retry_attempts: 3,
            retry_backoff_ms: 1000,
            jobs: 1,
            sfx_batch: BatchSettings::new(1, 500),
            voice_batch: BatchSettings::new(3, 200),
            segment_batch: BatchSettings::new(1, 500),
            plan: MergePlan::default(),
            mode: RunMode::default(),
            reassemble: false,
            clean: false,
            keep_intermediates: false,
            skip_clips: false,
            segment_extension: "mp3".to_string(),
            duration_tolerance_sec: DEFAULT_DURATION_TOLERANCE_SEC,
            gap_noise_db: SilenceParams::default().noise_db,
            gap_min_sec: SilenceParams::default().min_duration_sec,
            gap_guard_sec: DEFAULT_GUARD_SEC,
            only: Vec::new(),
        }
    }
}

/// Returns the platform-specific default scratch location.
///
/// Uses the `directories` crate to find appropriate locations:
/// - macOS: ~/Library/Caches/soundbake/scratch
/// - Linux: ~/.cache/soundbake/scratch
/// - Windows: C:\Users\<user>\AppData\Local\soundbake\cache\scratch
fn default_work_dir() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "soundbake") {
        proj_dirs.cache_dir().join("scratch")
    } else {
        // Fallback to the system temp directory
        std::env::temp_dir().join("soundbake")
    }
}

/// Resolves the generation service key.
///
/// The environment variable wins; otherwise `ELEVENLABS_API_KEY = '...'`
/// is looked up in the JavaScript config file.
pub fn resolve_api_key(config_js: &Path) -> Result<String> {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        let key = key.trim().to_string();
        if !key.is_empty() {
            return Ok(key);
        }
    }

    match std::fs::read_to_string(config_js) {
        Ok(text) => api_key_from_js(&text).ok_or_else(BakeError::missing_api_key),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BakeError::missing_api_key()),
        Err(e) => Err(BakeError::with_source(
            ErrorCode::MissingApiKey,
            format!("Failed to read {}", config_js.display()),
            e,
        )),
    }
}

/// Extracts `ELEVENLABS_API_KEY = '...'` (either quote style) from source text.
pub fn api_key_from_js(text: &str) -> Option<String> {
    let pattern = Regex::new(r#"ELEVENLABS_API_KEY\s*[=:]\s*['"]([^'"]+)['"]"#).ok()?;
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
