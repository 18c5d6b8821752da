//! Audio tool capability.
//!
//! Every signal operation the assembly engine needs goes through
//! [`AudioTool`]. [`FfmpegTool`](super::FfmpegTool) runs the ffmpeg binaries;
//! [`WavTool`](super::WavTool) does the same work in-process on WAV files.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::error::{BakeError, ErrorCode};
use crate::types::{MergePlan, SilenceInterval};

/// Silence rule used to trim segment edges.
///
/// An edge is trimmed only when it starts (or ends) with a silent interval
/// of at least `min_silence_sec`. The whole interval is removed; shorter
/// edge silence is left in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimParams {
    /// Level below which audio counts as silence, in dBFS.
    pub threshold_db: f64,
    /// Edge silence shorter than this is left in place.
    pub min_silence_sec: f64,
}

impl TrimParams {
    /// The silence-detection rule that finds trimmable edges.
    pub fn silence(&self) -> SilenceParams {
        SilenceParams {
            noise_db: self.threshold_db,
            min_duration_sec: self.min_silence_sec,
        }
    }
}

impl Default for TrimParams {
    fn default() -> Self {
        Self {
            threshold_db: -45.0,
            min_silence_sec: 0.1,
        }
    }
}

/// Silence rule used by gap detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceParams {
    /// Noise floor in dBFS.
    pub noise_db: f64,
    /// Minimum length of a reported interval.
    pub min_duration_sec: f64,
}

impl Default for SilenceParams {
    fn default() -> Self {
        Self {
            noise_db: -30.0,
            min_duration_sec: 0.5,
        }
    }
}

/// One input of a delayed mix.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayedInput {
    pub path: PathBuf,
    /// Offset of this input from the start of the mix.
    pub delay_sec: f64,
}

/// Errors raised by tool invocations.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be started
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program exited with a non-zero status
    #[error("{program} exited with status {status}: {stderr_tail}")]
    Exit {
        program: String,
        status: i32,
        stderr_tail: String,
    },

    /// The program ran past its deadline and was killed
    #[error("{program} timed out after {timeout_sec}s")]
    Timeout { program: String, timeout_sec: u64 },

    /// The invocation produced no audio
    #[error("no audio produced at {}", .0.display())]
    Empty(PathBuf),

    /// Tool output could not be interpreted
    #[error("unparseable {program} output: {detail}")]
    Parse { program: String, detail: String },

    /// WAV decode or encode failure
    #[error("WAV error on {}: {source}", .path.display())]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    /// Sample rate conversion failure
    #[error("resampling failed: {0}")]
    Resample(String),

    /// The input cannot be processed by this tool
    #[error("cannot process {}: {reason}", .path.display())]
    Unsupported { path: PathBuf, reason: String },

    /// Filesystem failure around an invocation
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<ToolError> for BakeError {
    fn from(err: ToolError) -> Self {
        let code = match &err {
            ToolError::Spawn { .. } => ErrorCode::ToolMissing,
            ToolError::Timeout { .. } => ErrorCode::ToolTimeout,
            ToolError::Empty(_) => ErrorCode::EmptyOutput,
            _ => ErrorCode::ToolFailed,
        };
        let message = err.to_string();
        BakeError::with_source(code, message, err)
    }
}

/// Result alias for tool invocations.
pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Signal operations over encoded audio files.
///
/// All operations read their inputs from disk and write a new output file;
/// inputs are never modified. Outputs are in the plan's sample rate and
/// channel layout. Implementations must be deterministic.
pub trait AudioTool: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// File extension of final assets written by [`AudioTool::encode`]
    /// and [`AudioTool::mix_delayed`].
    fn output_extension(&self) -> &'static str;

    /// Duration of an audio file in seconds.
    fn probe_duration(&self, input: &Path) -> ToolResult<f64>;

    /// Removes leading and trailing silence and converts to the plan's format.
    fn trim_silence(
        &self,
        input: &Path,
        output: &Path,
        params: &TrimParams,
        plan: &MergePlan,
    ) -> ToolResult<()>;

    /// Normalizes loudness to the plan's target.
    fn normalize(&self, input: &Path, output: &Path, plan: &MergePlan) -> ToolResult<()>;

    /// Applies a fade-in at the start and a fade-out at the end.
    fn fade(
        &self,
        input: &Path,
        output: &Path,
        duration_sec: f64,
        fade_sec: f64,
        plan: &MergePlan,
    ) -> ToolResult<()>;

    /// Sums all inputs, each shifted by its delay, then normalizes loudness.
    /// The result lasts until the longest shifted input ends.
    fn mix_delayed(
        &self,
        inputs: &[DelayedInput],
        output: &Path,
        plan: &MergePlan,
    ) -> ToolResult<()>;

    /// Crossfades the tail of `first` into the head of `second` over
    /// `plan.overlap_sec` using `plan.curve`.
    fn crossfade(
        &self,
        first: &Path,
        second: &Path,
        output: &Path,
        plan: &MergePlan,
    ) -> ToolResult<()>;

    /// Re-encodes `input` into the final asset format.
    fn encode(&self, input: &Path, output: &Path, plan: &MergePlan) -> ToolResult<()>;

    /// Finds silent intervals. An interval still open at end of stream
    /// ends at the stream duration.
    fn detect_silence(
        &self,
        input: &Path,
        params: &SilenceParams,
    ) -> ToolResult<Vec<SilenceInterval>>;

    /// Mean level of a window of the file in dBFS.
    fn measure_level(&self, input: &Path, start_sec: f64, duration_sec: f64) -> ToolResult<f64>;
}

/// Slack allowed between an edge interval and the stream boundary.
const EDGE_SLACK_SEC: f64 = 0.005;

/// Returns the `(start, end)` span kept after trimming edge silence.
///
/// Only intervals touching the start or the end of the stream are removed.
/// Returns None when silence covers the whole stream.
pub fn trim_span(intervals: &[SilenceInterval], duration_sec: f64) -> Option<(f64, f64)> {
    let mut start = 0.0;
    let mut end = duration_sec;
    if let Some(first) = intervals.first() {
        if first.start_sec <= EDGE_SLACK_SEC {
            start = first.end_sec;
        }
    }
    if let Some(last) = intervals.last() {
        if last.end_sec >= duration_sec - EDGE_SLACK_SEC {
            end = last.start_sec;
        }
    }
    if duration_sec > 0.0 && end - start <= EDGE_SLACK_SEC {
        return None;
    }
    Some((start, end.max(start)))
}

/// Fails with [`ToolError::Empty`] unless `path` is a non-empty file.
pub fn ensure_output(path: &Path) -> ToolResult<()> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(ToolError::Empty(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ToolError::Empty(path.to_path_buf()))
        }
        Err(source) => Err(ToolError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
