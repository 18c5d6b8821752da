//! Merge plan: how segments of a track are combined.

use serde::{Deserialize, Serialize};

use crate::error::{BakeError, Result};

/// How segments are stitched together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Delay every segment by `i * spacing` and sum all of them in one pass.
    /// Requires segments that fade in and out on their own.
    #[default]
    OverlapMix,
    /// Crossfade the running track with the next segment, one pair at a time.
    SequentialCrossfade,
}

impl MergeStrategy {
    /// Returns the string representation of the strategy.
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::OverlapMix => "overlap-mix",
            MergeStrategy::SequentialCrossfade => "sequential-crossfade",
        }
    }

    /// Parses a strategy from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "overlap-mix" | "overlap" | "mix" => Some(MergeStrategy::OverlapMix),
            "sequential-crossfade" | "crossfade" | "sequential" => {
                Some(MergeStrategy::SequentialCrossfade)
            }
            _ => None,
        }
    }

    /// Returns true if segments must be preprocessed before this strategy.
    pub fn requires_preprocessing(&self) -> bool {
        matches!(self, MergeStrategy::SequentialCrossfade)
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Gain curve used inside a crossfade region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FadeCurve {
    /// Linear ramps. Dips in perceived loudness mid-fade.
    Triangular,
    /// Quarter-sine ramps whose squared gains sum to one.
    #[default]
    EqualPower,
    /// Exponential ramps.
    Exponential,
}

impl FadeCurve {
    /// Returns the ffmpeg `acrossfade` curve name.
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            FadeCurve::Triangular => "tri",
            FadeCurve::EqualPower => "qsin",
            FadeCurve::Exponential => "exp",
        }
    }

    /// Gain of the incoming signal at position `t` in `[0, 1]` of the fade.
    ///
    /// The outgoing signal uses `gain(1 - t)`.
    pub fn gain(&self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            FadeCurve::Triangular => t,
            FadeCurve::EqualPower => (t * std::f64::consts::FRAC_PI_2).sin(),
            // 60 dB of range, matching ffmpeg's exp curve closely enough
            FadeCurve::Exponential => {
                if t == 0.0 {
                    0.0
                } else {
                    (10f64).powf(3.0 * (t - 1.0))
                }
            }
        }
    }
}

/// Output channel layout. Only stereo is produced; mono input is upmixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    #[default]
    Stereo,
}

impl ChannelLayout {
    /// Number of interleaved channels.
    pub fn channels(&self) -> u16 {
        match self {
            ChannelLayout::Stereo => 2,
        }
    }

    /// Returns the ffmpeg layout name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelLayout::Stereo => "stereo",
        }
    }
}

/// What overlap-mix does with a segment that has no natural fades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnfadedPolicy {
    /// Fail the track.
    #[default]
    Reject,
    /// Apply fade-in and fade-out of `overlap` seconds before mixing.
    Bake,
}

/// Loudness normalization target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoudnessTarget {
    /// Integrated loudness in LUFS.
    pub integrated_lufs: f64,
    /// True-peak ceiling in dBTP.
    pub true_peak_db: f64,
    /// Loudness range target in LU.
    pub loudness_range: f64,
}

impl Default for LoudnessTarget {
    fn default() -> Self {
        Self {
            integrated_lufs: -16.0,
            true_peak_db: -1.5,
            loudness_range: 11.0,
        }
    }
}

/// Complete description of how a track is assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergePlan {
    /// Merge topology.
    pub strategy: MergeStrategy,

    /// Seconds two neighbouring segments sound together.
    /// Overlap for overlap-mix, crossfade length for sequential crossfade.
    pub overlap_sec: f64,

    /// Crossfade curve (sequential crossfade only).
    pub curve: FadeCurve,

    /// Sample rate of intermediates and output.
    pub sample_rate: u32,

    /// Output channel layout.
    pub layout: ChannelLayout,

    /// Loudness normalization target.
    pub loudness: LoudnessTarget,

    /// Trim and normalize segments before overlap-mix.
    /// Sequential crossfade always preprocesses.
    pub preprocess: bool,

    /// Handling of segments that fail the fade check.
    pub unfaded: UnfadedPolicy,

    /// Minimum level difference between a segment edge and its body
    /// for the edge to count as faded.
    pub fade_margin_db: f64,
}

impl Default for MergePlan {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::default(),
            overlap_sec: 6.0,
            curve: FadeCurve::default(),
            sample_rate: 44100,
            layout: ChannelLayout::default(),
            loudness: LoudnessTarget::default(),
            preprocess: false,
            unfaded: UnfadedPolicy::default(),
            fade_margin_db: 6.0,
        }
    }
}

impl MergePlan {
    /// Returns true if segments are preprocessed under this plan.
    pub fn preprocesses(&self) -> bool {
        self.preprocess || self.strategy.requires_preprocessing()
    }

    /// Offset between consecutive segment starts for overlap-mix.
    pub fn spacing(&self, nominal_sec: f64) -> f64 {
        nominal_sec - self.overlap_sec
    }

    /// Checks the plan against the nominal segment duration.
    pub fn validate(&self, nominal_sec: f64) -> Result<()> {
        if self.overlap_sec <= 0.0 {
            return Err(BakeError::invalid_plan(format!(
                "overlap must be positive, got {}s",
                self.overlap_sec
            )));
        }
        if self.overlap_sec >= nominal_sec {
            return Err(BakeError::invalid_plan(format!(
                "overlap {}s must be shorter than the {}s segments",
                self.overlap_sec, nominal_sec
            )));
        }
        if self.sample_rate == 0 {
            return Err(BakeError::invalid_plan("sample rate must be > 0"));
        }
        Ok(())
    }

    /// Predicted length of an overlap-mix of `count` segments.
    pub fn overlap_mix_duration(&self, count: usize, nominal_sec: f64) -> f64 {
        if count == 0 {
            return 0.0;
        }
        (count - 1) as f64 * self.spacing(nominal_sec) + nominal_sec
    }

    /// Predicted length of a sequential crossfade of segments with the given durations.
    pub fn crossfade_duration(&self, durations: &[f64]) -> f64 {
        if durations.is_empty() {
            return 0.0;
        }
        durations.iter().sum::<f64>() - (durations.len() - 1) as f64 * self.overlap_sec
    }
}
