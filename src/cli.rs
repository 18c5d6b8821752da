//! CLI argument parser.
//!
//! Command-line flags override the environment-derived [`BakeConfig`].

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::{BakeConfig, BatchSettings, RunMode, ToolKind};
use crate::types::{FadeCurve, MergeStrategy, UnfadedPolicy};

/// Segment merge strategies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Mix all segments at staggered offsets in one pass
    #[default]
    OverlapMix,
    /// Crossfade segments pairwise, left to right
    SequentialCrossfade,
}

impl From<StrategyArg> for MergeStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::OverlapMix => MergeStrategy::OverlapMix,
            StrategyArg::SequentialCrossfade => MergeStrategy::SequentialCrossfade,
        }
    }
}

/// Crossfade curves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CurveArg {
    /// Linear ramps
    Triangular,
    /// Quarter-sine ramps with constant energy
    #[default]
    EqualPower,
    /// Exponential ramps
    Exponential,
}

impl From<CurveArg> for FadeCurve {
    fn from(arg: CurveArg) -> Self {
        match arg {
            CurveArg::Triangular => FadeCurve::Triangular,
            CurveArg::EqualPower => FadeCurve::EqualPower,
            CurveArg::Exponential => FadeCurve::Exponential,
        }
    }
}

/// Handling of segments without natural fades under overlap-mix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum UnfadedArg {
    /// Fail the track
    #[default]
    Reject,
    /// Apply explicit fades before mixing
    Bake,
}

impl From<UnfadedArg> for UnfadedPolicy {
    fn from(arg: UnfadedArg) -> Self {
        match arg {
            UnfadedArg::Reject => UnfadedPolicy::Reject,
            UnfadedArg::Bake => UnfadedPolicy::Bake,
        }
    }
}

/// Audio tool implementations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ToolArg {
    /// ffmpeg and ffprobe binaries, MP3 output
    #[default]
    Ffmpeg,
    /// Built-in WAV processing, WAV output
    Native,
}

impl From<ToolArg> for ToolKind {
    fn from(arg: ToolArg) -> Self {
        match arg {
            ToolArg::Ffmpeg => ToolKind::Ffmpeg,
            ToolArg::Native => ToolKind::Native,
        }
    }
}

/// soundbake: pre-generate game audio and assemble long music loops
#[derive(Parser, Debug)]
#[command(name = "soundbake")]
#[command(about = "Generate sound effects, voice lines and seamless music tracks")]
#[command(version)]
pub struct Cli {
    /// Catalog JSON file (defaults to the built-in catalog)
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Output directory for sound effects and music
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output directory for voice lines
    #[arg(long)]
    pub voices_dir: Option<PathBuf>,

    /// Segment cache directory
    #[arg(long)]
    pub segments_dir: Option<PathBuf>,

    /// Parent directory for scratch files
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// JavaScript file to search for the API key
    #[arg(long, default_value = "public/config.js")]
    pub config_js: PathBuf,

    /// Only process these asset keys (comma separated)
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Re-assemble tracks from cached segments without generating anything
    #[arg(long, alias = "crossfade-only")]
    pub assemble_only: bool,

    /// Rebuild final tracks that already exist
    #[arg(long)]
    pub reassemble: bool,

    /// Remove the segment cache after a run without failures
    #[arg(long)]
    pub clean: bool,

    /// Keep scratch files of failed tracks
    #[arg(long)]
    pub keep_intermediates: bool,

    /// Skip sound effects and voice lines
    #[arg(long)]
    pub skip_clips: bool,

    /// Segment merge strategy
    #[arg(long, value_enum, default_value_t = StrategyArg::OverlapMix)]
    pub strategy: StrategyArg,

    /// Seconds neighbouring segments overlap
    #[arg(long, default_value = "6.0")]
    pub overlap: f64,

    /// Crossfade curve (sequential crossfade)
    #[arg(long, value_enum, default_value_t = CurveArg::EqualPower)]
    pub curve: CurveArg,

    /// Trim and normalize segments before overlap-mix
    #[arg(long)]
    pub preprocess: bool,

    /// Handling of segments without natural fades (overlap-mix)
    #[arg(long, value_enum, default_value_t = UnfadedArg::Reject)]
    pub unfaded: UnfadedArg,

    /// Output sample rate in Hz
    #[arg(long, default_value = "44100")]
    pub sample_rate: u32,

    /// Audio tool implementation
    #[arg(long, value_enum, default_value_t = ToolArg::Ffmpeg)]
    pub tool: ToolArg,

    /// Music tracks processed in parallel
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Segment requests issued together per track
    #[arg(long)]
    pub segment_batch: Option<usize>,

    /// Shortest silence reported as a gap, in seconds
    #[arg(long)]
    pub gap_min: Option<f64>,

    /// Seconds at either track end where silence is not a gap
    #[arg(long)]
    pub gap_guard: Option<f64>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Applies the flags on top of `config`.
    pub fn apply(&self, config: &mut BakeConfig) {
        if let Some(ref path) = self.output {
            config.output_dir = path.clone();
        }
        if let Some(ref path) = self.voices_dir {
            config.voices_dir = path.clone();
        }
        if let Some(ref path) = self.segments_dir {
            config.segments_dir = Some(path.clone());
        }
        if let Some(ref path) = self.work_dir {
            config.work_dir = Some(path.clone());
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if let Some(sec) = self.gap_min {
            config.gap_min_sec = sec;
        }
        if let Some(sec) = self.gap_guard {
            config.gap_guard_sec = sec;
        }
        if let Some(size) = self.segment_batch {
            config.segment_batch = BatchSettings::new(size, config.segment_batch.pacing_ms);
        }

        config.mode = if self.assemble_only {
            RunMode::AssembleOnly
        } else {
            RunMode::Generate
        };
        config.reassemble = self.reassemble;
        config.clean = self.clean;
        config.keep_intermediates = self.keep_intermediates;
        config.skip_clips = self.skip_clips;
        config.only = self.only.clone();

        config.tool = self.tool.into();
        if config.tool == ToolKind::Native {
            config.segment_extension = "wav".to_string();
        }

        config.plan.strategy = self.strategy.into();
        config.plan.overlap_sec = self.overlap;
        config.plan.curve = self.curve.into();
        config.plan.preprocess = self.preprocess;
        config.plan.unfaded = self.unfaded.into();
        config.plan.sample_rate = self.sample_rate;
    }

    /// Returns the log filter implied by the flags.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}
