//! soundbake: pre-generates game audio assets from a declarative catalog.
//!
//! Short sound effects and voice lines are fetched from a text-to-audio
//! service and written as-is. Long music tracks are produced as several
//! overlapping segments which are assembled into one seamless file and
//! checked for audible gaps.
//!
//! # Modules
//!
//! - [`types`]: Catalog, tracks, segments, merge plans and reports
//! - [`config`]: Run configuration (BakeConfig, ToolKind)
//! - [`error`]: Error types and codes (BakeError, ErrorCode)
//! - [`audio`]: The audio tool seam and its ffmpeg and native implementations
//! - [`assembly`]: Preprocessing, merging and continuity verification
//! - [`cache`]: Segment cache and manifests
//! - [`source`]: Generation service clients
//! - [`generation`]: Per-track pipelines and whole-catalog runs
//!
//! # Example
//!
//! ```rust,ignore
//! use soundbake::audio::WavTool;
//! use soundbake::config::BakeConfig;
//! use soundbake::generation::BatchRunner;
//! use soundbake::types::Catalog;
//!
//! let catalog = Catalog::builtin()?;
//! let config = BakeConfig::from_env();
//! let tool = WavTool::new();
//!
//! let summary = BatchRunner::new(&catalog, &config, &tool).run()?;
//! println!("{} tracks assembled", summary.assembled);
//! ```

pub mod assembly;
pub mod audio;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod generation;
pub mod source;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{BakeConfig, ToolKind};
pub use error::{BakeError, ErrorCode, Result};
pub use types::{AssembledTrack, Catalog, ContinuityReport, MergePlan, Segment, TrackSpec};
