//! Core types for soundbake.
//!
//! This module re-exports all the core data types used throughout the crate:
//! - [`TrackSpec`], [`Segment`], [`AssembledTrack`]: music track lifecycle
//! - [`MergePlan`]: how segments are combined
//! - [`ContinuityReport`]: result of gap verification
//! - [`Catalog`]: the declarative list of assets to produce

mod catalog;
mod plan;
mod report;
mod track;

// Re-export all types at the module level
pub use catalog::{Catalog, ClipSpec, VoiceCatalog, VoiceLine};
pub use plan::{ChannelLayout, FadeCurve, LoudnessTarget, MergePlan, MergeStrategy, UnfadedPolicy};
pub use report::{ContinuityReport, SilenceInterval};
pub use track::{file_digest, AssembledTrack, Segment, TrackSpec, DEFAULT_SEGMENT_SECONDS};
