//! Segment assembly engine.
//!
//! Segments flow through three stages:
//! - [`SegmentPreprocessor`]: trim and normalize each raw segment
//! - [`TrackAssembler`]: merge the ordered segments into one track
//! - [`ContinuityVerifier`]: report silence gaps inside the result

pub mod assembler;
pub mod fades;
pub mod preprocess;
pub mod verify;

pub use assembler::{TrackAssembler, DEFAULT_DURATION_TOLERANCE_SEC};
pub use fades::{EdgeLevels, FadeCheck, EDGE_WINDOW_SEC};
pub use preprocess::SegmentPreprocessor;
pub use verify::{interior_gaps, ContinuityVerifier, DEFAULT_GUARD_SEC};
