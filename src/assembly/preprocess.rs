//! Segment preprocessing.
//!
//! Canonicalizes a raw segment before merging: edge silence is trimmed, the
//! audio is converted to the plan's sample rate and layout, and loudness is
//! normalized to the plan's target. Raw segments are never touched; results
//! live in the caller's scratch directory.

use std::path::Path;

use tracing::debug;

use crate::audio::{AudioTool, TrimParams};
use crate::error::{BakeError, ErrorCode, Result};
use crate::types::{MergePlan, Segment};

/// Trims and normalizes segments through an [`AudioTool`].
pub struct SegmentPreprocessor<'a> {
    tool: &'a dyn AudioTool,
    trim: TrimParams,
}

impl<'a> SegmentPreprocessor<'a> {
    pub fn new(tool: &'a dyn AudioTool) -> Self {
        Self {
            tool,
            trim: TrimParams::default(),
        }
    }

    /// Preprocesses one segment into `scratch`.
    ///
    /// # Arguments
    ///
    /// * `segment` - Raw segment, left unmodified
    /// * `plan` - Supplies the target format and loudness
    /// * `scratch` - Directory receiving `seg{NN}.wav`
    ///
    /// # Returns
    ///
    /// A segment with the same identity backed by the processed file and
    /// carrying its measured duration.
    pub fn process(&self, segment: &Segment, plan: &MergePlan, scratch: &Path) -> Result<Segment> {
        let trimmed = scratch.join(format!("seg{:02}.trim.wav", segment.index));
        let output = scratch.join(format!("seg{:02}.wav", segment.index));

        self.tool
            .trim_silence(&segment.path, &trimmed, &self.trim, plan)?;
        self.tool.normalize(&trimmed, &output, plan)?;
        std::fs::remove_file(&trimmed)
            .map_err(|e| BakeError::io("remove trim intermediate", &trimmed, e))?;

        let duration_sec = self.tool.probe_duration(&output)?;
        if duration_sec <= 0.0 {
            return Err(BakeError::new(
                ErrorCode::EmptyOutput,
                format!(
                    "Segment {} of {} is empty after preprocessing",
                    segment.index, segment.track
                ),
            ));
        }

        debug!(
            track = %segment.track,
            segment = segment.index,
            step = "preprocess",
            before = segment.duration_sec,
            after = duration_sec,
            "segment preprocessed"
        );
        Ok(segment.derived(output, duration_sec))
    }

    /// Preprocesses every segment in order, stopping at the first failure.
    pub fn process_all(
        &self,
        segments: &[Segment],
        plan: &MergePlan,
        scratch: &Path,
    ) -> Result<Vec<Segment>> {
        segments
            .iter()
            .map(|segment| self.process(segment, plan, scratch))
            .collect()
    }
}
