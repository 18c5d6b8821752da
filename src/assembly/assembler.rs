//! Track assembly.
//!
//! [`TrackAssembler`] turns an ordered list of segments into one continuous
//! track, either by mixing all segments at staggered offsets in one pass
//! ([`MergeStrategy::OverlapMix`]) or by folding pairwise crossfades over
//! the list ([`MergeStrategy::SequentialCrossfade`]).

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::fades::FadeCheck;
use crate::audio::{AudioTool, DelayedInput};
use crate::error::{BakeError, ErrorCode, Result};
use crate::types::{file_digest, AssembledTrack, MergePlan, MergeStrategy, Segment, UnfadedPolicy};

/// Allowed difference between predicted and probed duration.
pub const DEFAULT_DURATION_TOLERANCE_SEC: f64 = 0.25;

/// Merges segments into a final track.
pub struct TrackAssembler<'a> {
    tool: &'a dyn AudioTool,
    tolerance_sec: f64,
}

impl<'a> TrackAssembler<'a> {
    pub fn new(tool: &'a dyn AudioTool) -> Self {
        Self {
            tool,
            tolerance_sec: DEFAULT_DURATION_TOLERANCE_SEC,
        }
    }

    /// Overrides the duration drift tolerance.
    pub fn with_tolerance(mut self, tolerance_sec: f64) -> Self {
        self.tolerance_sec = tolerance_sec;
        self
    }

    /// Assembles `segments` into `output`.
    ///
    /// # Arguments
    ///
    /// * `key` - Track key, used for logs and the result
    /// * `segments` - Segments in temporal order
    /// * `plan` - Strategy, overlap and output format
    /// * `nominal_sec` - Nominal segment duration of the track
    /// * `output` - Final asset path
    /// * `scratch` - Directory for intermediates
    ///
    /// # Errors
    ///
    /// `InvalidPlan` for an empty segment list or an overlap that does not
    /// fit the segments, `UnfadedSegment` when overlap-mix rejects a
    /// segment, and any tool failure.
    pub fn assemble(
        &self,
        key: &str,
        segments: &[Segment],
        plan: &MergePlan,
        nominal_sec: f64,
        output: &Path,
        scratch: &Path,
    ) -> Result<AssembledTrack> {
        let Some(first) = segments.first() else {
            return Err(BakeError::invalid_plan(format!("track {key} has no segments")));
        };
        plan.validate(nominal_sec)?;

        let expected_duration_sec = if segments.len() == 1 {
            debug!(track = key, step = "encode", "single segment, encoding directly");
            self.tool.encode(&first.path, output, plan)?;
            first.duration_sec
        } else {
            match plan.strategy {
                MergeStrategy::OverlapMix => {
                    self.overlap_mix(key, segments, plan, nominal_sec, output, scratch)?
                }
                MergeStrategy::SequentialCrossfade => {
                    self.sequential_crossfade(key, segments, plan, output, scratch)?
                }
            }
        };

        let measured_duration_sec = self.tool.probe_duration(output)?;
        let digest = file_digest(output).map_err(|e| BakeError::io("hash", output, e))?;
        let track = AssembledTrack {
            key: key.to_string(),
            path: output.to_path_buf(),
            strategy: plan.strategy,
            segment_count: segments.len(),
            expected_duration_sec,
            measured_duration_sec,
            digest,
        };

        if track.duration_drift().abs() > self.tolerance_sec {
            warn!(
                track = key,
                expected = expected_duration_sec,
                measured = measured_duration_sec,
                "assembled duration deviates from plan"
            );
        }
        info!(
            track = key,
            strategy = %plan.strategy,
            segments = track.segment_count,
            duration = measured_duration_sec,
            digest = %track.digest,
            "track assembled"
        );
        Ok(track)
    }

    /// Mixes every segment delayed by `i * spacing` in one invocation.
    fn overlap_mix(
        &self,
        key: &str,
        segments: &[Segment],
        plan: &MergePlan,
        nominal_sec: f64,
        output: &Path,
        scratch: &Path,
    ) -> Result<f64> {
        let unfaded = FadeCheck::new(self.tool).unfaded(segments, plan.fade_margin_db)?;
        let baked;
        let segments = if unfaded.is_empty() {
            segments
        } else {
            match plan.unfaded {
                UnfadedPolicy::Reject => {
                    return Err(BakeError::new(
                        ErrorCode::UnfadedSegment,
                        format!("Segments {unfaded:?} of {key} do not fade in and out"),
                    ));
                }
                UnfadedPolicy::Bake => {
                    baked = self.bake_fades(segments, &unfaded, plan, scratch)?;
                    baked.as_slice()
                }
            }
        };

        let spacing = plan.spacing(nominal_sec);
        let inputs: Vec<DelayedInput> = segments
            .iter()
            .enumerate()
            .map(|(i, segment)| DelayedInput {
                path: segment.path.clone(),
                delay_sec: i as f64 * spacing,
            })
            .collect();
        debug!(
            track = key,
            step = "mix",
            inputs = inputs.len(),
            spacing,
            "mixing segments"
        );
        self.tool.mix_delayed(&inputs, output, plan)?;

        Ok(plan.overlap_mix_duration(segments.len(), nominal_sec))
    }

    /// Copies the listed segments into `scratch` with explicit fades.
    fn bake_fades(
        &self,
        segments: &[Segment],
        unfaded: &[usize],
        plan: &MergePlan,
        scratch: &Path,
    ) -> Result<Vec<Segment>> {
        segments
            .iter()
            .map(|segment| -> Result<Segment> {
                if !unfaded.contains(&segment.index) {
                    return Ok(segment.clone());
                }
                let path = scratch.join(format!("fade{:02}.wav", segment.index));
                self.tool.fade(
                    &segment.path,
                    &path,
                    segment.duration_sec,
                    plan.overlap_sec,
                    plan,
                )?;
                debug!(track = %segment.track, segment = segment.index, "baked fades");
                Ok(segment.derived(path, segment.duration_sec))
            })
            .collect()
    }

    /// Folds pairwise crossfades over the segments, then encodes the result.
    fn sequential_crossfade(
        &self,
        key: &str,
        segments: &[Segment],
        plan: &MergePlan,
        output: &Path,
        scratch: &Path,
    ) -> Result<f64> {
        if let Some(short) = segments
            .iter()
            .find(|segment| segment.duration_sec <= plan.overlap_sec)
        {
            return Err(BakeError::invalid_plan(format!(
                "segment {} of {key} lasts {:.2}s, not longer than the {}s crossfade",
                short.index, short.duration_sec, plan.overlap_sec
            )));
        }

        let first = segments[0].path.clone();
        let merged = segments[1..]
            .iter()
            .enumerate()
            .try_fold(first.clone(), |running, (step, next)| -> Result<PathBuf> {
                let merged = scratch.join(format!("merge{:02}.wav", step + 1));
                debug!(track = key, step = "crossfade", segment = next.index, "crossfading");
                self.tool.crossfade(&running, &next.path, &merged, plan)?;
                if running != first {
                    std::fs::remove_file(&running)
                        .map_err(|e| BakeError::io("remove merge intermediate", &running, e))?;
                }
                Ok(merged)
            })?;

        self.tool.encode(&merged, output, plan)?;
        std::fs::remove_file(&merged)
            .map_err(|e| BakeError::io("remove merge intermediate", &merged, e))?;

        let durations: Vec<f64> = segments.iter().map(|s| s.duration_sec).collect();
        Ok(plan.crossfade_duration(&durations))
    }
}
