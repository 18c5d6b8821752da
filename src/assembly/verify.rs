//! Continuity verification of assembled tracks.

use std::path::Path;

use tracing::{debug, warn};

use crate::audio::{AudioTool, SilenceParams};
use crate::error::Result;
use crate::types::{ContinuityReport, SilenceInterval};

/// Silence this close to either end of the track is not a gap.
pub const DEFAULT_GUARD_SEC: f64 = 1.0;

/// Finds interior silence in an assembled track.
pub struct ContinuityVerifier<'a> {
    tool: &'a dyn AudioTool,
    params: SilenceParams,
    guard_sec: f64,
}

impl<'a> ContinuityVerifier<'a> {
    pub fn new(tool: &'a dyn AudioTool) -> Self {
        Self {
            tool,
            params: SilenceParams::default(),
            guard_sec: DEFAULT_GUARD_SEC,
        }
    }

    pub fn with_params(mut self, params: SilenceParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_guard(mut self, guard_sec: f64) -> Self {
        self.guard_sec = guard_sec;
        self
    }

    /// Detects silence in `path` and keeps the interior intervals.
    pub fn verify(&self, key: &str, path: &Path) -> Result<ContinuityReport> {
        let duration_sec = self.tool.probe_duration(path)?;
        let detected = self.tool.detect_silence(path, &self.params)?;
        let gaps = interior_gaps(&detected, duration_sec, self.guard_sec);

        let report = ContinuityReport {
            gaps,
            total_detected: detected.len(),
            duration_sec,
        };
        if report.is_continuous() {
            debug!(
                track = key,
                detected = report.total_detected,
                "no interior gaps"
            );
        } else {
            for gap in &report.gaps {
                warn!(
                    track = key,
                    start = gap.start_sec,
                    end = gap.end_sec,
                    duration = gap.duration_sec(),
                    "silence gap inside track"
                );
            }
        }
        Ok(report)
    }
}

/// Drops intervals that start within `guard_sec` of the beginning or end
/// within `guard_sec` of the end.
pub fn interior_gaps(
    intervals: &[SilenceInterval],
    duration_sec: f64,
    guard_sec: f64,
) -> Vec<SilenceInterval> {
    intervals
        .iter()
        .filter(|gap| gap.start_sec >= guard_sec && gap.end_sec <= duration_sec - guard_sec)
        .copied()
        .collect()
}
